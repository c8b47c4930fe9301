use sqlx::Connection;
use tracing::info;

use crate::db::{connect, quote_ident};
use crate::error::Result;

/// Delete every row of `table`, leaving the table in place. Returns the
/// number of rows removed.
pub async fn truncate_table(db_path: &str, table: &str) -> Result<u64> {
    let mut conn = connect(db_path, false).await?;
    let sql = format!("DELETE FROM {}", quote_ident(table));
    let result = sqlx::query(&sql).execute(&mut conn).await;
    conn.close().await?;

    let deleted = result?.rows_affected();
    info!(table, deleted, "Truncated {table}");
    Ok(deleted)
}

pub async fn row_count(db_path: &str, table: &str) -> Result<i64> {
    let mut conn = connect(db_path, false).await?;
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let result = sqlx::query_scalar::<_, i64>(&sql).fetch_one(&mut conn).await;
    conn.close().await?;
    Ok(result?)
}
