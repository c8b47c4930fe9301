use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, Row};
use tracing::{info, warn};

use crate::config::SchemaDriftPolicy;
use crate::db::{connect, quote_ident};
use crate::error::{AppError, Result};
use crate::types::StatsBatch;

/// Append `batch` to `table` in the SQLite file at `db_path`, creating the
/// file and table when absent. Returns the number of rows written.
pub async fn write_batch(
    db_path: &str,
    table: &str,
    batch: &StatsBatch,
    policy: SchemaDriftPolicy,
) -> Result<u64> {
    let mut conn = connect(db_path, true).await?;
    let result = write_batch_on(&mut conn, table, batch, policy).await;
    conn.close().await?;
    result
}

async fn write_batch_on(
    conn: &mut SqliteConnection,
    table: &str,
    batch: &StatsBatch,
    policy: SchemaDriftPolicy,
) -> Result<u64> {
    let columns = batch.columns();
    let table_ident = quote_ident(table);

    let fields = columns
        .iter()
        .map(|c| format!("\n\t{} text", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(",");
    let ddl = format!("CREATE TABLE IF NOT EXISTS {table_ident} ({fields}\n)");
    sqlx::query(&ddl).execute(&mut *conn).await?;

    let existing = table_columns(conn, table).await?;
    let missing: Vec<String> = columns
        .iter()
        .filter(|c| !existing.iter().any(|e| e.eq_ignore_ascii_case(c)))
        .map(|c| c.to_string())
        .collect();

    if !missing.is_empty() {
        match policy {
            SchemaDriftPolicy::Reject => return Err(AppError::SchemaDrift { missing }),
            SchemaDriftPolicy::Extend => {
                for col in &missing {
                    warn!(table, column = %col, "Adding column missing from existing table");
                    let alter = format!("ALTER TABLE {table_ident} ADD COLUMN {} text", quote_ident(col));
                    sqlx::query(&alter).execute(&mut *conn).await?;
                }
            }
        }
    }

    if batch.is_empty() {
        return Ok(0);
    }

    let column_list = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");
    let insert = format!("INSERT INTO {table_ident} ({column_list}) VALUES ({placeholders})");

    let mut tx = conn.begin().await?;
    let mut written = 0u64;
    for idx in 0..batch.len() {
        let Some(cells) = batch.text_row(idx) else {
            continue;
        };
        let mut query = sqlx::query(&insert);
        for cell in cells {
            query = query.bind(cell);
        }
        written += query.execute(&mut *tx).await?.rows_affected();
    }
    tx.commit().await?;

    info!(table, rows = written, columns = columns.len(), "Appended {written} rows to {table}");
    Ok(written)
}

/// Column names of `table` in declaration order; empty if it does not exist.
pub async fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<Vec<String>> {
    let pragma = format!("PRAGMA table_info({})", quote_ident(table));
    let rows = sqlx::query(&pragma).fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| row.try_get::<String, _>("name").map_err(AppError::from))
        .collect()
}
