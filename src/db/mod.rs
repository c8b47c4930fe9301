pub mod maintenance;
pub mod writer;

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::ConnectOptions;

use crate::error::Result;

/// Open a single connection to the SQLite file at `db_path`. Callers close it
/// before returning; there is no pool.
pub async fn connect(db_path: &str, create_if_missing: bool) -> Result<SqliteConnection> {
    let conn = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(create_if_missing)
        .connect()
        .await?;
    Ok(conn)
}

/// Double-quote an SQL identifier, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
