use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use opensea_stats::config::{Config, STATS_TABLE};
use opensea_stats::db::maintenance::{row_count, truncate_table};
use opensea_stats::error::Result;

// ---------------------------------------------------------------------------
// Entry point: `truncate [TABLE]`, database from DB_PATH
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    let table = std::env::args().nth(1).unwrap_or_else(|| STATS_TABLE.to_string());

    if let Err(e) = run(&cfg.db_path, &table).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(db_path: &str, table: &str) -> Result<()> {
    let deleted = truncate_table(db_path, table).await?;
    let remaining = row_count(db_path, table).await?;
    info!(db_path, table, deleted, remaining, "Deleted {deleted} rows from {table}");
    Ok(())
}
