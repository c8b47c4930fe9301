use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use opensea_stats::config::Config;
use opensea_stats::error::Result;
use opensea_stats::fetcher::HttpStatsSource;
use opensea_stats::pipeline::run_once;

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

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!(
        collections = cfg.collections.len(),
        db_path = %cfg.db_path,
        schema_drift = %cfg.schema_drift,
        "Polling {} for {} collections",
        cfg.api_url,
        cfg.collections.len(),
    );

    let source = HttpStatsSource::new(cfg.http_timeout)?;
    let summary = run_once(&cfg, &source).await?;

    info!(
        timestamp = %summary.timestamp,
        collections = summary.collections,
        rows = summary.rows_written,
        stat_columns = summary.stat_columns,
        "Stored {} rows for {} collections at {} ({:.1}s)",
        summary.rows_written,
        summary.collections,
        summary.timestamp,
        summary.elapsed.as_secs_f64(),
    );
    Ok(())
}
