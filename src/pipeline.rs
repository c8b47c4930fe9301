use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crate::config::{Config, STATS_TABLE};
use crate::db::writer::write_batch;
use crate::error::Result;
use crate::fetcher::{fetch_collection_stats, StatsSource};
use crate::reshape::reshape;
use crate::types::RunTimestamp;

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub timestamp: RunTimestamp,
    pub collections: usize,
    pub stat_columns: usize,
    pub rows_written: u64,
    pub elapsed: Duration,
}

/// One full run: fetch every configured collection, reshape into a single
/// wide batch, append it to `open_sea_stats`. Nothing is written unless
/// fetch and reshape both succeed.
pub async fn run_once<S>(cfg: &Config, source: &S) -> Result<RunSummary>
where
    S: StatsSource + ?Sized,
{
    let started = Instant::now();
    let timestamp = RunTimestamp::now();

    let rows = fetch_collection_stats(
        source,
        &cfg.api_url,
        &cfg.collections,
        &cfg.endpoint,
        timestamp,
        cfg.retry,
    )
    .await?;

    let batch = reshape(&rows)?;
    info!(
        rows = batch.len(),
        stat_columns = batch.stat_columns.len(),
        "Reshaped {} collections into one batch",
        batch.len(),
    );

    let rows_written = write_batch(&cfg.db_path, STATS_TABLE, &batch, cfg.schema_drift).await?;

    let elapsed = started.elapsed();
    info!(elapsed_ms = elapsed.as_millis() as u64, "Run complete in {elapsed:?}");

    Ok(RunSummary {
        timestamp,
        collections: cfg.collections.len(),
        stat_columns: batch.stat_columns.len(),
        rows_written,
        elapsed,
    })
}
