use std::time::Duration;

use crate::error::{AppError, Result};

pub const OPENSEA_API_URL: &str = "https://api.opensea.io/api/v1/collection";

/// Path segment appended after the collection slug.
pub const STATS_ENDPOINT: &str = "stats";

/// Destination table for every run.
pub const STATS_TABLE: &str = "open_sea_stats";

pub const DEFAULT_DB_PATH: &str = "open_sea_collection_stats.db";

/// Total fetch attempts per run (1 initial + 4 retries).
pub const FETCH_MAX_ATTEMPTS: u32 = 5;

/// Fixed pause between whole-batch attempts (seconds). No backoff, no jitter.
pub const FETCH_RETRY_DELAY_SECS: u64 = 30;

pub const HTTP_TIMEOUT_SECS: u64 = 30;

pub const USER_AGENT: &str = concat!("opensea-stats/", env!("CARGO_PKG_VERSION"));

/// Collections polled when COLLECTIONS is not set. Order is significant: it
/// is the row order of every batch.
pub const DEFAULT_COLLECTIONS: &[&str] = &[
    "boredapeyachtclub",
    "mutant-ape-yacht-club",
    "cryptopunks",
    "meebits",
    "proof-moonbirds",
    "clonex",
    "azuki",
    "doodles-official",
    "cool-cats-nft",
    "world-of-women-nft",
    "murakami-flowers-seed",
    "goblintownwtf",
    "mfers",
    "onchainmonkey",
    "cyberbrokers",
    "hashmasks",
    "otherdeed",
    "sandbox",
    "decentraland",
    "kaiju-kingz",
    "deadfellaz",
    "veefriends",
    "chromie-squiggle-by-snowfro",
    "fidenza-by-tyler-hobbs",
    "ringers-by-dmitri-cherniak",
    "memories-of-qilin-by-emily-xie",
];

/// What to do when a batch carries stat columns the existing table lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaDriftPolicy {
    /// Fail before writing anything.
    #[default]
    Reject,
    /// ALTER TABLE ADD COLUMN for each missing column, then append.
    Extend,
}

impl std::str::FromStr for SchemaDriftPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(SchemaDriftPolicy::Reject),
            "extend" => Ok(SchemaDriftPolicy::Extend),
            other => Err(AppError::Config(format!(
                "SCHEMA_DRIFT must be 'reject' or 'extend', got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for SchemaDriftPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaDriftPolicy::Reject => write!(f, "reject"),
            SchemaDriftPolicy::Extend => write!(f, "extend"),
        }
    }
}

/// Bounded whole-batch retry for transient decode failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: FETCH_MAX_ATTEMPTS,
            delay: Duration::from_secs(FETCH_RETRY_DELAY_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub endpoint: String,
    /// Collection slugs in fetch order (COLLECTIONS, comma-separated).
    pub collections: Vec<String>,
    pub db_path: String,
    pub log_level: String,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
    pub schema_drift: SchemaDriftPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup so parsing can be tested
    /// without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let collections = match lookup("COLLECTIONS") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>(),
            None => DEFAULT_COLLECTIONS.iter().map(|s| s.to_string()).collect(),
        };
        if collections.is_empty() {
            return Err(AppError::Config(
                "COLLECTIONS must name at least one collection slug".to_string(),
            ));
        }

        let max_attempts = lookup("FETCH_MAX_ATTEMPTS")
            .unwrap_or_else(|| FETCH_MAX_ATTEMPTS.to_string())
            .parse::<u32>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                AppError::Config("FETCH_MAX_ATTEMPTS must be a positive integer".to_string())
            })?;

        let retry_delay_secs = lookup("FETCH_RETRY_DELAY_SECS")
            .unwrap_or_else(|| FETCH_RETRY_DELAY_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Config("FETCH_RETRY_DELAY_SECS must be a number of seconds".to_string())
            })?;

        let http_timeout_secs = lookup("HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|| HTTP_TIMEOUT_SECS.to_string())
            .parse::<u64>()
            .map_err(|_| {
                AppError::Config("HTTP_TIMEOUT_SECS must be a number of seconds".to_string())
            })?;

        let schema_drift = match lookup("SCHEMA_DRIFT") {
            Some(raw) => raw.parse::<SchemaDriftPolicy>()?,
            None => SchemaDriftPolicy::default(),
        };

        Ok(Self {
            api_url: lookup("OPENSEA_API_URL")
                .unwrap_or_else(|| OPENSEA_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            endpoint: lookup("STATS_ENDPOINT").unwrap_or_else(|| STATS_ENDPOINT.to_string()),
            collections,
            db_path: lookup("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            retry: RetryPolicy {
                max_attempts,
                delay: Duration::from_secs(retry_delay_secs),
            },
            http_timeout: Duration::from_secs(http_timeout_secs),
            schema_drift,
        })
    }
}
