use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not valid JSON. Retried as a whole batch until the
    /// attempt budget runs out.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected payload for {collection}: {reason}")]
    UnexpectedPayload { collection: String, reason: String },

    #[error("Duplicate stat '{stat}' returned for {collection}")]
    DuplicateStat { collection: String, stat: String },

    /// SQLite column names ignore ASCII case, so these would land in the same
    /// column.
    #[error("Stat '{stat}' returned for {collection} collides with column '{column}'")]
    ColumnCollision {
        collection: String,
        stat: String,
        column: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Table is missing columns {missing:?} (set SCHEMA_DRIFT=extend to add them)")]
    SchemaDrift { missing: Vec<String> },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// True for decode failures caused by a body that is not JSON at all
    /// (rate-limit pages, truncated responses). Well-formed JSON of the wrong
    /// shape is not transient.
    pub fn is_transient_parse(&self) -> bool {
        match self {
            AppError::Json(e) => e.is_syntax() || e.is_eof(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
