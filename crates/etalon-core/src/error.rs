use thiserror::Error;

/// All errors that can occur in etalon-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Session not found: {0}")]
    SessionNotFound(i64),

    #[error("Stage not found: {0}")]
    StageNotFound(i64),

    #[error("Benchmark not found: {0}")]
    BenchmarkNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
