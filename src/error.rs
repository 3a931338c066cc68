use thiserror::Error;

/// Error type for pgdal operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PgDalError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Couldn't set non-blocking mode: {0}")]
    ModeConfigurationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Index error: {0}")]
    OutOfRange(String),

    #[error("Cannot decode {value:?} in column {column} as {target}")]
    InvalidValue {
        column: usize,
        value: String,
        target: &'static str,
    },

    #[error("Cannot read column {column}: {reason}")]
    UnreadableCell { column: usize, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for pgdal operations
pub type Result<T> = std::result::Result<T, PgDalError>;
