//! Error types for the program guide

/// Result type alias for guide operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when reading or loading the program guide
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// SQLite failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The database file does not exist (yet)
    #[error("Database not found: {0}")]
    DatabaseMissing(String),

    /// A blocking database task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Configuration error (from tvconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// The source is temporarily unavailable
    #[error("Program source unavailable: {0}")]
    Unavailable(String),
}
