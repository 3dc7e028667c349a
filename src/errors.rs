use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// The SQL runner exited non-zero (or could not be started) for a query.
    #[error("Query `{query}` failed for {database}.{table}: {reason}")]
    QueryExecution {
        database: String,
        table: String,
        query: String,
        reason: String,
    },

    /// Raised once a dump batch has fully drained and at least one table failed.
    #[error("Failed to take database backup for table(s): {}", .tables.join(", "))]
    DumpProcess { tables: Vec<String> },

    #[error("Blob transfer failed: {0}")]
    BlobTransfer(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
