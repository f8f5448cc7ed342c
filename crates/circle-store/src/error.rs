use circle_shared::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No platform data directory could be resolved for the default database.
    #[error("Could not determine application data directory")]
    NoDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record not found")]
    NotFound,

    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored column held a value outside its domain.
    #[error("Corrupt value: {0}")]
    Corrupt(String),

    /// The blocking worker running a query panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Callers of the storage bridges only see the bridge error taxonomy.
impl From<StoreError> for BridgeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt(msg) => BridgeError::Serialization(msg),
            other => BridgeError::Storage(other.to_string()),
        }
    }
}
