use mantion_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("Artifact path is not valid UTF-8: {0}")]
    NonUtf8Path(String),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        CoreError::Persistence(err.to_string())
    }
}
