use thiserror::Error;

use crate::database::error::{DatabaseError, StoreError};

/// Observer failures. Logged by the pipeline, never returned to the writer.
#[derive(Debug, Error, Clone)]
pub enum ObserverError {
    #[error("System error: {0}")]
    SystemError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<StoreError> for ObserverError {
    fn from(error: StoreError) -> Self {
        ObserverError::DatabaseError(error.to_string())
    }
}

impl From<DatabaseError> for ObserverError {
    fn from(error: DatabaseError) -> Self {
        ObserverError::DatabaseError(error.to_string())
    }
}
