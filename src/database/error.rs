use thiserror::Error;

use crate::filter::FilterError;

/// Failures raised by a store backend. Propagated to callers unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Duplicate id {id} in {collection}")]
    DuplicateId { collection: String, id: String },

    #[error("Invalid aggregation stage: {0}")]
    InvalidPipeline(String),

    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Errors surfaced by entity repositories and the query engine.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not allowed to edit {entity} {id}")]
    Forbidden { entity: String, id: String },

    #[error("Invalid identifier for '{field}': {value}")]
    InvalidId { field: String, value: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<FilterError> for DatabaseError {
    fn from(error: FilterError) -> Self {
        DatabaseError::Store(StoreError::Filter(error))
    }
}
