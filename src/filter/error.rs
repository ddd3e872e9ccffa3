use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid collection name: {0}")]
    InvalidTableName(String),

    #[error("Invalid field name: {0}")]
    InvalidColumn(String),

    #[error("Invalid WHERE clause: {0}")]
    InvalidWhereClause(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid operator data: {0}")]
    InvalidOperatorData(String),

    #[error("Nesting depth {0} exceeds maximum")]
    TooDeep(usize),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}
