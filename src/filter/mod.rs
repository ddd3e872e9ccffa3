pub mod types;
pub mod filter;
pub mod filter_where;
pub mod filter_order;
pub mod error;
pub mod matching;

pub use types::*;
pub use error::FilterError;
pub use filter::{Filter, validate_field_name};
