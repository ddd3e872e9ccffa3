//! Generic "advanced query": structured filter, pagination, sort, projection,
//! relation expansion and ownership flags, reusable by every entity type.

pub mod descriptor;
pub mod engine;
pub mod populate;
pub mod structured;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::error::DatabaseError;
use crate::database::store::Document;

pub use descriptor::{Populate, PopulateSpec, QueryDescriptor, RawFilter};
pub use engine::QueryEngine;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Malformed filter: {0}")]
    MalformedFilter(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub results: Vec<Document>,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub total_results: u64,
}

impl Page {
    pub fn new(results: Vec<Document>, page: u32, limit: u32, total_results: u64) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total_results.div_ceil(u64::from(limit))
        };
        Self {
            results,
            page,
            limit,
            total_pages,
            total_results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(Page::new(vec![], 1, 10, 25).total_pages, 3);
        assert_eq!(Page::new(vec![], 1, 10, 20).total_pages, 2);
        assert_eq!(Page::new(vec![], 1, 10, 0).total_pages, 0);
    }

    #[test]
    fn serializes_with_camel_case_totals() {
        let page = Page::new(vec![], 2, 10, 25);
        assert_eq!(
            serde_json::to_value(&page).unwrap(),
            json!({ "results": [], "page": 2, "limit": 10, "totalPages": 3, "totalResults": 25 })
        );
    }
}
