//! The document-store seam. A [`DocumentStore`] hands out [`Collection`]
//! handles by physical name; every entity-type verb ends up as one of the
//! primitive calls below.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::database::aggregate;
use crate::database::error::StoreError;
use crate::filter::FilterData;

pub type Document = Map<String, Value>;

/// Field updates: `$set` merges, `$unset` removes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Document,
    pub unset: Vec<String>,
}

impl Update {
    pub fn set(fields: Document) -> Self {
        Self { set: fields, unset: vec![] }
    }

    /// Accepts `{ "$set": {...}, "$unset": [...] }` or a plain object of
    /// fields to set.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        let Value::Object(mut obj) = value else {
            return Err(StoreError::InvalidDocument("update must be an object".to_string()));
        };
        if !obj.keys().any(|k| k.starts_with('$')) {
            return Ok(Self::set(obj));
        }

        let set = match obj.remove("$set") {
            Some(Value::Object(fields)) => fields,
            None => Document::new(),
            Some(_) => return Err(StoreError::InvalidDocument("$set must be an object".to_string())),
        };
        let unset = match obj.remove("$unset") {
            Some(Value::Array(fields)) => fields
                .into_iter()
                .filter_map(|f| f.as_str().map(str::to_string))
                .collect(),
            Some(Value::Object(fields)) => fields.into_iter().map(|(k, _)| k).collect(),
            None => vec![],
            Some(_) => return Err(StoreError::InvalidDocument("$unset must be a list".to_string())),
        };
        if let Some(op) = obj.keys().next() {
            return Err(StoreError::InvalidDocument(format!("unsupported update operator {}", op)));
        }
        Ok(Self { set, unset })
    }

    pub fn apply_to(&self, doc: &mut Document) {
        for (key, value) in &self.set {
            doc.insert(key.clone(), value.clone());
        }
        for key in &self.unset {
            doc.remove(key);
        }
    }
}

/// One physical collection.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn insert_one(&self, doc: Document) -> Result<Document, StoreError>;

    async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Document>, StoreError>;

    async fn find(&self, query: FilterData) -> Result<Vec<Document>, StoreError>;

    async fn count(&self, where_clause: Option<Value>) -> Result<u64, StoreError>;

    /// Updates the first (or every, with `multi`) match; returns documents touched.
    async fn update(&self, where_clause: Option<Value>, update: &Update, multi: bool) -> Result<u64, StoreError>;

    async fn delete(&self, where_clause: Option<Value>, multi: bool) -> Result<u64, StoreError>;

    /// A leading `$match` stage is pushed down to [`Collection::find`]; the
    /// remaining stages run in-process.
    async fn aggregate(&self, pipeline: Vec<Value>) -> Result<Vec<Document>, StoreError> {
        let (initial, rest) = aggregate::split_leading_match(pipeline)?;
        let docs = self.find(FilterData { where_clause: initial, ..Default::default() }).await?;
        aggregate::run(docs, &rest)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Opens (creating if needed) the collection with this physical name.
    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError>;
}
