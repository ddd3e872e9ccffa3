//! In-process document store. Each physical collection is a vector of
//! documents in insertion order behind its own lock.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::database::error::StoreError;
use crate::database::store::{Collection, Document, DocumentStore, Update};
use crate::filter::{Filter, FilterData};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Physical collection names created so far, sorted.
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Raw contents of a physical collection, bypassing any entity layer.
    pub async fn dump(&self, name: &str) -> Vec<Document> {
        match self.collections.read().await.get(name) {
            Some(collection) => collection.docs.read().await.clone(),
            None => vec![],
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError> {
        // Reuse table-name validation so both backends accept the same names
        Filter::new(name).map_err(|_| StoreError::InvalidCollection(name.to_string()))?;

        if let Some(existing) = self.collections.read().await.get(name) {
            return Ok(existing.clone());
        }
        let mut collections = self.collections.write().await;
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Created memory collection: {}", name);
                Arc::new(MemoryCollection::new(name))
            })
            .clone();
        Ok(collection)
    }
}

pub struct MemoryCollection {
    name: String,
    docs: RwLock<Vec<Document>>,
}

impl MemoryCollection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            docs: RwLock::new(Vec::new()),
        }
    }

    fn filter_for(&self, where_clause: Option<Value>) -> Result<Filter, StoreError> {
        let mut filter = Filter::new(&self.name)?;
        if let Some(where_clause) = where_clause {
            filter.where_clause(&where_clause)?;
        }
        Ok(filter)
    }

    fn id_of(doc: &Document) -> Result<String, StoreError> {
        doc.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidDocument("document is missing a string id".to_string()))
    }

    fn insert_locked(&self, docs: &mut Vec<Document>, doc: Document) -> Result<(), StoreError> {
        let id = Self::id_of(&doc)?;
        if docs.iter().any(|d| d.get("id").and_then(Value::as_str) == Some(id.as_str())) {
            return Err(StoreError::DuplicateId { collection: self.name.clone(), id });
        }
        docs.push(doc);
        Ok(())
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, doc: Document) -> Result<Document, StoreError> {
        let mut docs = self.docs.write().await;
        self.insert_locked(&mut docs, doc.clone())?;
        Ok(doc)
    }

    async fn insert_many(&self, new_docs: Vec<Document>) -> Result<Vec<Document>, StoreError> {
        let mut docs = self.docs.write().await;
        // All-or-nothing: stage into a copy first
        let mut staged = docs.clone();
        for doc in &new_docs {
            self.insert_locked(&mut staged, doc.clone())?;
        }
        *docs = staged;
        Ok(new_docs)
    }

    async fn find(&self, query: FilterData) -> Result<Vec<Document>, StoreError> {
        let mut filter = Filter::new(&self.name)?;
        filter.assign(query)?;
        let matched: Vec<Document> = self
            .docs
            .read()
            .await
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        Ok(filter.apply(matched))
    }

    async fn count(&self, where_clause: Option<Value>) -> Result<u64, StoreError> {
        let filter = self.filter_for(where_clause)?;
        let docs = self.docs.read().await;
        Ok(docs.iter().filter(|d| filter.matches(d)).count() as u64)
    }

    async fn update(&self, where_clause: Option<Value>, update: &Update, multi: bool) -> Result<u64, StoreError> {
        let filter = self.filter_for(where_clause)?;
        let mut docs = self.docs.write().await;
        let mut touched = 0;
        for doc in docs.iter_mut().filter(|d| filter.matches(d)) {
            update.apply_to(doc);
            touched += 1;
            if !multi {
                break;
            }
        }
        Ok(touched)
    }

    async fn delete(&self, where_clause: Option<Value>, multi: bool) -> Result<u64, StoreError> {
        let filter = self.filter_for(where_clause)?;
        let mut docs = self.docs.write().await;
        let before = docs.len();
        if multi {
            docs.retain(|d| !filter.matches(d));
        } else if let Some(pos) = docs.iter().position(|d| filter.matches(d)) {
            docs.remove(pos);
        }
        Ok((before - docs.len()) as u64)
    }
}
