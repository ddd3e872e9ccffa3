//! Storage target resolution: maps (tenant, entity type) to the physical
//! collection name and hands out cached collection handles.
//!
//! Naming is a persisted contract: `{tenant}_{base}` when a tenant is bound,
//! `{base}` otherwise, where `base` is the entity's explicit override or its
//! lower-cased, pluralized name. Changing any of this is a data migration.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::context::RequestContext;
use crate::database::error::StoreError;
use crate::database::store::{Collection, DocumentStore};
use crate::entity::EntitySchema;

/// Lower-cases and pluralizes an entity name:
/// consonant + `y` becomes `ies`, otherwise `s` is appended unless the name
/// already ends in `s`.
pub fn pluralize(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut chars = lower.chars().rev();
    match (chars.next(), chars.next()) {
        (Some('y'), Some(before)) if !is_vowel(before) => {
            format!("{}ies", &lower[..lower.len() - 1])
        }
        (Some('s'), _) => lower,
        _ => format!("{}s", lower),
    }
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

pub fn base_name(schema: &EntitySchema) -> String {
    match schema.collection_override() {
        Some(name) => name.to_string(),
        None => pluralize(schema.name()),
    }
}

pub fn physical_target(ctx: &RequestContext, schema: &EntitySchema) -> String {
    let base = base_name(schema);
    match ctx.tenant() {
        Some(tenant) => format!("{}_{}", tenant, base),
        None => base,
    }
}

/// Process-wide handle cache in front of a [`DocumentStore`].
pub struct TargetResolver {
    store: Arc<dyn DocumentStore>,
    handles: RwLock<HashMap<String, Arc<dyn Collection>>>,
}

impl TargetResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves the physical target for `schema` under `ctx` and returns its
    /// handle together with the name.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        schema: &EntitySchema,
    ) -> Result<(String, Arc<dyn Collection>), StoreError> {
        let target = physical_target(ctx, schema);
        let handle = self.handle(&target).await?;
        Ok((target, handle))
    }

    /// Get existing handle or open one lazily.
    pub async fn handle(&self, target: &str) -> Result<Arc<dyn Collection>, StoreError> {
        // Fast path: try read lock
        {
            let handles = self.handles.read().await;
            if let Some(handle) = handles.get(target) {
                return Ok(handle.clone());
            }
        }

        let opened = self.store.collection(target).await?;

        // Concurrent first access: whoever inserts first wins, later openers
        // adopt the cached handle so every caller shares one.
        let mut handles = self.handles.write().await;
        let handle = handles
            .entry(target.to_string())
            .or_insert_with(|| {
                info!("Opened collection handle for: {}", target);
                opened
            })
            .clone();
        Ok(handle)
    }

    pub async fn cached_targets(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn evict(&self, target: &str) -> bool {
        self.handles.write().await.remove(target).is_some()
    }

    pub async fn clear(&self) {
        let mut handles = self.handles.write().await;
        for (name, _) in handles.drain() {
            info!("Dropped collection handle: {}", name);
        }
    }
}
