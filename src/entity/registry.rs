use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::catalog::{self, ACTIVITY, USER};
use super::EntitySchema;
use crate::context::RequestContext;
use crate::database::error::DatabaseError;
use crate::database::repository::EntityRepository;
use crate::database::resolver::TargetResolver;
use crate::database::store::DocumentStore;
use crate::observer::implementations::{default_pipeline, Notifier};
use crate::observer::ObserverPipeline;
use crate::ownership::{RoleDirectory, UserDirectory};

/// Registered entity types plus the shared resolver and hook pipeline.
/// Repositories are only ever built here, so every entity operation goes
/// through target resolution.
pub struct EntityRegistry {
    schemas: HashMap<String, Arc<EntitySchema>>,
    resolver: Arc<TargetResolver>,
    observers: Arc<ObserverPipeline>,
}

impl EntityRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            schemas: HashMap::new(),
            resolver: Arc::new(TargetResolver::new(store)),
            observers: Arc::new(ObserverPipeline::new()),
        }
    }

    /// Registry with the school catalog and the default hooks installed.
    pub fn school(store: Arc<dyn DocumentStore>, notifier: Notifier) -> Self {
        let mut registry = Self::new(store);
        for schema in catalog::school_entities() {
            registry.register(schema);
        }
        if let Some(activity) = registry.schemas.get(ACTIVITY).cloned() {
            let pipeline = default_pipeline(registry.resolver.clone(), activity, notifier);
            registry.set_observers(pipeline);
        }
        registry
    }

    pub fn set_observers(&mut self, pipeline: ObserverPipeline) {
        self.observers = Arc::new(pipeline);
    }

    pub fn observers(&self) -> &Arc<ObserverPipeline> {
        &self.observers
    }

    /// Installs `schema`. Registering a name twice is a no-op; returns whether
    /// the schema was newly added.
    pub fn register(&mut self, schema: EntitySchema) -> bool {
        if self.schemas.contains_key(schema.name()) {
            debug!("Entity type {} already registered", schema.name());
            return false;
        }
        info!("Registered entity type: {}", schema.name());
        self.schemas.insert(schema.name().to_string(), Arc::new(schema));
        true
    }

    pub fn schema(&self, name: &str) -> Result<&Arc<EntitySchema>, DatabaseError> {
        self.schemas
            .get(name)
            .ok_or_else(|| DatabaseError::UnknownEntity(name.to_string()))
    }

    /// Registered schemas sorted by name.
    pub fn schemas(&self) -> Vec<&Arc<EntitySchema>> {
        let mut schemas: Vec<_> = self.schemas.values().collect();
        schemas.sort_by(|a, b| a.name().cmp(b.name()));
        schemas
    }

    pub fn resolver(&self) -> &Arc<TargetResolver> {
        &self.resolver
    }

    /// Repository for entity type `name`, bound to the physical target of
    /// `ctx`'s tenant. Ownership-enabled types get a role directory over the
    /// same tenant's users.
    pub async fn repository(&self, ctx: &RequestContext, name: &str) -> Result<EntityRepository, DatabaseError> {
        let repository = self.bare_repository(ctx, name).await?;
        if !repository.schema().has_ownership() {
            return Ok(repository);
        }
        match self.user_directory(ctx).await? {
            Some(directory) => Ok(repository.with_directory(directory)),
            None => Ok(repository),
        }
    }

    pub async fn user_directory(&self, ctx: &RequestContext) -> Result<Option<Arc<dyn RoleDirectory>>, DatabaseError> {
        if !self.schemas.contains_key(USER) {
            return Ok(None);
        }
        let users = self.bare_repository(ctx, USER).await?;
        Ok(Some(Arc::new(UserDirectory::new(users))))
    }

    async fn bare_repository(&self, ctx: &RequestContext, name: &str) -> Result<EntityRepository, DatabaseError> {
        let schema = self.schema(name)?.clone();
        let (target, collection) = self.resolver.resolve(ctx, &schema).await?;
        Ok(EntityRepository::new(schema, target, collection, ctx.clone(), self.observers.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TenantId;
    use crate::database::memory::MemoryStore;
    use serde_json::json;

    #[test]
    fn registering_twice_is_registering_once() {
        let mut registry = EntityRegistry::new(Arc::new(MemoryStore::new()));
        assert!(registry.register(EntitySchema::new("Post").with_ownership()));
        assert!(!registry.register(EntitySchema::new("Post")));
        assert_eq!(registry.schemas().len(), 1);
        // First registration wins
        assert!(registry.schema("Post").unwrap().has_ownership());
    }

    #[tokio::test]
    async fn repository_targets_are_prefixed_once() {
        let mut registry = EntityRegistry::new(Arc::new(MemoryStore::new()));
        registry.register(EntitySchema::new("Post"));
        registry.register(EntitySchema::new("Post"));

        let ctx = RequestContext::new(TenantId::new("school-a").unwrap());
        let first = registry.repository(&ctx, "Post").await.unwrap();
        let second = registry.repository(&ctx, "Post").await.unwrap();
        assert_eq!(first.target(), "school-a_posts");
        assert_eq!(second.target(), "school-a_posts");
    }

    #[tokio::test]
    async fn unknown_entity_is_an_error() {
        let registry = EntityRegistry::new(Arc::new(MemoryStore::new()));
        let err = registry.repository(&RequestContext::untenanted(), "Nope").await.err().unwrap();
        assert!(matches!(err, DatabaseError::UnknownEntity(name) if name == "Nope"));
    }

    #[tokio::test]
    async fn school_registry_attaches_directory_to_owned_types() {
        let registry = EntityRegistry::school(Arc::new(MemoryStore::new()), Notifier::new(8));
        assert_eq!(registry.observers().observer_count(), 2);
        let ctx = RequestContext::new(TenantId::new("t1").unwrap());

        let posts = registry.repository(&ctx, "Post").await.unwrap();
        assert!(posts.directory().is_some());
        let branches = registry.repository(&ctx, "Branch").await.unwrap();
        assert!(branches.directory().is_none());

        let users = registry.repository(&ctx, USER).await.unwrap();
        let admin = users.create(json!({ "name": "A", "roles": ["admin"] })).await.unwrap();
        let id = uuid::Uuid::parse_str(admin["id"].as_str().unwrap()).unwrap();
        let roles = posts.directory().unwrap().roles_of(id).await.unwrap();
        assert_eq!(roles, Some(vec!["admin".to_string()]));
    }
}
