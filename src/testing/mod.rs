use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::{ActingUser, RequestContext, TenantId};
use crate::database::{Document, MemoryStore};
use crate::entity::catalog::USER;
use crate::entity::EntityRegistry;
use crate::observer::implementations::Notifier;

/// School registry over an in-memory store, for tests and local tooling.
pub struct TestCampus {
    pub store: Arc<MemoryStore>,
    pub registry: EntityRegistry,
    pub notifier: Notifier,
}

impl TestCampus {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Notifier::new(64);
        let registry = EntityRegistry::school(store.clone(), notifier.clone());
        Self { store, registry, notifier }
    }

    /// Unique tenant id so parallel tests never share collections
    pub fn generate_tenant_name() -> String {
        format!("test_{}", Uuid::new_v4().simple())
    }

    pub fn tenant(&self, name: &str) -> anyhow::Result<RequestContext> {
        Ok(RequestContext::new(TenantId::new(name)?))
    }

    /// Creates a user with `roles` in the context's tenant.
    pub async fn seed_user(&self, ctx: &RequestContext, name: &str, roles: &[&str]) -> anyhow::Result<ActingUser> {
        let users = self.registry.repository(ctx, USER).await?;
        let user = users.create(json!({ "name": name, "roles": roles })).await?;
        let id = user
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("created user has no id"))?;
        Ok(ActingUser::new(Uuid::parse_str(id)?))
    }

    pub async fn seed(&self, ctx: &RequestContext, entity: &str, records: Vec<Value>) -> anyhow::Result<Vec<Document>> {
        let repository = self.registry.repository(ctx, entity).await?;
        Ok(repository.insert_many(records).await?)
    }

    /// Waits for lifecycle hooks spawned by earlier writes.
    pub async fn settle(&self) {
        self.registry.observers().drain().await;
    }
}

impl Default for TestCampus {
    fn default() -> Self {
        Self::new()
    }
}
