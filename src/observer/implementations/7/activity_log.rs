// Ring 7: Activity Log - records every entity write in the tenant's activity collection
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::config::CONFIG;
use crate::database::resolver::TargetResolver;
use crate::entity::catalog::ACTIVITY;
use crate::entity::EntitySchema;
use crate::observer::context::LifecycleEvent;
use crate::observer::error::ObserverError;
use crate::observer::traits::{AuditObserver, Observer, ObserverRing, Operation};

/// Writes an `Activity` document per write, through the same target
/// resolution as every other entity so it lands in the writer's tenant.
/// Inserts go straight to the collection and do not emit events of their own.
pub struct ActivityLogObserver {
    resolver: Arc<TargetResolver>,
    activity: Arc<EntitySchema>,
}

impl ActivityLogObserver {
    pub fn new(resolver: Arc<TargetResolver>, activity: Arc<EntitySchema>) -> Self {
        Self { resolver, activity }
    }
}

impl Observer for ActivityLogObserver {
    fn name(&self) -> &'static str {
        "ActivityLogObserver"
    }

    fn ring(&self) -> ObserverRing {
        ObserverRing::Audit
    }

    fn applies_to_operation(&self, _op: Operation) -> bool {
        true
    }

    fn applies_to_entity(&self, entity: &str) -> bool {
        entity != ACTIVITY
    }
}

#[async_trait]
impl AuditObserver for ActivityLogObserver {
    async fn execute(&self, event: &LifecycleEvent) -> Result<(), ObserverError> {
        let (target, collection) = self.resolver.resolve(&event.ctx, &self.activity).await?;

        let occurred_at = event.occurred_at.to_rfc3339();
        let actor = event.ctx.user().map(|u| u.id.to_string());
        let activity = json!({
            "id": Uuid::new_v4().to_string(),
            "operation": event.operation.as_str(),
            "entity": event.entity,
            "record_id": event.record_id,
            "affected": event.affected,
            "actor": actor,
            "request_id": event.ctx.request_id().to_string(),
            "created_at": occurred_at,
            "updated_at": occurred_at,
        });
        let serde_json::Value::Object(activity) = activity else {
            return Err(ObserverError::SystemError("activity document is not an object".to_string()));
        };
        collection.insert_one(activity).await?;

        if CONFIG.security.enable_audit_logging {
            tracing::info!(
                "Audit: {} {} {:?} by {:?} in {}",
                event.operation.as_str(), event.entity, event.record_id, actor, target
            );
        }
        Ok(())
    }
}
