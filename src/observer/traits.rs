use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CONFIG;
use crate::observer::context::LifecycleEvent;
use crate::observer::error::ObserverError;

/// Observer rings run after a successful write. All are asynchronous; ring
/// numbers continue the pre-write rings handled by the repository itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ObserverRing {
    Audit = 7,        // Activity logging, compliance trail
    Notification = 9, // User-facing notifications
}

impl ObserverRing {
    pub fn all() -> [ObserverRing; 2] {
        [ObserverRing::Audit, ObserverRing::Notification]
    }
}

/// Write operations that emit lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Base trait for all observers with metadata and applicability checks
pub trait Observer: Send + Sync {
    /// Observer name for logging and debugging
    fn name(&self) -> &'static str;

    fn ring(&self) -> ObserverRing;

    fn applies_to_operation(&self, op: Operation) -> bool;

    /// Check if observer applies to this entity type
    fn applies_to_entity(&self, entity: &str) -> bool;

    /// Execution timeout, `hooks.timeout_ms` unless overridden
    fn timeout(&self) -> Duration {
        Duration::from_millis(CONFIG.hooks.timeout_ms)
    }

    /// Priority within ring (lower numbers execute first)
    fn priority(&self) -> u8 {
        50
    }
}

/// Ring 7: Audit
#[async_trait]
pub trait AuditObserver: Observer {
    async fn execute(&self, event: &LifecycleEvent) -> Result<(), ObserverError>;
}

/// Ring 9: Notification
#[async_trait]
pub trait NotificationObserver: Observer {
    async fn execute(&self, event: &LifecycleEvent) -> Result<(), ObserverError>;
}

/// Observers are shared with the tasks they run on, hence `Arc`.
#[derive(Clone)]
pub enum ObserverBox {
    Audit(Arc<dyn AuditObserver>),
    Notification(Arc<dyn NotificationObserver>),
}

impl ObserverBox {
    pub fn name(&self) -> &'static str {
        match self {
            ObserverBox::Audit(o) => o.name(),
            ObserverBox::Notification(o) => o.name(),
        }
    }

    pub fn ring(&self) -> ObserverRing {
        match self {
            ObserverBox::Audit(o) => o.ring(),
            ObserverBox::Notification(o) => o.ring(),
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            ObserverBox::Audit(o) => o.priority(),
            ObserverBox::Notification(o) => o.priority(),
        }
    }

    pub fn applies_to(&self, event: &LifecycleEvent) -> bool {
        let (op, entity) = (event.operation, event.entity.as_str());
        match self {
            ObserverBox::Audit(o) => o.applies_to_operation(op) && o.applies_to_entity(entity),
            ObserverBox::Notification(o) => o.applies_to_operation(op) && o.applies_to_entity(entity),
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            ObserverBox::Audit(o) => o.timeout(),
            ObserverBox::Notification(o) => o.timeout(),
        }
    }

    pub async fn execute(&self, event: &LifecycleEvent) -> Result<(), ObserverError> {
        match self {
            ObserverBox::Audit(o) => o.execute(event).await,
            ObserverBox::Notification(o) => o.execute(event).await,
        }
    }
}
