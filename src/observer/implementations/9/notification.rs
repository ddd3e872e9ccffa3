// Ring 9: Notification - publishes write notifications to in-process subscribers
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::observer::context::LifecycleEvent;
use crate::observer::error::ObserverError;
use crate::observer::traits::{NotificationObserver as NotificationRing, Observer, ObserverRing, Operation};

/// Message delivered to notification subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub tenant: Option<String>,
    pub entity: String,
    pub operation: Operation,
    pub record_id: Option<String>,
    pub actor: Option<Uuid>,
    pub title: Option<String>,
}

/// Broadcast channel that delivery services (email, push) subscribe to.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<NotificationMessage>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationMessage> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers received the message.
    pub fn publish(&self, message: NotificationMessage) -> usize {
        match self.sender.send(message) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::debug!("No notification subscribers");
                0
            }
        }
    }
}

pub struct NotificationObserver {
    notifier: Notifier,
    entities: Vec<String>,
}

impl NotificationObserver {
    pub fn new(notifier: Notifier, entities: Vec<String>) -> Self {
        Self { notifier, entities }
    }
}

impl Observer for NotificationObserver {
    fn name(&self) -> &'static str {
        "NotificationObserver"
    }

    fn ring(&self) -> ObserverRing {
        ObserverRing::Notification
    }

    fn applies_to_operation(&self, op: Operation) -> bool {
        matches!(op, Operation::Create | Operation::Update)
    }

    fn applies_to_entity(&self, entity: &str) -> bool {
        self.entities.iter().any(|e| e == entity)
    }
}

#[async_trait]
impl NotificationRing for NotificationObserver {
    async fn execute(&self, event: &LifecycleEvent) -> Result<(), ObserverError> {
        let title = event
            .field("title")
            .or_else(|| event.field("name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let message = NotificationMessage {
            tenant: event.ctx.tenant().map(|t| t.to_string()),
            entity: event.entity.clone(),
            operation: event.operation,
            record_id: event.record_id.clone(),
            actor: event.ctx.user().map(|u| u.id),
            title,
        };
        let delivered = self.notifier.publish(message);
        tracing::debug!("Notification for {} delivered to {} subscribers", event.entity, delivered);
        Ok(())
    }
}
