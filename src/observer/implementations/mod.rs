// Observer implementations organized by rings

// Ring 7: Audit
#[path = "7/activity_log.rs"]
pub mod activity_log;

// Ring 9: Notification
#[path = "9/notification.rs"]
pub mod notification;

pub use activity_log::*;
pub use notification::*;

use std::sync::Arc;

use crate::config::CONFIG;
use crate::database::resolver::TargetResolver;
use crate::entity::EntitySchema;
use crate::observer::pipeline::ObserverPipeline;
use crate::observer::traits::ObserverBox;

/// Pipeline with the built-in hooks: activity logging for every write and
/// notifications for the entity types listed in `hooks.notify_entities`.
pub fn default_pipeline(
    resolver: Arc<TargetResolver>,
    activity: Arc<EntitySchema>,
    notifier: Notifier,
) -> ObserverPipeline {
    let mut pipeline = ObserverPipeline::new();
    register_default_observers(&mut pipeline, resolver, activity, notifier);
    pipeline
}

pub fn register_default_observers(
    pipeline: &mut ObserverPipeline,
    resolver: Arc<TargetResolver>,
    activity: Arc<EntitySchema>,
    notifier: Notifier,
) {
    pipeline.register_observer(ObserverBox::Audit(Arc::new(ActivityLogObserver::new(resolver, activity))));
    pipeline.register_observer(ObserverBox::Notification(Arc::new(NotificationObserver::new(
        notifier,
        CONFIG.hooks.notify_entities.clone(),
    ))));
}
