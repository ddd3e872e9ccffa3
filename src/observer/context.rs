use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::context::RequestContext;
use crate::database::store::Document;
use crate::observer::traits::Operation;

/// What a successful write tells its observers. Carries its own copy of the
/// request context so observers run under the originating tenant and user.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub operation: Operation,
    pub entity: String,
    /// Physical collection that was written
    pub target: String,
    pub record_id: Option<String>,
    pub record: Option<Document>,
    /// Records touched; bulk writes carry no single record
    pub affected: u64,
    pub ctx: RequestContext,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        operation: Operation,
        entity: &str,
        target: &str,
        record: Option<Document>,
        affected: u64,
        ctx: RequestContext,
    ) -> Self {
        let record_id = record
            .as_ref()
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            operation,
            entity: entity.to_string(),
            target: target.to_string(),
            record_id,
            record,
            affected,
            ctx,
            occurred_at: Utc::now(),
        }
    }

    /// Field of the written record, if the event carries one.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.record.as_ref().and_then(|r| r.get(name))
    }
}
