use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::database::error::{DatabaseError, StoreError};
use crate::database::store::{Collection, Document, Update};
use crate::entity::{EntitySchema, CREATED_BY};
use crate::filter::FilterData;
use crate::observer::{LifecycleEvent, ObserverPipeline, Operation};
use crate::ownership::{OwnershipResolver, RoleDirectory};

/// Fields only the repository may write.
const SYSTEM_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

/// Data access for one entity type, bound at construction to the physical
/// collection of the request's tenant. Obtained from
/// [`EntityRegistry::repository`](crate::entity::EntityRegistry::repository).
#[derive(Clone)]
pub struct EntityRepository {
    schema: Arc<EntitySchema>,
    target: String,
    collection: Arc<dyn Collection>,
    ctx: RequestContext,
    observers: Arc<ObserverPipeline>,
    directory: Option<Arc<dyn RoleDirectory>>,
}

impl EntityRepository {
    pub(crate) fn new(
        schema: Arc<EntitySchema>,
        target: String,
        collection: Arc<dyn Collection>,
        ctx: RequestContext,
        observers: Arc<ObserverPipeline>,
    ) -> Self {
        Self {
            schema,
            target,
            collection,
            ctx,
            observers,
            directory: None,
        }
    }

    pub(crate) fn with_directory(mut self, directory: Arc<dyn RoleDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Physical collection this repository operates on.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn directory(&self) -> Option<&dyn RoleDirectory> {
        self.directory.as_deref()
    }

    pub async fn create(&self, input: Value) -> Result<Document, DatabaseError> {
        let doc = self.prepare_new(input)?;
        let created = self.collection.insert_one(doc).await?;
        debug!("Created {} in {}", self.schema.name(), self.target);
        self.emit(Operation::Create, Some(&created), 1);
        Ok(created)
    }

    pub async fn insert_many(&self, inputs: Vec<Value>) -> Result<Vec<Document>, DatabaseError> {
        let docs = inputs
            .into_iter()
            .map(|input| self.prepare_new(input))
            .collect::<Result<Vec<_>, _>>()?;
        let created = self.collection.insert_many(docs).await?;
        info!("Inserted {} {} records into {}", created.len(), self.schema.name(), self.target);
        for doc in &created {
            self.emit(Operation::Create, Some(doc), 1);
        }
        Ok(created)
    }

    pub async fn find_many(&self, query: FilterData) -> Result<Vec<Document>, DatabaseError> {
        Ok(self.collection.find(query).await?)
    }

    pub async fn find_one(&self, where_clause: Value) -> Result<Option<Document>, DatabaseError> {
        let query = FilterData {
            where_clause: Some(where_clause),
            limit: Some(1),
            ..Default::default()
        };
        Ok(self.collection.find(query).await?.into_iter().next())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Document>, DatabaseError> {
        let id = parse_id("id", id)?;
        self.find_one(json!({ "id": id.to_string() })).await
    }

    pub async fn count(&self, where_clause: Option<Value>) -> Result<u64, DatabaseError> {
        Ok(self.collection.count(where_clause).await?)
    }

    pub async fn aggregate(&self, pipeline: Vec<Value>) -> Result<Vec<Document>, DatabaseError> {
        Ok(self.collection.aggregate(pipeline).await?)
    }

    pub async fn update_one(&self, where_clause: Value, update: Value) -> Result<u64, DatabaseError> {
        self.update(where_clause, update, false).await
    }

    pub async fn update_many(&self, where_clause: Value, update: Value) -> Result<u64, DatabaseError> {
        self.update(where_clause, update, true).await
    }

    /// Updates one record by id after checking that the acting user of this
    /// repository's context may edit it.
    pub async fn update_by_id(&self, id: &str, update: Value) -> Result<Document, DatabaseError> {
        let existing = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{} {}", self.schema.name(), id)))?;
        if self.schema.has_ownership() {
            let mut ownership = OwnershipResolver::new(self.directory());
            self.authorize(&mut ownership, &existing).await?;
        }

        let where_clause = json!({ "id": id });
        let touched = self.collection.update(Some(where_clause), &self.prepare_update(update)?, false).await?;
        let updated = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{} {}", self.schema.name(), id)))?;
        self.emit(Operation::Update, Some(&updated), touched);
        Ok(updated)
    }

    pub async fn delete_one(&self, where_clause: Value) -> Result<u64, DatabaseError> {
        self.delete(where_clause, false).await
    }

    pub async fn delete_many(&self, where_clause: Value) -> Result<u64, DatabaseError> {
        self.delete(where_clause, true).await
    }

    /// On owned entity types every record the clause matches must be
    /// editable by the acting user, or nothing is written.
    async fn update(&self, where_clause: Value, update: Value, multi: bool) -> Result<u64, DatabaseError> {
        let update = self.prepare_update(update)?;
        if self.schema.has_ownership() {
            let query = FilterData {
                where_clause: Some(where_clause.clone()),
                ..Default::default()
            };
            let mut ownership = OwnershipResolver::new(self.directory());
            for existing in self.collection.find(query).await? {
                self.authorize(&mut ownership, &existing).await?;
            }
        }
        let touched = self.collection.update(Some(where_clause), &update, multi).await?;
        if touched > 0 {
            self.emit(Operation::Update, None, touched);
        }
        Ok(touched)
    }

    async fn delete(&self, where_clause: Value, multi: bool) -> Result<u64, DatabaseError> {
        let removed = self.collection.delete(Some(where_clause), multi).await?;
        if removed > 0 {
            self.emit(Operation::Delete, None, removed);
        }
        Ok(removed)
    }

    async fn authorize(&self, ownership: &mut OwnershipResolver<'_>, record: &Document) -> Result<(), DatabaseError> {
        let actor = self.ctx.user();
        if ownership.can_edit(record, actor).await? {
            return Ok(());
        }
        let id = record.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        match actor {
            Some(actor) => info!("Denied update of {} {} by {}", self.schema.name(), id, actor.id),
            None => info!("Denied anonymous update of {} {}", self.schema.name(), id),
        }
        Err(DatabaseError::Forbidden {
            entity: self.schema.name().to_string(),
            id,
        })
    }

    /// Stamps `id`, timestamps and, for owned entity types, `created_by`.
    fn prepare_new(&self, input: Value) -> Result<Document, DatabaseError> {
        let Value::Object(mut doc) = input else {
            return Err(StoreError::InvalidDocument("record must be a JSON object".to_string()).into());
        };

        let id = match doc.get("id") {
            Some(Value::String(raw)) => parse_id("id", raw)?,
            Some(other) => {
                return Err(DatabaseError::InvalidId { field: "id".to_string(), value: other.to_string() })
            }
            None => Uuid::new_v4(),
        };
        let now = Utc::now().to_rfc3339();
        doc.insert("id".to_string(), json!(id.to_string()));
        doc.insert("created_at".to_string(), json!(now));
        doc.insert("updated_at".to_string(), json!(now));

        if self.schema.has_ownership() && !doc.contains_key(CREATED_BY) {
            if let Some(actor) = self.ctx.user() {
                doc.insert(CREATED_BY.to_string(), json!(actor.id.to_string()));
            }
        }
        Ok(doc)
    }

    fn prepare_update(&self, update: Value) -> Result<Update, DatabaseError> {
        let mut update = Update::from_value(update)?;
        for field in SYSTEM_FIELDS {
            update.set.remove(*field);
        }
        update.unset.retain(|f| !SYSTEM_FIELDS.contains(&f.as_str()));
        update.set.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
        Ok(update)
    }

    fn emit(&self, operation: Operation, record: Option<&Document>, affected: u64) {
        let event = LifecycleEvent::new(
            operation,
            self.schema.name(),
            &self.target,
            record.cloned(),
            affected,
            self.ctx.clone(),
        );
        self.observers.dispatch(event);
    }
}

/// Identifiers are UUIDs; anything else is rejected before reaching the store.
pub fn parse_id(field: &str, raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|_| DatabaseError::InvalidId {
        field: field.to_string(),
        value: raw.to_string(),
    })
}
