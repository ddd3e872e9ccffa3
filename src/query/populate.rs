//! Relation expansion: replaces reference ids with the referenced records,
//! recursively for structured specs.

use std::collections::HashMap;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use super::descriptor::{Populate, PopulateSpec};
use crate::context::RequestContext;
use crate::database::error::DatabaseError;
use crate::database::store::Document;
use crate::entity::{EntityRegistry, EntitySchema};
use crate::filter::FilterData;

/// One resolvable populate path.
struct Plan<'s> {
    spec: &'s PopulateSpec,
    model: String,
    ids: Vec<String>,
}

/// Expands `populate` on `records` of `schema`. Paths that name no reference
/// or an unregistered model are skipped. Nested specs stop at `max_depth`.
pub fn expand<'a>(
    registry: &'a EntityRegistry,
    ctx: &'a RequestContext,
    schema: &'a EntitySchema,
    records: &'a mut [Document],
    populate: &'a Populate,
    depth: u32,
    max_depth: u32,
) -> BoxFuture<'a, Result<(), DatabaseError>> {
    async move {
        if depth >= max_depth {
            debug!("Populate depth {} reached on {}; not expanding further", depth, schema.name());
            return Ok(());
        }

        let specs = populate.specs();
        let current: &[Document] = records;
        let plans: Vec<Plan> = specs
            .iter()
            .filter_map(|spec| plan_for(registry, schema, current, spec))
            .collect();

        let fetches = plans.iter().map(|plan| fetch(registry, ctx, plan, depth, max_depth));
        let fetched = join_all(fetches).await;

        for (plan, related) in plans.iter().zip(fetched) {
            let related = related?;
            for record in records.iter_mut() {
                replace_references(record, &plan.spec.path, &related);
            }
        }
        Ok(())
    }
    .boxed()
}

fn plan_for<'s>(
    registry: &EntityRegistry,
    schema: &EntitySchema,
    records: &[Document],
    spec: &'s PopulateSpec,
) -> Option<Plan<'s>> {
    let model = match spec.model.as_deref().or_else(|| schema.reference_target(&spec.path)) {
        Some(model) => model.to_string(),
        None => {
            debug!("Skipping populate of {}.{}: not a reference", schema.name(), spec.path);
            return None;
        }
    };
    if registry.schema(&model).is_err() {
        debug!("Skipping populate of {}.{}: unknown model {}", schema.name(), spec.path, model);
        return None;
    }

    let mut ids: Vec<String> = records
        .iter()
        .filter_map(|record| record.get(&spec.path))
        .flat_map(|value| match value {
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect::<Vec<_>>(),
            Value::String(id) => vec![id.as_str()],
            _ => vec![],
        })
        .filter(|id| Uuid::parse_str(id).is_ok())
        .map(str::to_string)
        .collect();
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return None;
    }
    Some(Plan { spec, model, ids })
}

async fn fetch(
    registry: &EntityRegistry,
    ctx: &RequestContext,
    plan: &Plan<'_>,
    depth: u32,
    max_depth: u32,
) -> Result<HashMap<String, Document>, DatabaseError> {
    let repository = registry.repository(ctx, &plan.model).await?;
    let query = FilterData {
        select: plan.spec.select.clone(),
        where_clause: Some(json!({ "id": { "$in": plan.ids } })),
        ..Default::default()
    };
    let mut related = repository.find_many(query).await?;

    if let Some(nested) = &plan.spec.populate {
        expand(registry, ctx, repository.schema(), &mut related, nested, depth + 1, max_depth).await?;
    }

    Ok(related
        .into_iter()
        .filter_map(|doc| {
            let id = doc.get("id").and_then(Value::as_str)?.to_string();
            Some((id, doc))
        })
        .collect())
}

/// Single references become the record (or null when missing); arrays keep
/// only the references that resolved.
fn replace_references(record: &mut Document, path: &str, related: &HashMap<String, Document>) {
    let Some(value) = record.get_mut(path) else {
        return;
    };
    match value {
        Value::String(id) => {
            let replacement = match related.get(id.as_str()) {
                Some(doc) => Value::Object(doc.clone()),
                None => Value::Null,
            };
            *value = replacement;
        }
        Value::Array(items) => {
            let expanded: Vec<Value> = items
                .iter()
                .filter_map(|item| item.as_str().and_then(|id| related.get(id)))
                .map(|doc| Value::Object(doc.clone()))
                .collect();
            *items = expanded;
        }
        _ => {}
    }
}
