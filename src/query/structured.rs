//! Turns the caller's structured filter into the shared filter language.
//!
//! Each filter object becomes one conjunction: arrays match any listed value,
//! identifier fields match exactly, other strings match as case-insensitive
//! substrings. All entries and the overrides are ANDed together.

use serde_json::{json, Map, Value};
use tracing::warn;
use uuid::Uuid;

use super::descriptor::RawFilter;
use super::QueryError;
use crate::database::store::Document;
use crate::entity::EntitySchema;
use crate::filter::matching::escape_like;
use crate::filter::validate_field_name;

/// Final where-clause: `{"$and": [overrides, entry...]}`. A malformed caller
/// filter is logged and dropped, leaving only the overrides.
pub fn build_filter(schema: &EntitySchema, raw: Option<&RawFilter>, overrides: &Document) -> Value {
    let mut clauses = vec![Value::Object(overrides.clone())];
    match parse_entries(schema, raw) {
        Ok(entries) => clauses.extend(entries),
        Err(e) => warn!("Ignoring filter for {}: {}", schema.name(), e),
    }
    json!({ "$and": clauses })
}

/// Converts the caller filter into one where-clause object per entry.
pub fn parse_entries(schema: &EntitySchema, raw: Option<&RawFilter>) -> Result<Vec<Value>, QueryError> {
    let decoded = match raw {
        None => return Ok(Vec::new()),
        Some(RawFilter::Encoded(text)) if text.trim().is_empty() => return Ok(Vec::new()),
        Some(RawFilter::Encoded(text)) => {
            serde_json::from_str(text).map_err(|e| QueryError::MalformedFilter(e.to_string()))?
        }
        Some(RawFilter::Decoded(value)) => value.clone(),
    };

    let entries = match decoded {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        object @ Value::Object(_) => vec![object],
        other => return Err(QueryError::MalformedFilter(format!("expected an array of objects, got {}", other))),
    };

    entries
        .iter()
        .map(|entry| match entry {
            Value::Object(fields) => convert_entry(schema, fields),
            other => Err(QueryError::MalformedFilter(format!("filter entry is not an object: {}", other))),
        })
        .collect()
}

fn convert_entry(schema: &EntitySchema, fields: &Map<String, Value>) -> Result<Value, QueryError> {
    let mut clause = Map::new();
    for (field, value) in fields {
        validate_field_name(field).map_err(|e| QueryError::MalformedFilter(e.to_string()))?;
        let identifier = schema.is_identifier_field(field);

        let condition = match value {
            Value::Array(values) => {
                if identifier {
                    for value in values {
                        check_identifier(field, value)?;
                    }
                }
                json!({ "$in": values })
            }
            Value::String(_) if identifier => {
                check_identifier(field, value)?;
                value.clone()
            }
            Value::String(text) => json!({ "$ilike": format!("%{}%", escape_like(text)) }),
            other => other.clone(),
        };
        clause.insert(field.clone(), condition);
    }
    Ok(Value::Object(clause))
}

fn check_identifier(field: &str, value: &Value) -> Result<(), QueryError> {
    match value.as_str().map(Uuid::parse_str) {
        Some(Ok(_)) => Ok(()),
        _ => Err(QueryError::MalformedFilter(format!("'{}' is not a valid identifier: {}", field, value))),
    }
}
