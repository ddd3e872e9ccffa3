use serde::Serialize;
use serde_json::{Map, Value};

use crate::cli::OutputFormat;
use crate::context::{ActingUser, TenantId};

/// Prints `data` as JSON or YAML. Returns false for text output so the
/// caller can render its own table.
pub fn output_structured<T: Serialize>(output_format: OutputFormat, data: &T) -> anyhow::Result<bool> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
            Ok(true)
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(data)?);
            Ok(true)
        }
        OutputFormat::Text => Ok(false),
    }
}

pub fn parse_tenant(raw: Option<&str>) -> anyhow::Result<Option<TenantId>> {
    Ok(raw.map(TenantId::new).transpose()?)
}

pub fn parse_user(raw: Option<&str>) -> anyhow::Result<Option<ActingUser>> {
    match raw {
        Some(raw) => Ok(Some(ActingUser::new(uuid::Uuid::parse_str(raw)?))),
        None => Ok(None),
    }
}

/// One-line text rendering of a record: id followed by scalar fields.
pub fn summarize_record(record: &Map<String, Value>) -> String {
    let id = record.get("id").and_then(Value::as_str).unwrap_or("-");
    let fields: Vec<String> = record
        .iter()
        .filter(|(key, _)| key.as_str() != "id")
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some(format!("{}={}", key, s)),
            Value::Number(n) => Some(format!("{}={}", key, n)),
            Value::Bool(b) => Some(format!("{}={}", key, b)),
            _ => None,
        })
        .collect();
    format!("{:<36}  {}", id, fields.join(" "))
}
