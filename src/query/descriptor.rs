use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::QueryConfig;
use crate::database::store::Document;

/// Caller-supplied query options plus service-supplied overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDescriptor {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// `-` prefix sorts descending: `"-created_at,name"`
    pub sort: Option<String>,
    #[serde(deserialize_with = "de_field_list")]
    pub select: Option<Vec<String>>,
    #[serde(deserialize_with = "de_lenient_populate")]
    pub populate: Option<Populate>,
    pub filter: Option<RawFilter>,
    /// ANDed into every query; callers cannot remove it
    pub overrides: Document,
}

/// The caller filter as received: still encoded, or already decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawFilter {
    Encoded(String),
    Decoded(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Populate {
    /// Reference fields expanded with their declared target type
    Flat(Vec<String>),
    Structured(Vec<PopulateSpec>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulateSpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de_field_list")]
    pub select: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populate: Option<Box<Populate>>,
}

impl PopulateSpec {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            model: None,
            select: None,
            populate: None,
        }
    }
}

impl Populate {
    /// Accepts `"a,b"`, `["a","b"]`, a spec object, an array of specs, or
    /// any of those JSON-encoded in a string. Malformed spec entries are
    /// skipped.
    pub fn from_value(value: &Value) -> Option<Populate> {
        match value {
            Value::String(raw) => {
                let trimmed = raw.trim();
                if trimmed.starts_with('[') || trimmed.starts_with('{') {
                    let decoded: Value = serde_json::from_str(trimmed).ok()?;
                    return Populate::from_value(&decoded);
                }
                let paths = parse_field_list(trimmed);
                (!paths.is_empty()).then_some(Populate::Flat(paths))
            }
            Value::Array(items) if items.iter().all(Value::is_string) => {
                let paths: Vec<String> = items.iter().filter_map(Value::as_str).map(str::to_string).collect();
                Some(Populate::Flat(paths))
            }
            Value::Array(items) => {
                let specs = items.iter().filter_map(spec_from_value).collect();
                Some(Populate::Structured(specs))
            }
            Value::Object(_) => spec_from_value(value).map(|spec| Populate::Structured(vec![spec])),
            _ => None,
        }
    }

    /// Normalized to specs; flat paths become path-only specs.
    pub fn specs(&self) -> Vec<PopulateSpec> {
        match self {
            Populate::Flat(paths) => paths.iter().map(PopulateSpec::path).collect(),
            Populate::Structured(specs) => specs.clone(),
        }
    }
}

fn spec_from_value(value: &Value) -> Option<PopulateSpec> {
    match value {
        Value::String(path) => Some(PopulateSpec::path(path.trim())),
        Value::Object(_) => match serde_json::from_value(value.clone()) {
            Ok(spec) => Some(spec),
            Err(e) => {
                debug!("Skipping malformed populate entry {}: {}", value, e);
                None
            }
        },
        _ => None,
    }
}

impl<'de> Deserialize<'de> for Populate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Populate::from_value(&value).ok_or_else(|| serde::de::Error::custom("invalid populate specification"))
    }
}

/// Same leniency as the query string: a populate that cannot be read is
/// dropped rather than failing the whole descriptor.
fn de_lenient_populate<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Populate>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let populate = Populate::from_value(&value);
    if populate.is_none() && !value.is_null() {
        debug!("Ignoring unreadable populate {}", value);
    }
    Ok(populate)
}

/// Comma- or whitespace-separated field names.
pub fn parse_field_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn de_field_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<String>>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(raw)) => Some(parse_field_list(&raw)),
        Some(Value::Array(items)) => Some(items.iter().filter_map(Value::as_str).map(str::to_string).collect()),
        Some(Value::Null) | None => None,
        Some(other) => return Err(serde::de::Error::custom(format!("invalid field list: {}", other))),
    })
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a descriptor from URL query parameters, e.g.
    /// `page=2&limit=10&sort=-name&populate=branch&filter=[{"title":"math"}]`.
    /// Unparseable numbers and unknown keys are ignored.
    pub fn from_query_string(query: &str) -> Self {
        let mut descriptor = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            match key.as_ref() {
                "page" => descriptor.page = value.parse().ok(),
                "limit" => descriptor.limit = value.parse().ok(),
                "sort" | "sortBy" => descriptor.sort = Some(value.into_owned()),
                "select" => descriptor.select = Some(parse_field_list(&value)),
                "populate" => descriptor.populate = Populate::from_value(&Value::String(value.into_owned())),
                "filter" => descriptor.filter = Some(RawFilter::Encoded(value.into_owned())),
                other => debug!("Ignoring query parameter: {}", other),
            }
        }
        descriptor
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn with_select(mut self, fields: &str) -> Self {
        self.select = Some(parse_field_list(fields));
        self
    }

    pub fn with_populate(mut self, populate: Populate) -> Self {
        self.populate = Some(populate);
        self
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(RawFilter::Decoded(filter));
        self
    }

    pub fn with_encoded_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(RawFilter::Encoded(filter.into()));
        self
    }

    pub fn with_override(mut self, field: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(field.into(), value);
        self
    }

    pub fn with_overrides(mut self, overrides: Map<String, Value>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// 1-based page; missing or zero means the first page.
    pub fn effective_page(&self) -> u32 {
        self.page.filter(|p| *p > 0).unwrap_or(1)
    }

    /// Page size; missing or zero means the configured default, and the
    /// configured maximum caps it.
    pub fn effective_limit(&self, config: &QueryConfig) -> u32 {
        let requested = self.limit.filter(|l| *l > 0).unwrap_or(config.default_limit).max(1);
        match config.max_limit {
            Some(max) if requested > max => {
                warn!("Requested limit {} capped at {}", requested, max);
                max
            }
            _ => requested,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;

    #[test]
    fn page_and_limit_defaults() {
        let config = AppConfig::development().query;
        let descriptor = QueryDescriptor::new();
        assert_eq!(descriptor.effective_page(), 1);
        assert_eq!(descriptor.effective_limit(&config), 20);

        let descriptor = QueryDescriptor::new().with_page(0).with_limit(0);
        assert_eq!(descriptor.effective_page(), 1);
        assert_eq!(descriptor.effective_limit(&config), 20);

        let descriptor = QueryDescriptor::new().with_limit(5000);
        assert_eq!(descriptor.effective_limit(&config), 1000);
    }

    #[test]
    fn populate_shapes() {
        assert_eq!(
            Populate::from_value(&json!("branch, teacher")),
            Some(Populate::Flat(vec!["branch".to_string(), "teacher".to_string()]))
        );
        assert_eq!(
            Populate::from_value(&json!(["branch"])),
            Some(Populate::Flat(vec!["branch".to_string()]))
        );

        let structured = Populate::from_value(&json!([
            { "path": "taxi", "select": "name", "populate": { "path": "teacher", "model": "User" } },
            { "nope": true },
            "branch"
        ]))
        .unwrap();
        let specs = structured.specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].select, Some(vec!["name".to_string()]));
        let nested = specs[0].populate.as_ref().unwrap().specs();
        assert_eq!(nested[0].model.as_deref(), Some("User"));
        assert_eq!(specs[1].path, "branch");
    }

    #[test]
    fn from_query_string_reads_known_keys() {
        let descriptor = QueryDescriptor::from_query_string(
            "?page=2&limit=10&sort=-name&select=name%2Ctitle&populate=branch&filter=%5B%7B%22title%22%3A%22math%22%7D%5D&x=1",
        );
        assert_eq!(descriptor.page, Some(2));
        assert_eq!(descriptor.limit, Some(10));
        assert_eq!(descriptor.sort.as_deref(), Some("-name"));
        assert_eq!(descriptor.select, Some(vec!["name".to_string(), "title".to_string()]));
        assert_eq!(descriptor.populate, Some(Populate::Flat(vec!["branch".to_string()])));
        assert_eq!(descriptor.filter, Some(RawFilter::Encoded(r#"[{"title":"math"}]"#.to_string())));
        assert!(descriptor.overrides.is_empty());
    }

    #[test]
    fn deserializes_from_json_body() {
        let descriptor: QueryDescriptor = serde_json::from_value(json!({
            "page": 3,
            "select": ["name"],
            "populate": "branch",
            "filter": [{ "name": "x" }]
        }))
        .unwrap();
        assert_eq!(descriptor.page, Some(3));
        assert_eq!(descriptor.select, Some(vec!["name".to_string()]));
        assert_eq!(descriptor.filter, Some(RawFilter::Decoded(json!([{ "name": "x" }]))));
    }

    #[test]
    fn unreadable_populate_in_body_is_dropped() {
        for populate in [json!("[bad"), json!(5), json!(true)] {
            let descriptor: QueryDescriptor = serde_json::from_value(json!({
                "page": 2,
                "populate": populate
            }))
            .unwrap();
            assert_eq!(descriptor.populate, None);
            assert_eq!(descriptor.page, Some(2));
        }
        let descriptor = QueryDescriptor::from_query_string("populate=%5Bbad");
        assert_eq!(descriptor.populate, None);
    }

    #[test]
    fn overrides_accumulate_and_later_values_win() {
        let mut scope = Map::new();
        scope.insert("branch".to_string(), json!("b1"));
        scope.insert("archived".to_string(), json!(false));
        let descriptor = QueryDescriptor::new()
            .with_override("branch", json!("b0"))
            .with_overrides(scope);
        assert_eq!(descriptor.overrides.get("branch"), Some(&json!("b1")));
        assert_eq!(descriptor.overrides.len(), 2);
    }
}
