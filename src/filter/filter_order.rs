use serde_json::Value;

use super::error::FilterError;
use super::filter::validate_field_name;
use super::types::{FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    /// Accepts `"-created_at,name"`, `"created_at desc, name"`, arrays of
    /// either form, or `{ "created_at": "desc" }`.
    pub fn validate_and_parse(order: &Value) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let infos = match order {
            Value::String(s) => Self::parse_order_string(s),
            Value::Array(arr) => {
                let mut out = Vec::new();
                for v in arr {
                    if let Value::String(s) = v {
                        out.extend(Self::parse_order_string(s));
                    }
                }
                out
            }
            Value::Object(obj) => obj
                .iter()
                .map(|(k, v)| {
                    let sort = match v {
                        Value::Number(n) if n.as_i64() == Some(-1) => SortDirection::Desc,
                        Value::String(s) if s.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                        _ => SortDirection::Asc,
                    };
                    FilterOrderInfo { column: k.clone(), sort }
                })
                .collect(),
            _ => vec![],
        };

        for info in &infos {
            validate_field_name(&info.column)?;
        }
        Ok(infos)
    }

    fn parse_order_string(s: &str) -> Vec<FilterOrderInfo> {
        let mut out = Vec::new();
        for part in s.split(',') {
            let mut tokens = part.split_whitespace().peekable();
            while let Some(token) = tokens.next() {
                let (column, mut sort) = match token.strip_prefix('-') {
                    Some(rest) => (rest, SortDirection::Desc),
                    None => (token.strip_prefix('+').unwrap_or(token), SortDirection::Asc),
                };
                // "name desc" form: direction keyword follows the column
                if let Some(next) = tokens.peek() {
                    if next.eq_ignore_ascii_case("desc") {
                        sort = SortDirection::Desc;
                        tokens.next();
                    } else if next.eq_ignore_ascii_case("asc") {
                        tokens.next();
                    }
                }
                if !column.is_empty() {
                    out.push(FilterOrderInfo { column: column.to_string(), sort });
                }
            }
        }
        out
    }

    /// `id` is always appended as the last key so pages are stable.
    pub fn generate(infos: &[FilterOrderInfo]) -> String {
        let mut parts: Vec<String> = infos
            .iter()
            .map(|i| format!("data->'{}' {}", i.column, i.sort.to_sql()))
            .collect();
        if !infos.iter().any(|i| i.column == "id") {
            parts.push("id ASC".to_string());
        }
        format!("ORDER BY {}", parts.join(", "))
    }
}
