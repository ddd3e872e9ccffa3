//! In-process evaluation of parsed filters, used by the memory store and by
//! post-fetch processing (projection, aggregation).

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::types::{Condition, FilterOp, FilterOrderInfo, FilterWhereInfo, SortDirection};

pub fn matches(condition: &Condition, doc: &Map<String, Value>) -> bool {
    match condition {
        Condition::And(parts) => parts.iter().all(|p| matches(p, doc)),
        Condition::Or(parts) => parts.iter().any(|p| matches(p, doc)),
        Condition::Not(inner) => !matches(inner, doc),
        Condition::Field(info) => matches_field(info, doc.get(&info.column)),
    }
}

fn matches_field(info: &FilterWhereInfo, value: Option<&Value>) -> bool {
    let present = value.filter(|v| !v.is_null());
    match info.operator {
        FilterOp::Eq => match (&info.data, present) {
            (Value::Null, None) => true,
            (expected, Some(actual)) => actual == expected,
            _ => false,
        },
        FilterOp::Ne => !matches_field(&FilterWhereInfo { operator: FilterOp::Eq, ..info.clone() }, value),
        FilterOp::Gt => compare(present, &info.data) == Some(Ordering::Greater),
        FilterOp::Gte => matches!(compare(present, &info.data), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => compare(present, &info.data) == Some(Ordering::Less),
        FilterOp::Lte => matches!(compare(present, &info.data), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::Like | FilterOp::ILike => {
            let (Some(Value::String(text)), Value::String(pattern)) = (present, &info.data) else {
                return false;
            };
            like_match(pattern, text, info.operator == FilterOp::ILike)
        }
        FilterOp::In => match (present, info.data.as_array()) {
            (Some(actual), Some(values)) => values.contains(actual),
            _ => false,
        },
        FilterOp::NIn => match (present, info.data.as_array()) {
            (Some(actual), Some(values)) => !values.contains(actual),
            _ => true,
        },
        FilterOp::Exists => value.is_some() == info.data.as_bool().unwrap_or(true),
    }
}

/// Ordering between two scalars of the same JSON type; `None` otherwise.
fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// SQL LIKE semantics: `%` any run, `_` one char, `\` escapes the next char.
pub fn like_match(pattern: &str, text: &str, case_insensitive: bool) -> bool {
    let fold = |s: &str| -> Vec<char> {
        if case_insensitive {
            s.to_lowercase().chars().collect()
        } else {
            s.chars().collect()
        }
    };
    let text = fold(text);

    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Any,
        One,
        Lit(char),
    }
    let mut tokens = Vec::new();
    let mut chars = fold(pattern).into_iter();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Lit(chars.next().unwrap_or('\\')),
            other => Token::Lit(other),
        });
    }

    // reachable[j]: text[..j] is matched by the tokens consumed so far
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;
    for token in tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            Token::Any => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= reachable[j];
                    next[j] = seen;
                }
            }
            Token::One => {
                for j in 0..text.len() {
                    next[j + 1] = reachable[j];
                }
            }
            Token::Lit(c) => {
                for j in 0..text.len() {
                    next[j + 1] = reachable[j] && text[j] == c;
                }
            }
        }
        reachable = next;
    }
    reachable[text.len()]
}

/// Escapes LIKE metacharacters so the input matches literally.
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::String(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::Bool(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order across JSON values: by type rank, then by value.
pub fn total_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&y.as_f64().unwrap_or(0.0))
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        _ => Ordering::Equal,
    }
}

/// Sorts by the given keys, missing values last when ascending, with `id` as
/// the final tiebreaker.
pub fn sort_documents(docs: &mut [Map<String, Value>], order: &[FilterOrderInfo]) {
    docs.sort_by(|a, b| {
        for info in order {
            let (va, vb) = (a.get(&info.column), b.get(&info.column));
            let missing = |v: Option<&Value>| v.map_or(true, Value::is_null);
            let ord = match (missing(va), missing(vb)) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => total_cmp(va, vb),
            };
            let ord = match info.sort {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        total_cmp(a.get("id"), b.get("id"))
    });
}

/// Keeps only `fields` (plus `id`).
pub fn project(doc: Map<String, Value>, fields: &[String]) -> Map<String, Value> {
    if fields.is_empty() || fields.iter().any(|f| f == "*") {
        return doc;
    }
    doc.into_iter()
        .filter(|(k, _)| k == "id" || fields.iter().any(|f| f == k))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::filter_where::FilterWhere;
    use serde_json::json;

    fn doc(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn check(filter: Value, d: Value) -> bool {
        matches(&FilterWhere::parse(&filter).unwrap(), &doc(d))
    }

    #[test]
    fn like_semantics() {
        assert!(like_match("%math%", "Applied Mathematics", true));
        assert!(!like_match("%math%", "Applied Mathematics", false));
        assert!(like_match("a_c", "abc", false));
        assert!(!like_match("a_c", "abbc", false));
        assert!(like_match("100\\%", "100%", false));
        assert!(!like_match("100\\%", "1000", false));
        assert!(like_match(&format!("%{}%", escape_like("50%_off")), "get 50%_off now", true));
        assert!(!like_match(&format!("%{}%", escape_like("50%")), "get 500 now", true));
    }

    #[test]
    fn operators_against_documents() {
        let d = json!({ "title": "Algebra", "grade": 7, "tags": ["x"], "note": null });
        assert!(check(json!({ "grade": { "$gte": 7, "$lt": 8 } }), d.clone()));
        assert!(check(json!({ "grade": { "$in": [6, 7] } }), d.clone()));
        assert!(check(json!({ "title": { "$nin": ["Geometry"] } }), d.clone()));
        assert!(check(json!({ "note": null, "missing": null }), d.clone()));
        assert!(check(json!({ "missing": { "$exists": false } }), d.clone()));
        assert!(check(json!({ "$or": [ { "grade": 1 }, { "title": { "$ilike": "alg%" } } ] }), d.clone()));
        assert!(!check(json!({ "$not": { "grade": 7 } }), d.clone()));
        assert!(!check(json!({ "grade": { "$gt": "7" } }), d));
    }

    #[test]
    fn sort_is_stable_by_id_and_puts_missing_last() {
        let mut docs = vec![
            doc(json!({ "id": "b", "n": 1 })),
            doc(json!({ "id": "c" })),
            doc(json!({ "id": "a", "n": 1 })),
            doc(json!({ "id": "d", "n": 0 })),
        ];
        sort_documents(
            &mut docs,
            &[FilterOrderInfo { column: "n".to_string(), sort: SortDirection::Asc }],
        );
        let ids: Vec<&str> = docs.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn projection_keeps_id() {
        let projected = project(doc(json!({ "id": "1", "a": 1, "b": 2 })), &["b".to_string()]);
        assert_eq!(Value::Object(projected), json!({ "id": "1", "b": 2 }));
    }
}
