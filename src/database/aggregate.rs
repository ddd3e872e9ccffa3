//! Minimal aggregation pipeline: `$match`, `$sort`, `$skip`, `$limit`,
//! `$project`, `$group` (with `$sum`, `$avg`, `$min`, `$max`) and `$count`.

use std::cmp::Ordering;

use serde_json::{json, Map, Value};

use crate::database::error::StoreError;
use crate::database::store::Document;
use crate::filter::filter_order::FilterOrder;
use crate::filter::filter_where::FilterWhere;
use crate::filter::matching;

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Value),
    Sort(Value),
    Skip(usize),
    Limit(usize),
    Project(Vec<String>),
    Group { key: Option<String>, accumulators: Vec<(String, Accumulator)> },
    Count(String),
}

#[derive(Debug, Clone)]
pub enum Accumulator {
    Sum(Operand),
    Avg(String),
    Min(String),
    Max(String),
}

#[derive(Debug, Clone)]
pub enum Operand {
    Constant(f64),
    Field(String),
}

fn invalid(msg: impl Into<String>) -> StoreError {
    StoreError::InvalidPipeline(msg.into())
}

/// `"$grade"` -> `grade`
fn field_ref(value: &Value) -> Option<String> {
    value.as_str()?.strip_prefix('$').map(str::to_string)
}

impl Stage {
    pub fn parse(raw: Value) -> Result<Self, StoreError> {
        let Value::Object(obj) = raw else {
            return Err(invalid("stage must be an object"));
        };
        if obj.len() != 1 {
            return Err(invalid("stage must have exactly one operator"));
        }
        let (op, arg) = obj.into_iter().next().ok_or_else(|| invalid("empty stage"))?;
        match op.as_str() {
            "$match" => Ok(Stage::Match(arg)),
            "$sort" => Ok(Stage::Sort(arg)),
            "$skip" => arg.as_u64().map(|n| Stage::Skip(n as usize)).ok_or_else(|| invalid("$skip needs a number")),
            "$limit" => arg.as_u64().map(|n| Stage::Limit(n as usize)).ok_or_else(|| invalid("$limit needs a number")),
            "$project" => match arg {
                Value::Array(fields) => Ok(Stage::Project(
                    fields.iter().filter_map(|f| f.as_str().map(str::to_string)).collect(),
                )),
                Value::Object(fields) => Ok(Stage::Project(
                    fields.into_iter().filter(|(_, v)| v != &json!(0)).map(|(k, _)| k).collect(),
                )),
                _ => Err(invalid("$project needs a list or object")),
            },
            "$count" => arg.as_str().map(|s| Stage::Count(s.to_string())).ok_or_else(|| invalid("$count needs a name")),
            "$group" => Self::parse_group(arg),
            other => Err(invalid(format!("unsupported stage {}", other))),
        }
    }

    fn parse_group(arg: Value) -> Result<Self, StoreError> {
        let Value::Object(mut spec) = arg else {
            return Err(invalid("$group needs an object"));
        };
        let key = match spec.remove("_id") {
            Some(Value::Null) | None => None,
            Some(v) => Some(field_ref(&v).ok_or_else(|| invalid("$group _id must be a $field reference"))?),
        };
        let mut accumulators = Vec::new();
        for (name, acc) in spec {
            let Value::Object(acc) = acc else {
                return Err(invalid(format!("accumulator {} must be an object", name)));
            };
            let (op, operand) = acc.into_iter().next().ok_or_else(|| invalid("empty accumulator"))?;
            let field = || field_ref(&operand).ok_or_else(|| invalid(format!("{} needs a $field", op)));
            let parsed = match op.as_str() {
                "$sum" => match operand.as_f64() {
                    Some(n) => Accumulator::Sum(Operand::Constant(n)),
                    None => Accumulator::Sum(Operand::Field(field()?)),
                },
                "$avg" => Accumulator::Avg(field()?),
                "$min" => Accumulator::Min(field()?),
                "$max" => Accumulator::Max(field()?),
                other => return Err(invalid(format!("unsupported accumulator {}", other))),
            };
            accumulators.push((name, parsed));
        }
        Ok(Stage::Group { key, accumulators })
    }
}

/// Separates a leading `$match` so backends can push it down.
pub fn split_leading_match(pipeline: Vec<Value>) -> Result<(Option<Value>, Vec<Stage>), StoreError> {
    let mut stages = pipeline.into_iter().map(Stage::parse).collect::<Result<Vec<_>, _>>()?;
    let initial = match stages.first() {
        Some(Stage::Match(filter)) => Some(filter.clone()),
        _ => None,
    };
    if initial.is_some() {
        stages.remove(0);
    }
    Ok((initial, stages))
}

pub fn run(mut docs: Vec<Document>, stages: &[Stage]) -> Result<Vec<Document>, StoreError> {
    for stage in stages {
        docs = match stage {
            Stage::Match(filter) => {
                let condition = FilterWhere::parse(filter)?;
                docs.into_iter().filter(|d| matching::matches(&condition, d)).collect()
            }
            Stage::Sort(order) => {
                let infos = FilterOrder::validate_and_parse(order)?;
                matching::sort_documents(&mut docs, &infos);
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
            Stage::Limit(n) => docs.into_iter().take(*n).collect(),
            Stage::Project(fields) => docs.into_iter().map(|d| matching::project(d, fields)).collect(),
            Stage::Count(name) => {
                let mut out = Map::new();
                out.insert(name.clone(), json!(docs.len()));
                vec![out]
            }
            Stage::Group { key, accumulators } => group(docs, key.as_deref(), accumulators),
        };
    }
    Ok(docs)
}

fn group(docs: Vec<Document>, key: Option<&str>, accumulators: &[(String, Accumulator)]) -> Vec<Document> {
    let mut buckets: Vec<(Value, Vec<Document>)> = Vec::new();
    for doc in docs {
        let k = key.and_then(|k| doc.get(k).cloned()).unwrap_or(Value::Null);
        match buckets.iter_mut().find(|(existing, _)| existing == &k) {
            Some((_, members)) => members.push(doc),
            None => buckets.push((k, vec![doc])),
        }
    }
    buckets.sort_by(|(a, _), (b, _)| matching::total_cmp(Some(a), Some(b)));

    buckets
        .into_iter()
        .map(|(k, members)| {
            let mut out = Map::new();
            out.insert("_id".to_string(), k);
            for (name, acc) in accumulators {
                out.insert(name.clone(), accumulate(acc, &members));
            }
            out
        })
        .collect()
}

fn numbers<'a>(members: &'a [Document], field: &'a str) -> impl Iterator<Item = f64> + 'a {
    members.iter().filter_map(move |d| d.get(field).and_then(Value::as_f64))
}

fn accumulate(acc: &Accumulator, members: &[Document]) -> Value {
    match acc {
        Accumulator::Sum(Operand::Constant(n)) => number(n * members.len() as f64),
        Accumulator::Sum(Operand::Field(f)) => number(numbers(members, f).sum()),
        Accumulator::Avg(f) => {
            let values: Vec<f64> = numbers(members, f).collect();
            if values.is_empty() {
                Value::Null
            } else {
                number(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
        Accumulator::Min(f) | Accumulator::Max(f) => {
            let want = if matches!(acc, Accumulator::Min(_)) { Ordering::Less } else { Ordering::Greater };
            members
                .iter()
                .filter_map(|d| d.get(f.as_str()).filter(|v| !v.is_null()))
                .fold(None::<&Value>, |best, v| match best {
                    Some(b) if matching::total_cmp(Some(v), Some(b)) != want => Some(b),
                    _ => Some(v),
                })
                .cloned()
                .unwrap_or(Value::Null)
        }
    }
}

/// Integral results stay integers in the output.
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<Document> {
        vec![
            json!({ "id": "1", "taxi": "a", "score": 10 }),
            json!({ "id": "2", "taxi": "b", "score": 4 }),
            json!({ "id": "3", "taxi": "a", "score": 6 }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
    }

    #[test]
    fn groups_and_accumulates() {
        let (_, stages) = split_leading_match(vec![json!({
            "$group": { "_id": "$taxi", "n": { "$sum": 1 }, "total": { "$sum": "$score" }, "best": { "$max": "$score" } }
        })])
        .unwrap();
        let out = run(docs(), &stages).unwrap();
        assert_eq!(
            Value::Array(out.into_iter().map(Value::Object).collect()),
            json!([
                { "_id": "a", "n": 2, "total": 16, "best": 10 },
                { "_id": "b", "n": 1, "total": 4, "best": 4 }
            ])
        );
    }

    #[test]
    fn leading_match_is_split_off() {
        let (initial, stages) = split_leading_match(vec![
            json!({ "$match": { "taxi": "a" } }),
            json!({ "$count": "n" }),
        ])
        .unwrap();
        assert_eq!(initial, Some(json!({ "taxi": "a" })));
        assert_eq!(stages.len(), 1);
    }

    #[test]
    fn sort_skip_limit_project() {
        let (_, stages) = split_leading_match(vec![
            json!({ "$sort": "-score" }),
            json!({ "$skip": 1 }),
            json!({ "$limit": 1 }),
            json!({ "$project": ["score"] }),
        ])
        .unwrap();
        let out = run(docs(), &stages).unwrap();
        assert_eq!(Value::Object(out[0].clone()), json!({ "id": "3", "score": 6 }));
    }

    #[test]
    fn rejects_unknown_stages() {
        assert!(split_leading_match(vec![json!({ "$lookup": {} })]).is_err());
    }
}
