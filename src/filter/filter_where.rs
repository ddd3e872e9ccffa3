use serde_json::{Map, Value};

use super::error::FilterError;
use super::filter::validate_field_name;
use super::types::{Condition, FilterOp, FilterWhereInfo};

/// Hard stop for `$and`/`$or`/`$not` nesting.
const MAX_NESTED_DEPTH: usize = 32;

/// Parses the JSON where language into a [`Condition`] tree and compiles the
/// tree to SQL over a `data jsonb` column.
pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    pub fn parse(where_data: &Value) -> Result<Condition, FilterError> {
        Self::parse_at(where_data, 0)
    }

    fn parse_at(where_data: &Value, depth: usize) -> Result<Condition, FilterError> {
        if depth > MAX_NESTED_DEPTH {
            return Err(FilterError::TooDeep(depth));
        }
        match where_data {
            Value::Null => Ok(Condition::And(vec![])),
            Value::Object(obj) => {
                let mut conditions = Vec::with_capacity(obj.len());
                for (key, value) in obj {
                    if key.starts_with('$') {
                        conditions.push(Self::parse_logical_operator(key, value, depth)?);
                    } else {
                        conditions.extend(Self::parse_field_condition(key, value)?);
                    }
                }
                Ok(match conditions.len() {
                    1 => conditions.remove(0),
                    _ => Condition::And(conditions),
                })
            }
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn parse_logical_operator(op: &str, value: &Value, depth: usize) -> Result<Condition, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                let parts = arr
                    .iter()
                    .map(|v| Self::parse_at(v, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if op == "$and" { Condition::And(parts) } else { Condition::Or(parts) })
            }
            "$not" => Ok(Condition::Not(Box::new(Self::parse_at(value, depth + 1)?))),
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn parse_field_condition(field: &str, value: &Value) -> Result<Vec<Condition>, FilterError> {
        validate_field_name(field)?;

        let operators = match value {
            Value::Object(obj) if is_operator_object(obj)? => obj,
            // Implicit equality: { field: value }
            _ => {
                return Ok(vec![Condition::Field(FilterWhereInfo {
                    column: field.to_string(),
                    operator: FilterOp::Eq,
                    data: value.clone(),
                })])
            }
        };

        let mut out = Vec::with_capacity(operators.len());
        for (op_key, op_val) in operators {
            let operator = Self::map_operator(op_key)?;
            Self::validate_operand(operator, op_val)?;
            out.push(Condition::Field(FilterWhereInfo {
                column: field.to_string(),
                operator,
                data: op_val.clone(),
            }));
        }
        Ok(out)
    }

    fn map_operator(op_key: &str) -> Result<FilterOp, FilterError> {
        Ok(match op_key {
            "$eq" => FilterOp::Eq,
            "$ne" | "$neq" => FilterOp::Ne,
            "$gt" => FilterOp::Gt,
            "$gte" => FilterOp::Gte,
            "$lt" => FilterOp::Lt,
            "$lte" => FilterOp::Lte,
            "$like" => FilterOp::Like,
            "$ilike" => FilterOp::ILike,
            "$in" => FilterOp::In,
            "$nin" => FilterOp::NIn,
            "$exists" => FilterOp::Exists,
            other => return Err(FilterError::UnsupportedOperator(other.to_string())),
        })
    }

    fn validate_operand(op: FilterOp, data: &Value) -> Result<(), FilterError> {
        match op {
            FilterOp::In | FilterOp::NIn if !data.is_array() => Err(FilterError::InvalidOperatorData(
                "$in/$nin require an array".to_string(),
            )),
            FilterOp::Like | FilterOp::ILike if !data.is_string() => Err(FilterError::InvalidOperatorData(
                "$like/$ilike require a string pattern".to_string(),
            )),
            FilterOp::Exists if !data.is_boolean() => Err(FilterError::InvalidOperatorData(
                "$exists requires a boolean".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Compile a condition tree to a SQL predicate plus positional params.
    pub fn generate(condition: &Condition, starting_param_index: usize) -> (String, Vec<Value>) {
        let mut filter_where = Self::new(starting_param_index);
        let sql = filter_where.build_sql(condition);
        (sql, filter_where.param_values)
    }

    fn build_sql(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::And(parts) if parts.is_empty() => "1=1".to_string(),
            Condition::Or(parts) if parts.is_empty() => "1=0".to_string(),
            Condition::And(parts) => self.join(parts, " AND "),
            Condition::Or(parts) => self.join(parts, " OR "),
            Condition::Not(inner) => format!("NOT ({})", self.build_sql(inner)),
            Condition::Field(info) => self.build_sql_condition(info),
        }
    }

    fn join(&mut self, parts: &[Condition], joiner: &str) -> String {
        parts
            .iter()
            .map(|p| format!("({})", self.build_sql(p)))
            .collect::<Vec<_>>()
            .join(joiner)
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> String {
        // Field names were validated at parse time, so quoting as a literal is safe.
        let field = format!("data->'{}'", condition.column);
        let text = format!("data->>'{}'", condition.column);
        match condition.operator {
            FilterOp::Eq => {
                if condition.data.is_null() {
                    format!("({field} IS NULL OR {field} = 'null'::jsonb)")
                } else {
                    format!("{} = {}", field, self.param(condition.data.clone()))
                }
            }
            FilterOp::Ne => {
                if condition.data.is_null() {
                    format!("({field} IS NOT NULL AND {field} <> 'null'::jsonb)")
                } else {
                    format!("{} IS DISTINCT FROM {}", field, self.param(condition.data.clone()))
                }
            }
            FilterOp::Gt => format!("{} > {}", field, self.param(condition.data.clone())),
            FilterOp::Gte => format!("{} >= {}", field, self.param(condition.data.clone())),
            FilterOp::Lt => format!("{} < {}", field, self.param(condition.data.clone())),
            FilterOp::Lte => format!("{} <= {}", field, self.param(condition.data.clone())),
            FilterOp::Like => format!("{} LIKE ({} #>> '{{}}')", text, self.param(condition.data.clone())),
            FilterOp::ILike => format!("{} ILIKE ({} #>> '{{}}')", text, self.param(condition.data.clone())),
            FilterOp::In | FilterOp::NIn => {
                let values = condition.data.as_array().cloned().unwrap_or_default();
                let negate = condition.operator == FilterOp::NIn;
                if values.is_empty() {
                    return if negate { "1=1".to_string() } else { "1=0".to_string() };
                }
                let params: Vec<String> = values.into_iter().map(|v| self.param(v)).collect();
                let list = format!("{} IN ({})", field, params.join(", "));
                if negate {
                    format!("NOT COALESCE({}, false)", list)
                } else {
                    list
                }
            }
            FilterOp::Exists => {
                if condition.data.as_bool().unwrap_or(true) {
                    format!("{} IS NOT NULL", field)
                } else {
                    format!("{} IS NULL", field)
                }
            }
        }
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}

/// `{ "$in": [...] }` is an operator object, `{ "city": "x" }` is a literal.
fn is_operator_object(obj: &Map<String, Value>) -> Result<bool, FilterError> {
    let operator_keys = obj.keys().filter(|k| k.starts_with('$')).count();
    if operator_keys == 0 {
        return Ok(false);
    }
    if operator_keys != obj.len() {
        return Err(FilterError::InvalidOperatorData(
            "operators cannot be mixed with literal keys".to_string(),
        ));
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn implicit_equality_and_operators() {
        let cond = FilterWhere::parse(&json!({ "branch": "B", "grade": { "$gte": 10 } })).unwrap();
        let (sql, params) = FilterWhere::generate(&cond, 0);
        assert_eq!(sql, "(data->'branch' = $1) AND (data->'grade' >= $2)");
        assert_eq!(params, vec![json!("B"), json!(10)]);
    }

    #[test]
    fn nested_logical_operators() {
        let cond = FilterWhere::parse(&json!({
            "$and": [ { "branch": "B" }, { "$or": [ { "title": { "$ilike": "%math%" } }, { "tags": { "$in": [] } } ] } ]
        }))
        .unwrap();
        let (sql, params) = FilterWhere::generate(&cond, 0);
        assert_eq!(
            sql,
            "(data->'branch' = $1) AND ((data->>'title' ILIKE ($2 #>> '{}')) OR (1=0))"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn params_continue_from_starting_index() {
        let cond = FilterWhere::parse(&json!({ "a": 1 })).unwrap();
        let (sql, _) = FilterWhere::generate(&cond, 3);
        assert_eq!(sql, "data->'a' = $4");
    }

    #[test]
    fn null_equality_matches_missing_fields() {
        let cond = FilterWhere::parse(&json!({ "deleted_at": null })).unwrap();
        let (sql, params) = FilterWhere::generate(&cond, 0);
        assert_eq!(sql, "(data->'deleted_at' IS NULL OR data->'deleted_at' = 'null'::jsonb)");
        assert!(params.is_empty());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(FilterWhere::parse(&json!([1, 2])).is_err());
        assert!(FilterWhere::parse(&json!({ "a": { "$regex": "x" } })).is_err());
        assert!(FilterWhere::parse(&json!({ "a": { "$in": "x" } })).is_err());
        assert!(FilterWhere::parse(&json!({ "a": { "$eq": 1, "b": 2 } })).is_err());
        assert!(FilterWhere::parse(&json!({ "bad-name'": 1 })).is_err());
    }

    #[test]
    fn literal_object_values_are_equality() {
        let cond = FilterWhere::parse(&json!({ "address": { "city": "Oslo" } })).unwrap();
        match cond {
            Condition::Field(info) => {
                assert_eq!(info.operator, FilterOp::Eq);
                assert_eq!(info.data, json!({ "city": "Oslo" }));
            }
            other => panic!("unexpected condition: {:?}", other),
        }
    }
}
