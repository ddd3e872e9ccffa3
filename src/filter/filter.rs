use serde_json::{Map, Value};

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::matching;
use super::types::{Condition, FilterData, FilterOrderInfo, SqlResult};

/// A validated query against one physical collection.
#[derive(Debug, Clone)]
pub struct Filter {
    table_name: String,
    select_columns: Vec<String>,
    condition: Condition,
    order_data: Vec<FilterOrderInfo>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        Self::validate_table_name(&table_name)?;
        Ok(Self {
            table_name,
            select_columns: vec![],
            condition: Condition::And(vec![]),
            order_data: vec![],
            limit: None,
            offset: None,
        })
    }

    pub fn assign(&mut self, data: FilterData) -> Result<&mut Self, FilterError> {
        if let Some(select) = data.select { self.select(select)?; }
        if let Some(where_clause) = data.where_clause { self.where_clause(&where_clause)?; }
        if let Some(order) = data.order { self.order(&order)?; }
        self.limit = data.limit;
        self.offset = data.offset;
        Ok(self)
    }

    pub fn select(&mut self, columns: Vec<String>) -> Result<&mut Self, FilterError> {
        for column in &columns {
            if column != "*" {
                validate_field_name(column)?;
            }
        }
        self.select_columns = columns;
        Ok(self)
    }

    pub fn where_clause(&mut self, conditions: &Value) -> Result<&mut Self, FilterError> {
        self.condition = FilterWhere::parse(conditions)?;
        Ok(self)
    }

    pub fn order(&mut self, order_spec: &Value) -> Result<&mut Self, FilterError> {
        self.order_data = FilterOrder::validate_and_parse(order_spec)?;
        Ok(self)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn select_columns(&self) -> &[String] {
        &self.select_columns
    }

    pub fn matches(&self, doc: &Map<String, Value>) -> bool {
        matching::matches(&self.condition, doc)
    }

    /// Sort, window and project documents that already passed [`Self::matches`].
    pub fn apply(&self, mut docs: Vec<Map<String, Value>>) -> Vec<Map<String, Value>> {
        matching::sort_documents(&mut docs, &self.order_data);
        docs.into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .map(|doc| matching::project(doc, &self.select_columns))
            .collect()
    }

    /// Projection is applied by the caller after decoding `data`.
    pub fn to_sql(&self) -> SqlResult {
        let (where_clause, params) = FilterWhere::generate(&self.condition, 0);
        let query = [
            format!("SELECT data FROM \"{}\"", self.table_name),
            format!("WHERE {}", where_clause),
            FilterOrder::generate(&self.order_data),
            self.build_limit_clause(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

        SqlResult { query, params }
    }

    pub fn to_where_sql(&self) -> SqlResult {
        let (query, params) = FilterWhere::generate(&self.condition, 0);
        SqlResult { query, params }
    }

    pub fn to_count_sql(&self) -> SqlResult {
        let where_result = self.to_where_sql();
        SqlResult {
            query: format!(
                "SELECT COUNT(*) AS count FROM \"{}\" WHERE {}",
                self.table_name, where_result.query
            ),
            params: where_result.params,
        }
    }

    /// Physical names are `{tenant}_{base}`; tenant ids may contain `-`.
    fn validate_table_name(name: &str) -> Result<(), FilterError> {
        let first = name
            .chars()
            .next()
            .ok_or_else(|| FilterError::InvalidTableName("Collection name cannot be empty".to_string()))?;
        let valid_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_chars || !(first.is_ascii_alphanumeric() || first == '_') {
            return Err(FilterError::InvalidTableName(format!("Invalid collection name format: {}", name)));
        }
        Ok(())
    }

    fn build_limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) => format!("OFFSET {}", o),
            (None, None) => String::new(),
        }
    }
}

/// Field names are embedded in generated SQL, so only `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_field_name(column: &str) -> Result<(), FilterError> {
    let mut chars = column.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        return Err(FilterError::InvalidColumn(format!("Invalid field name format: {:?}", column)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_collection_names() {
        assert!(Filter::new("school-a_posts").is_ok());
        assert!(Filter::new("users").is_ok());
        assert!(Filter::new("").is_err());
        assert!(Filter::new("-posts").is_err());
        assert!(Filter::new("posts\"; drop").is_err());
    }

    #[test]
    fn builds_select_and_count_sql() {
        let mut filter = Filter::new("school-a_posts").unwrap();
        filter
            .assign(FilterData {
                select: Some(vec!["title".to_string()]),
                where_clause: Some(json!({ "branch": "B" })),
                order: Some(json!("-created_at")),
                limit: Some(10),
                offset: Some(10),
            })
            .unwrap();

        let sql = filter.to_sql();
        assert_eq!(
            sql.query,
            "SELECT data FROM \"school-a_posts\" WHERE data->'branch' = $1 ORDER BY data->'created_at' DESC, id ASC LIMIT 10 OFFSET 10"
        );
        assert_eq!(sql.params, vec![json!("B")]);

        let count = filter.to_count_sql();
        assert_eq!(
            count.query,
            "SELECT COUNT(*) AS count FROM \"school-a_posts\" WHERE data->'branch' = $1"
        );
    }

    #[test]
    fn apply_windows_after_sorting() {
        let mut filter = Filter::new("posts").unwrap();
        filter
            .assign(FilterData {
                order: Some(json!("n")),
                limit: Some(2),
                offset: Some(1),
                ..Default::default()
            })
            .unwrap();
        let docs = (0..5)
            .rev()
            .map(|n| json!({ "id": format!("id{}", n), "n": n }).as_object().cloned().unwrap())
            .collect();
        let out: Vec<i64> = filter.apply(docs).iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(out, vec![1, 2]);
    }
}
