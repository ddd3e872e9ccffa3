//! PostgreSQL document store: one table per physical collection, each row
//! an `id uuid` key plus the whole document in `data jsonb`. Filters compile
//! to SQL over `data`; projection is applied after decoding.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CONFIG;
use crate::database::error::StoreError;
use crate::database::manager::DatabaseManager;
use crate::database::store::{Collection, Document, DocumentStore, Update};
use crate::filter::matching::project;
use crate::filter::{Filter, FilterData, SqlResult};

/// Postgres truncates identifiers longer than this.
const MAX_IDENTIFIER_LEN: usize = 63;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store over the database named in `DATABASE_URL`.
    pub async fn connect() -> Result<Self, StoreError> {
        Ok(Self::new(DatabaseManager::main_pool().await?))
    }

    fn validate_name(name: &str) -> Result<(), StoreError> {
        if name.len() > MAX_IDENTIFIER_LEN {
            return Err(StoreError::InvalidCollection(name.to_string()));
        }
        Filter::new(name).map_err(|_| StoreError::InvalidCollection(name.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn collection(&self, name: &str) -> Result<Arc<dyn Collection>, StoreError> {
        Self::validate_name(name)?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (id uuid PRIMARY KEY, data jsonb NOT NULL)",
            name
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        debug!("Ensured table for collection: {}", name);
        Ok(Arc::new(PgCollection {
            pool: self.pool.clone(),
            name: name.to_string(),
        }))
    }
}

pub struct PgCollection {
    pool: PgPool,
    name: String,
}

impl PgCollection {
    fn filter(&self, where_clause: Option<Value>) -> Result<Filter, StoreError> {
        let mut filter = Filter::new(&self.name)?;
        if let Some(where_clause) = where_clause {
            filter.where_clause(&where_clause)?;
        }
        Ok(filter)
    }

    fn insert_sql(&self) -> String {
        format!("INSERT INTO \"{}\" (id, data) VALUES ($1, $2)", self.name)
    }

    fn id_of(doc: &Document) -> Result<Uuid, StoreError> {
        doc.get("id")
            .and_then(Value::as_str)
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| StoreError::InvalidDocument("document id must be a UUID string".to_string()))
    }

    fn map_insert_error(&self, error: sqlx::Error, id: Uuid) -> StoreError {
        match &error {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => StoreError::DuplicateId {
                collection: self.name.clone(),
                id: id.to_string(),
            },
            _ => StoreError::Sqlx(error),
        }
    }

    /// `UPDATE` (or `DELETE`) statement; single-document writes touch the
    /// lowest matching id.
    fn write_sql(&self, head: &str, where_sql: &SqlResult, multi: bool) -> String {
        if multi {
            format!("{} WHERE {}", head, where_sql.query)
        } else {
            format!(
                "{} WHERE id IN (SELECT id FROM \"{}\" WHERE {} ORDER BY id LIMIT 1)",
                head, self.name, where_sql.query
            )
        }
    }
}

fn bind_params<'q>(mut query: Query<'q, Postgres, PgArguments>, params: &[Value]) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = query.bind(Json(param.clone()));
    }
    query
}

fn decode(row: &PgRow) -> Result<Document, StoreError> {
    let Json(data) = row.try_get::<Json<Value>, _>("data")?;
    match data {
        Value::Object(doc) => Ok(doc),
        other => Err(StoreError::InvalidDocument(format!("stored data is not an object: {}", other))),
    }
}

fn log_slow(sql: &str, started: Instant) {
    let elapsed = started.elapsed();
    if CONFIG.database.enable_slow_query_warning
        && elapsed.as_millis() > u128::from(CONFIG.database.slow_query_threshold_ms)
    {
        warn!("Slow query ({:?}): {}", elapsed, sql);
    }
}

#[async_trait]
impl Collection for PgCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, doc: Document) -> Result<Document, StoreError> {
        let id = Self::id_of(&doc)?;
        sqlx::query(&self.insert_sql())
            .bind(id)
            .bind(Json(Value::Object(doc.clone())))
            .execute(&self.pool)
            .await
            .map_err(|e| self.map_insert_error(e, id))?;
        Ok(doc)
    }

    async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Document>, StoreError> {
        let sql = self.insert_sql();
        let mut tx = self.pool.begin().await?;
        for doc in &docs {
            let id = Self::id_of(doc)?;
            sqlx::query(&sql)
                .bind(id)
                .bind(Json(Value::Object(doc.clone())))
                .execute(&mut *tx)
                .await
                .map_err(|e| self.map_insert_error(e, id))?;
        }
        tx.commit().await?;
        Ok(docs)
    }

    async fn find(&self, mut query: FilterData) -> Result<Vec<Document>, StoreError> {
        let select = query.select.take();
        let mut filter = Filter::new(&self.name)?;
        filter.assign(query)?;
        if let Some(select) = &select {
            // Validate even though projection happens after decoding
            filter.select(select.clone())?;
        }

        let sql = filter.to_sql();
        let started = Instant::now();
        let rows = bind_params(sqlx::query(&sql.query), &sql.params)
            .fetch_all(&self.pool)
            .await?;
        log_slow(&sql.query, started);

        let columns = filter.select_columns();
        rows.iter()
            .map(|row| decode(row).map(|doc| project(doc, columns)))
            .collect()
    }

    async fn count(&self, where_clause: Option<Value>) -> Result<u64, StoreError> {
        let sql = self.filter(where_clause)?.to_count_sql();
        let started = Instant::now();
        let row = bind_params(sqlx::query(&sql.query), &sql.params)
            .fetch_one(&self.pool)
            .await?;
        log_slow(&sql.query, started);
        let count: i64 = row.try_get("count")?;
        Ok(count.max(0) as u64)
    }

    async fn update(&self, where_clause: Option<Value>, update: &Update, multi: bool) -> Result<u64, StoreError> {
        let where_sql = self.filter(where_clause)?.to_where_sql();
        let set_idx = where_sql.params.len() + 1;
        let head = format!(
            "UPDATE \"{}\" SET data = (data || ${}) - ${}::text[]",
            self.name,
            set_idx,
            set_idx + 1
        );
        let sql = self.write_sql(&head, &where_sql, multi);

        let started = Instant::now();
        let result = bind_params(sqlx::query(&sql), &where_sql.params)
            .bind(Json(Value::Object(update.set.clone())))
            .bind(update.unset.clone())
            .execute(&self.pool)
            .await?;
        log_slow(&sql, started);
        Ok(result.rows_affected())
    }

    async fn delete(&self, where_clause: Option<Value>, multi: bool) -> Result<u64, StoreError> {
        let where_sql = self.filter(where_clause)?.to_where_sql();
        let head = format!("DELETE FROM \"{}\"", self.name);
        let sql = self.write_sql(&head, &where_sql, multi);

        let started = Instant::now();
        let result = bind_params(sqlx::query(&sql), &where_sql.params)
            .execute(&self.pool)
            .await?;
        log_slow(&sql, started);
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection(name: &str) -> PgCollection {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/campus_test")
            .unwrap();
        PgCollection { pool, name: name.to_string() }
    }

    #[test]
    fn rejects_overlong_and_malformed_names() {
        assert!(PgStore::validate_name("school-a_posts").is_ok());
        assert!(PgStore::validate_name(&format!("{}_posts", "t".repeat(60))).is_err());
        assert!(PgStore::validate_name("posts\"; drop table x").is_err());
    }

    #[tokio::test]
    async fn single_writes_target_one_row() {
        let c = collection("school-a_posts");
        let where_sql = c.filter(Some(json!({ "branch": "B" }))).unwrap().to_where_sql();
        assert_eq!(
            c.write_sql("DELETE FROM \"school-a_posts\"", &where_sql, false),
            "DELETE FROM \"school-a_posts\" WHERE id IN (SELECT id FROM \"school-a_posts\" WHERE data->'branch' = $1 ORDER BY id LIMIT 1)"
        );
        assert_eq!(
            c.write_sql("DELETE FROM \"school-a_posts\"", &where_sql, true),
            "DELETE FROM \"school-a_posts\" WHERE data->'branch' = $1"
        );
    }

    #[test]
    fn id_must_be_a_uuid() {
        let doc = json!({ "id": "nope" }).as_object().cloned().unwrap();
        assert!(matches!(PgCollection::id_of(&doc), Err(StoreError::InvalidDocument(_))));
        let id = Uuid::new_v4();
        let doc = json!({ "id": id.to_string() }).as_object().cloned().unwrap();
        assert_eq!(PgCollection::id_of(&doc).unwrap(), id);
    }
}
