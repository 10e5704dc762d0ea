//! CRUD execution against PostgreSQL.

use super::builder::{count, delete_in, insert, select_by_id, select_page, update, QueryBuf, SqlTable};
use super::params::PgBindValue;
use crate::backend::{Backend, ModelInfo, Pagination};
use crate::error::RestError;
use crate::filters::PageParam;
use crate::schema::Item;
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, Row};

/// Serves one resource from one table. Batches run in a single transaction.
#[derive(Clone)]
pub struct SqlBackend {
    pool: PgPool,
    table: SqlTable,
}

impl SqlBackend {
    pub fn new(pool: PgPool, table: SqlTable) -> Self {
        SqlBackend { pool, table }
    }

    pub fn table(&self) -> &SqlTable {
        &self.table
    }

    async fn query_many(&self, q: &QueryBuf) -> Result<Vec<Item>, RestError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_all(q).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_item).collect())
    }

    async fn query_one(&self, q: &QueryBuf) -> Result<Option<Item>, RestError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let row = bind_all(q).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(row_to_item))
    }

    async fn query_one_tx(tx: &mut PgConnection, q: &QueryBuf) -> Result<Option<Item>, RestError> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query (tx)");
        let row = bind_all(q).fetch_optional(&mut *tx).await?;
        Ok(row.as_ref().map(row_to_item))
    }
}

fn bind_all(q: &QueryBuf) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

fn id_of(model: &ModelInfo, item: &Item) -> Value {
    item.get(&model.id_attribute).cloned().unwrap_or(Value::Null)
}

#[async_trait]
impl Backend for SqlBackend {
    async fn paginate(&self, model: &ModelInfo, param: &PageParam) -> Result<Pagination, RestError> {
        let page = param.if_page.then(|| (param.page_size, param.offset()));
        let q = select_page(&self.table, model, &param.conditions, &param.sort, page);
        let items = self.query_many(&q).await?;
        let total = if param.if_page {
            let q = count(&self.table, model, &param.conditions);
            tracing::debug!(sql = %q.sql, params = ?q.params, "query");
            let row = bind_all(&q).fetch_one(&self.pool).await?;
            row.try_get::<i64, _>("count")?.max(0) as u64
        } else {
            items.len() as u64
        };
        Ok(Pagination {
            items,
            page: param.page,
            page_size: param.page_size,
            total,
        })
    }

    async fn read(&self, model: &ModelInfo, id: &Value) -> Result<Option<Item>, RestError> {
        self.query_one(&select_by_id(&self.table, model, id)).await
    }

    async fn create_one(&self, model: &ModelInfo, item: Item) -> Result<Item, RestError> {
        self.query_one(&insert(&self.table, model, &item))
            .await?
            .ok_or(RestError::Db(sqlx::Error::RowNotFound))
    }

    async fn create_many(&self, model: &ModelInfo, items: Vec<Item>) -> Result<Vec<Item>, RestError> {
        let mut out = Vec::with_capacity(items.len());
        let mut tx = self.pool.begin().await?;
        for item in &items {
            let q = insert(&self.table, model, item);
            let row = Self::query_one_tx(&mut tx, &q)
                .await?
                .ok_or(RestError::Db(sqlx::Error::RowNotFound))?;
            out.push(row);
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn update_one(&self, model: &ModelInfo, item: Item, changes: Item) -> Result<Item, RestError> {
        let id = id_of(model, &item);
        self.query_one(&update(&self.table, model, &id, &changes))
            .await?
            .ok_or_else(|| RestError::not_found(format!("{} {}", model.name, id)))
    }

    async fn update_many(&self, model: &ModelInfo, updates: Vec<(Item, Item)>) -> Result<Vec<Item>, RestError> {
        let mut out = Vec::with_capacity(updates.len());
        let mut tx = self.pool.begin().await?;
        for (item, changes) in &updates {
            let id = id_of(model, item);
            let q = update(&self.table, model, &id, changes);
            let row = Self::query_one_tx(&mut tx, &q)
                .await?
                .ok_or_else(|| RestError::not_found(format!("{} {}", model.name, id)))?;
            out.push(row);
        }
        tx.commit().await?;
        Ok(out)
    }

    async fn delete_many(&self, model: &ModelInfo, ids: &[Value]) -> Result<(), RestError> {
        let q = delete_in(&self.table, model, ids);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let result = bind_all(&q).execute(&self.pool).await?;
        tracing::debug!(rows = result.rows_affected(), "deleted");
        Ok(())
    }
}

fn row_to_item(row: &PgRow) -> Item {
    use sqlx::Column;
    let mut map = Item::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    map
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    if let Ok(Some(n)) = row.try_get::<Option<i16>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f32>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(f64::from(n)) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(u)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(u.to_string());
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDateTime>, _>(name) {
        return Value::String(d.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, true));
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
