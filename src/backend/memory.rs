//! In-process backend over a `Vec` of items. Used by tests and demos.

use super::{Backend, ModelInfo, Pagination};
use crate::error::RestError;
use crate::filters::{Condition, FilterOp, PageParam, SortKey};
use crate::schema::{FieldKind, Item};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct MemoryStore {
    items: Vec<Item>,
    sequence: i64,
}

/// Items are kept in insertion order. Missing integer ids are assigned from a sequence.
#[derive(Default)]
pub struct MemoryBackend {
    store: RwLock<MemoryStore>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    /// Seed with existing items; the id sequence continues after the largest integer id.
    pub fn with_items(items: Vec<Item>, id_attribute: &str) -> Self {
        let sequence = items
            .iter()
            .filter_map(|i| i.get(id_attribute).and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        MemoryBackend {
            store: RwLock::new(MemoryStore { items, sequence }),
        }
    }

    pub fn len(&self) -> usize {
        self.read_store().map(|s| s.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_store(&self) -> Result<RwLockReadGuard<'_, MemoryStore>, RestError> {
        self.store
            .read()
            .map_err(|_| RestError::Backend("memory store lock poisoned".into()))
    }

    fn write_store(&self) -> Result<RwLockWriteGuard<'_, MemoryStore>, RestError> {
        self.store
            .write()
            .map_err(|_| RestError::Backend("memory store lock poisoned".into()))
    }
}

impl MemoryStore {
    fn position(&self, id_attribute: &str, id: &Value) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.get(id_attribute).map_or(false, |v| loose_eq(v, id, None)))
    }

    fn insert(&mut self, model: &ModelInfo, mut item: Item) -> Result<Item, RestError> {
        let id_attr = model.id_attribute.as_str();
        match item.get(id_attr).cloned() {
            None | Some(Value::Null) => {
                self.sequence += 1;
                item.insert(id_attr.to_string(), Value::from(self.sequence));
            }
            Some(id) => {
                if self.position(id_attr, &id).is_some() {
                    return Err(RestError::BackendConflict(format!("{} {}", model.name, id)));
                }
                if let Some(n) = id.as_i64() {
                    self.sequence = self.sequence.max(n);
                }
            }
        }
        self.items.push(item.clone());
        Ok(item)
    }

    fn update(&mut self, model: &ModelInfo, item: &Item, changes: Item) -> Result<Item, RestError> {
        let id_attr = model.id_attribute.as_str();
        let id = item.get(id_attr).cloned().unwrap_or(Value::Null);
        let pos = self
            .position(id_attr, &id)
            .ok_or_else(|| RestError::not_found(format!("{} {}", model.name, id)))?;
        let stored = &mut self.items[pos];
        for (k, v) in changes {
            if k != id_attr {
                stored.insert(k, v);
            }
        }
        Ok(stored.clone())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn paginate(&self, model: &ModelInfo, param: &PageParam) -> Result<Pagination, RestError> {
        let store = self.read_store()?;
        let mut items: Vec<Item> = store
            .items
            .iter()
            .filter(|item| param.conditions.iter().all(|c| matches(item, c)))
            .cloned()
            .collect();
        drop(store);
        sort_items(&mut items, &param.sort, model);

        let total = items.len() as u64;
        if param.if_page {
            let offset = usize::try_from(param.offset()).unwrap_or(usize::MAX);
            items = items.into_iter().skip(offset).take(param.page_size as usize).collect();
        }
        Ok(Pagination {
            items,
            page: param.page,
            page_size: param.page_size,
            total,
        })
    }

    async fn read(&self, model: &ModelInfo, id: &Value) -> Result<Option<Item>, RestError> {
        let store = self.read_store()?;
        Ok(store
            .position(&model.id_attribute, id)
            .map(|pos| store.items[pos].clone()))
    }

    async fn create_one(&self, model: &ModelInfo, item: Item) -> Result<Item, RestError> {
        self.write_store()?.insert(model, item)
    }

    async fn create_many(&self, model: &ModelInfo, items: Vec<Item>) -> Result<Vec<Item>, RestError> {
        let mut store = self.write_store()?;
        let snapshot = (store.items.len(), store.sequence);
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match store.insert(model, item) {
                Ok(created) => out.push(created),
                Err(e) => {
                    store.items.truncate(snapshot.0);
                    store.sequence = snapshot.1;
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    async fn update_one(&self, model: &ModelInfo, item: Item, changes: Item) -> Result<Item, RestError> {
        self.write_store()?.update(model, &item, changes)
    }

    async fn update_many(&self, model: &ModelInfo, updates: Vec<(Item, Item)>) -> Result<Vec<Item>, RestError> {
        let mut store = self.write_store()?;
        let snapshot = store.items.clone();
        let mut out = Vec::with_capacity(updates.len());
        for (item, changes) in updates {
            match store.update(model, &item, changes) {
                Ok(updated) => out.push(updated),
                Err(e) => {
                    store.items = snapshot;
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    async fn delete_many(&self, model: &ModelInfo, ids: &[Value]) -> Result<(), RestError> {
        let id_attr = model.id_attribute.as_str();
        self.write_store()?.items.retain(|item| {
            let id = item.get(id_attr).unwrap_or(&Value::Null);
            !ids.iter().any(|d| loose_eq(id, d, None))
        });
        Ok(())
    }
}

fn sort_items(items: &mut [Item], sort: &[SortKey], model: &ModelInfo) {
    if sort.is_empty() {
        return;
    }
    let kinds: Vec<Option<FieldKind>> = sort
        .iter()
        .map(|k| model.schema.by_attribute(&k.attribute).map(|f| f.kind))
        .collect();
    items.sort_by(|a, b| {
        for (key, kind) in sort.iter().zip(&kinds) {
            let x = a.get(&key.attribute).unwrap_or(&Value::Null);
            let y = b.get(&key.attribute).unwrap_or(&Value::Null);
            // nulls sort first ascending
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => compare(x, y, *kind).unwrap_or(Ordering::Equal),
            };
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn matches(item: &Item, c: &Condition) -> bool {
    let field = item.get(&c.attribute).unwrap_or(&Value::Null);
    let kind = Some(c.kind);
    match c.op {
        FilterOp::Equal => loose_eq(field, &c.value, kind),
        FilterOp::NotEqual => !loose_eq(field, &c.value, kind),
        FilterOp::LessThan => ordered(field, &c.value, kind, |o| o == Ordering::Less),
        FilterOp::LessThanEqual => ordered(field, &c.value, kind, |o| o != Ordering::Greater),
        FilterOp::GreaterThan => ordered(field, &c.value, kind, |o| o == Ordering::Greater),
        FilterOp::GreaterThanEqual => ordered(field, &c.value, kind, |o| o != Ordering::Less),
        FilterOp::In => list(&c.value).iter().any(|v| loose_eq(field, v, kind)),
        FilterOp::NotIn => !list(&c.value).iter().any(|v| loose_eq(field, v, kind)),
        FilterOp::Contains => field
            .as_array()
            .map_or(false, |items| items.iter().any(|v| loose_eq(v, &c.value, None))),
        FilterOp::StringContains => text(field, &c.value, false, |f, v| f.contains(v)),
        FilterOp::StringIContains => text(field, &c.value, true, |f, v| f.contains(v)),
        FilterOp::StartsWith => text(field, &c.value, false, |f, v| f.starts_with(v)),
        FilterOp::IStartsWith => text(field, &c.value, true, |f, v| f.starts_with(v)),
        FilterOp::EndsWith => text(field, &c.value, false, |f, v| f.ends_with(v)),
        FilterOp::IEndsWith => text(field, &c.value, true, |f, v| f.ends_with(v)),
        FilterOp::DateBetween => match list(&c.value) {
            [low, high] => {
                ordered(field, low, kind, |o| o != Ordering::Less)
                    && ordered(field, high, kind, |o| o != Ordering::Greater)
            }
            _ => false,
        },
    }
}

fn list(v: &Value) -> &[Value] {
    v.as_array().map(Vec::as_slice).unwrap_or(&[])
}

fn ordered(field: &Value, value: &Value, kind: Option<FieldKind>, pred: impl Fn(Ordering) -> bool) -> bool {
    if field.is_null() || value.is_null() {
        return false;
    }
    compare(field, value, kind).map_or(false, pred)
}

fn text(field: &Value, value: &Value, ignore_case: bool, pred: impl Fn(&str, &str) -> bool) -> bool {
    match (field.as_str(), value.as_str()) {
        (Some(f), Some(v)) if ignore_case => pred(&f.to_lowercase(), &v.to_lowercase()),
        (Some(f), Some(v)) => pred(f, v),
        _ => false,
    }
}

fn loose_eq(a: &Value, b: &Value, kind: Option<FieldKind>) -> bool {
    if a.is_null() || b.is_null() {
        return a.is_null() && b.is_null();
    }
    match compare(a, b, kind) {
        Some(o) => o == Ordering::Equal,
        None => a == b,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Order two scalars. Decimals compare numerically, dates and datetimes chronologically.
fn compare(a: &Value, b: &Value, kind: Option<FieldKind>) -> Option<Ordering> {
    match (kind, a, b) {
        (Some(FieldKind::Decimal), _, _) | (_, Value::Number(_), Value::Number(_)) => {
            as_number(a)?.partial_cmp(&as_number(b)?)
        }
        (Some(FieldKind::DateTime), Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        (Some(FieldKind::Date), Value::String(x), Value::String(y)) => {
            match (NaiveDate::parse_from_str(x, "%Y-%m-%d"), NaiveDate::parse_from_str(y, "%Y-%m-%d")) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        (_, Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (_, Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, Schema};
    use serde_json::json;

    fn model() -> ModelInfo {
        ModelInfo {
            name: "book".into(),
            id_attribute: "id".into(),
            schema: Schema::new()
                .field(FieldDef::new("id", FieldKind::Integer))
                .field(FieldDef::new("title", FieldKind::String))
                .field(FieldDef::new("rating", FieldKind::Integer))
                .field(FieldDef::new("price", FieldKind::Decimal))
                .field(FieldDef::new("tags", FieldKind::List)),
        }
    }

    fn item(v: Value) -> Item {
        v.as_object().cloned().unwrap()
    }

    fn cond(attribute: &str, op: FilterOp, kind: FieldKind, value: Value) -> Condition {
        Condition {
            attribute: attribute.into(),
            op,
            kind,
            value,
        }
    }

    async fn seeded() -> MemoryBackend {
        let backend = MemoryBackend::new();
        let m = model();
        for (title, rating, price, tags) in [
            ("Dune", 5, "9.50", json!(["scifi"])),
            ("Emma", 3, "12.00", json!(["classic"])),
            ("Ubik", 4, "7.25", json!(["scifi", "short"])),
        ] {
            backend
                .create_one(&m, item(json!({"title": title, "rating": rating, "price": price, "tags": tags})))
                .await
                .unwrap();
        }
        backend
    }

    #[tokio::test]
    async fn assigns_sequential_ids_and_rejects_duplicates() {
        let backend = seeded().await;
        let m = model();
        let found = backend.read(&m, &json!(2)).await.unwrap().unwrap();
        assert_eq!(found["title"], json!("Emma"));
        let dup = backend.create_one(&m, item(json!({"id": 2, "title": "x"}))).await;
        assert!(matches!(dup, Err(RestError::BackendConflict(_))));
        let next = backend.create_one(&m, item(json!({"title": "y"}))).await.unwrap();
        assert_eq!(next["id"], json!(4));
    }

    #[tokio::test]
    async fn paginates_with_total_before_slicing() {
        let backend = seeded().await;
        let param = PageParam {
            page: 2,
            page_size: 2,
            ..Default::default()
        };
        let page = backend.paginate(&model(), &param).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0]["title"], json!("Ubik"));
    }

    #[tokio::test]
    async fn filters_and_sorts() {
        let backend = seeded().await;
        let param = PageParam {
            conditions: vec![
                cond("tags", FilterOp::Contains, FieldKind::List, json!("scifi")),
                cond("price", FilterOp::LessThan, FieldKind::Decimal, json!("10")),
            ],
            sort: vec![SortKey {
                attribute: "rating".into(),
                descending: false,
            }],
            ..Default::default()
        };
        let page = backend.paginate(&model(), &param).await.unwrap();
        let titles: Vec<_> = page.items.iter().map(|i| i["title"].clone()).collect();
        assert_eq!(titles, vec![json!("Ubik"), json!("Dune")]);

        let param = PageParam {
            conditions: vec![cond("title", FilterOp::StringIContains, FieldKind::String, json!("M"))],
            ..Default::default()
        };
        assert_eq!(backend.paginate(&model(), &param).await.unwrap().total, 1);

        let param = PageParam {
            conditions: vec![cond("rating", FilterOp::NotIn, FieldKind::Integer, json!([3, 4]))],
            ..Default::default()
        };
        assert_eq!(backend.paginate(&model(), &param).await.unwrap().items[0]["title"], json!("Dune"));
    }

    async fn titles_matching(backend: &MemoryBackend, conditions: Vec<Condition>) -> Vec<Value> {
        let param = PageParam {
            conditions,
            ..Default::default()
        };
        let page = backend.paginate(&model(), &param).await.unwrap();
        page.items.iter().map(|i| i["title"].clone()).collect()
    }

    #[tokio::test]
    async fn prefix_and_suffix_text_filters() {
        let backend = seeded().await;
        let t = |op, v: &str| vec![cond("title", op, FieldKind::String, json!(v))];
        assert_eq!(titles_matching(&backend, t(FilterOp::StartsWith, "Du")).await, vec![json!("Dune")]);
        assert!(titles_matching(&backend, t(FilterOp::StartsWith, "du")).await.is_empty());
        assert_eq!(titles_matching(&backend, t(FilterOp::IStartsWith, "du")).await, vec![json!("Dune")]);
        assert_eq!(titles_matching(&backend, t(FilterOp::EndsWith, "ma")).await, vec![json!("Emma")]);
        assert!(titles_matching(&backend, t(FilterOp::EndsWith, "IK")).await.is_empty());
        assert_eq!(titles_matching(&backend, t(FilterOp::IEndsWith, "IK")).await, vec![json!("Ubik")]);
    }

    #[tokio::test]
    async fn date_and_datetime_ranges() {
        let backend = MemoryBackend::new();
        let m = model();
        for (title, published, added) in [
            ("Dune", "1965-08-01", "2020-01-01T09:00:00Z"),
            ("Emma", "1815-12-23", "2021-06-15T12:30:00Z"),
            ("Ubik", "1969-05-01", "2021-06-15T08:00:00Z"),
        ] {
            backend
                .create_one(&m, item(json!({"title": title, "published": published, "added": added})))
                .await
                .unwrap();
        }

        let between = |low: &str, high: &str| {
            vec![cond("published", FilterOp::DateBetween, FieldKind::Date, json!([low, high]))]
        };
        assert_eq!(
            titles_matching(&backend, between("1960-01-01", "1969-05-01")).await,
            vec![json!("Dune"), json!("Ubik")]
        );
        assert!(titles_matching(&backend, between("1970-01-01", "1980-01-01")).await.is_empty());

        let after = vec![cond(
            "added",
            FilterOp::GreaterThan,
            FieldKind::DateTime,
            json!("2021-06-15T10:00:00+02:00"),
        )];
        // 10:00+02:00 is 08:00Z, so only the later 12:30Z entry matches
        assert_eq!(titles_matching(&backend, after).await, vec![json!("Emma")]);

        let window = vec![cond(
            "added",
            FilterOp::DateBetween,
            FieldKind::DateTime,
            json!(["2021-01-01T00:00:00Z", "2021-06-15T08:00:00Z"]),
        )];
        assert_eq!(titles_matching(&backend, window).await, vec![json!("Ubik")]);
    }

    #[tokio::test]
    async fn updates_and_deletes() {
        let backend = seeded().await;
        let m = model();
        let current = backend.read(&m, &json!(1)).await.unwrap().unwrap();
        let updated = backend
            .update_one(&m, current, item(json!({"rating": 1, "id": 99})))
            .await
            .unwrap();
        assert_eq!(updated["rating"], json!(1));
        assert_eq!(updated["id"], json!(1));

        backend.delete_many(&m, &[json!(1), json!(3)]).await.unwrap();
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_create_leaves_store_unchanged() {
        let backend = seeded().await;
        let m = model();
        let res = backend
            .create_many(&m, vec![item(json!({"title": "a"})), item(json!({"id": 1, "title": "b"}))])
            .await;
        assert!(res.is_err());
        assert_eq!(backend.len(), 3);
    }

    #[test]
    fn compares_dates_chronologically() {
        let a = json!("2021-01-01T10:00:00Z");
        let b = json!("2021-01-01T09:00:00.5Z");
        assert_eq!(compare(&a, &b, Some(FieldKind::DateTime)), Some(Ordering::Greater));
        assert!(loose_eq(&json!("2.50"), &json!("2.5"), Some(FieldKind::Decimal)));
    }
}
