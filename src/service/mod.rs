//! Request-level CRUD semantics on top of a [`Backend`]: filter parsing, schema loading, hooks.

mod hooks;

pub use hooks::{NoHooks, ServiceHooks};

use crate::backend::{Backend, ModelInfo, Pagination};
use crate::case::to_snake_case;
use crate::error::{ConfigError, RestError};
use crate::filters::{
    convert_filters, filters_for_fields, legitimize_where_with, BoundFilters, Condition, FiltersExpr, ListQuery, PageParam,
    SortKey,
};
use crate::resource::ResourceMeta;
use crate::schema::{FieldKind, Item, Schema};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of a write that accepts either one object or an array of objects.
#[derive(Clone, Debug, PartialEq)]
pub enum Items {
    One(Item),
    Many(Vec<Item>),
}

impl Items {
    /// Serialize through `schema`, keeping the one-or-many shape.
    pub fn dump(&self, schema: &Schema) -> Value {
        match self {
            Items::One(item) => schema.dump(item),
            Items::Many(items) => Value::Array(schema.dump_many(items)),
        }
    }
}

pub struct Service {
    model: ModelInfo,
    backend: Arc<dyn Backend>,
    hooks: Arc<dyn ServiceHooks>,
    filters: BTreeMap<String, BoundFilters>,
    /// Sortable field name -> attribute.
    sort_fields: BTreeMap<String, String>,
}

impl Service {
    pub fn new(
        meta: &ResourceMeta,
        schema: Schema,
        backend: Arc<dyn Backend>,
        hooks: Arc<dyn ServiceHooks>,
    ) -> Result<Self, ConfigError> {
        if let FiltersExpr::Fields(map) = &meta.filters {
            if let Some(unknown) = map.keys().find(|k| *k != "*" && schema.get(k).is_none()) {
                return Err(ConfigError::UnknownField {
                    resource: meta.name.clone(),
                    field: unknown.clone(),
                });
            }
        }
        let filters = filters_for_fields(schema.dump_fields(), &meta.filters, &backend.filter_table())?;
        let sort_fields = if meta.sortable {
            filters
                .values()
                .filter(|b| b.kind.is_sortable())
                .map(|b| (b.field.clone(), b.attribute.clone()))
                .collect()
        } else {
            BTreeMap::new()
        };
        Ok(Service {
            model: ModelInfo {
                name: meta.name.clone(),
                id_attribute: meta.id_attribute.clone(),
                schema,
            },
            backend,
            hooks,
            filters,
            sort_fields,
        })
    }

    pub fn model(&self) -> &ModelInfo {
        &self.model
    }

    pub fn schema(&self) -> &Schema {
        &self.model.schema
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Allowed filters by field name.
    pub fn filters(&self) -> &BTreeMap<String, BoundFilters> {
        &self.filters
    }

    /// Name under which the id appears in request and response bodies.
    pub fn id_field_name(&self) -> &str {
        self.model
            .schema
            .by_attribute(&self.model.id_attribute)
            .map_or(self.model.id_attribute.as_str(), |f| f.name.as_str())
    }

    fn is_field_name(&self, name: &str) -> bool {
        let schema = &self.model.schema;
        schema.get(name).is_some() || schema.get(&to_snake_case(name)).is_some() || schema.by_attribute(name).is_some()
    }

    fn lookup_filters(&self, name: &str) -> Option<&BoundFilters> {
        self.filters
            .get(name)
            .or_else(|| self.filters.get(&to_snake_case(name)))
            .or_else(|| self.filters.values().find(|b| b.attribute == name))
    }

    fn lookup_sort(&self, name: &str) -> Option<&String> {
        self.sort_fields
            .get(name)
            .or_else(|| self.sort_fields.get(&to_snake_case(name)))
            .or_else(|| self.sort_fields.values().find(|attr| *attr == name))
    }

    /// Resolve raw list parameters against this resource's filters and sortable fields.
    ///
    /// Names in `where` must be filterable (`FilterNotAllow` otherwise); plain query keys
    /// that match no filterable field are ignored.
    pub fn parse_request(&self, query: &ListQuery) -> Result<PageParam, RestError> {
        let is_field = |name: &str| self.is_field_name(name);
        let where_ = legitimize_where_with(query.where_.clone(), is_field);
        let flat = legitimize_where_with(query.flat.clone(), is_field);
        let mut conditions = Vec::new();
        for (name, value) in &where_ {
            let bound = self
                .lookup_filters(name)
                .ok_or_else(|| RestError::FilterNotAllow(name.clone()))?;
            conditions.extend(convert_filters(value, bound)?);
        }
        for (name, value) in &flat {
            match self.lookup_filters(name) {
                Some(bound) => conditions.extend(convert_filters(value, bound)?),
                None => tracing::debug!(resource = %self.model.name, param = %name, "ignoring query param"),
            }
        }
        let sort = query
            .sort
            .iter()
            .map(|(name, descending)| {
                let attribute = self
                    .lookup_sort(name)
                    .ok_or_else(|| RestError::InvalidParam(format!("cannot sort by {}", name)))?;
                Ok(SortKey {
                    attribute: attribute.clone(),
                    descending: *descending,
                })
            })
            .collect::<Result<Vec<_>, RestError>>()?;
        Ok(PageParam {
            page: query.page,
            page_size: query.page_size,
            if_page: query.if_page,
            conditions,
            sort,
        })
    }

    pub async fn paginated_instances(&self, param: &PageParam) -> Result<Pagination, RestError> {
        let page = self.backend.paginate(&self.model, param).await?;
        tracing::debug!(
            resource = %self.model.name,
            page = page.page,
            returned = page.items.len(),
            total = page.total,
            "listed"
        );
        Ok(page)
    }

    pub async fn instances(&self, conditions: &[Condition], sort: &[SortKey]) -> Result<Vec<Item>, RestError> {
        self.backend.instances(&self.model, conditions, sort).await
    }

    /// First match in sort order, or `ItemNotFound`.
    pub async fn first(&self, conditions: &[Condition], sort: &[SortKey]) -> Result<Item, RestError> {
        let param = PageParam {
            page: 1,
            page_size: 1,
            if_page: true,
            conditions: conditions.to_vec(),
            sort: sort.to_vec(),
        };
        self.backend
            .paginate(&self.model, &param)
            .await?
            .items
            .into_iter()
            .next()
            .ok_or_else(|| RestError::not_found(&self.model.name))
    }

    /// Normalize an id to the id field's kind.
    pub fn coerce_id(&self, id: &Value) -> Result<Value, RestError> {
        let kind = self
            .model
            .schema
            .by_attribute(&self.model.id_attribute)
            .map(|f| f.kind)
            .unwrap_or(FieldKind::Raw);
        kind.coerce(id)
            .map_err(|e| RestError::InvalidParam(format!("{}: {}", self.id_field_name(), e)))
    }

    pub async fn read(&self, id: &Value) -> Result<Option<Item>, RestError> {
        self.backend.read(&self.model, id).await
    }

    pub async fn read_or_raise(&self, id: &Value) -> Result<Item, RestError> {
        self.read(id)
            .await?
            .ok_or_else(|| RestError::not_found(format!("{} {}", self.model.name, id)))
    }

    /// Create from an object or an array of objects.
    pub async fn create(&self, properties: &Value) -> Result<Items, RestError> {
        match properties {
            Value::Array(_) => {
                let items = self.model.schema.load_many(properties, false)?;
                Ok(Items::Many(self.create_many(items).await?))
            }
            _ => {
                let item = self.model.schema.load(properties, false)?;
                Ok(Items::One(self.create_one(item).await?))
            }
        }
    }

    pub async fn create_one(&self, item: Item) -> Result<Item, RestError> {
        let mut items = vec![item];
        self.hooks.before_create(&mut items).await?;
        let mut item = items.pop().unwrap_or_default();
        self.model.schema.normalize(&mut item)?;
        let created = self.backend.create_one(&self.model, item).await?;
        self.hooks.after_create(std::slice::from_ref(&created)).await?;
        tracing::info!(resource = %self.model.name, id = %id_display(&self.model, &created), "created");
        Ok(created)
    }

    pub async fn create_many(&self, mut items: Vec<Item>) -> Result<Vec<Item>, RestError> {
        self.hooks.before_create(&mut items).await?;
        for item in items.iter_mut() {
            self.model.schema.normalize(item)?;
        }
        let created = self.backend.create_many(&self.model, items).await?;
        self.hooks.after_create(&created).await?;
        tracing::info!(resource = %self.model.name, count = created.len(), "created");
        Ok(created)
    }

    /// Update from an object or an array of objects; each must carry the id.
    pub async fn update(&self, properties: &Value) -> Result<Items, RestError> {
        match properties {
            Value::Array(list) => {
                let mut updates = Vec::with_capacity(list.len());
                for props in list {
                    let item = self.read_or_raise(&self.id_from_body(props)?).await?;
                    let changes = self.model.schema.load(props, true)?;
                    updates.push((item, changes));
                }
                Ok(Items::Many(self.update_many(updates).await?))
            }
            _ => {
                let item = self.read_or_raise(&self.id_from_body(properties)?).await?;
                let changes = self.model.schema.load(properties, true)?;
                Ok(Items::One(self.update_one(item, changes).await?))
            }
        }
    }

    fn id_from_body(&self, props: &Value) -> Result<Value, RestError> {
        let id_name = self.id_field_name();
        match props.get(id_name) {
            Some(id) if !id.is_null() => self.coerce_id(id),
            _ => Err(RestError::Validation(format!("{} is required", id_name))),
        }
    }

    pub async fn update_one(&self, item: Item, changes: Item) -> Result<Item, RestError> {
        let items = [item];
        let mut changes = vec![changes];
        self.hooks.before_update(&items, &mut changes).await?;
        let [item] = items;
        let mut changes = changes.pop().unwrap_or_default();
        self.model.schema.normalize(&mut changes)?;
        let updated = self.backend.update_one(&self.model, item, changes).await?;
        self.hooks.after_update(std::slice::from_ref(&updated)).await?;
        tracing::info!(resource = %self.model.name, id = %id_display(&self.model, &updated), "updated");
        Ok(updated)
    }

    pub async fn update_many(&self, updates: Vec<(Item, Item)>) -> Result<Vec<Item>, RestError> {
        let (items, mut changes): (Vec<Item>, Vec<Item>) = updates.into_iter().unzip();
        self.hooks.before_update(&items, &mut changes).await?;
        for change in changes.iter_mut() {
            self.model.schema.normalize(change)?;
        }
        let updated = self
            .backend
            .update_many(&self.model, items.into_iter().zip(changes).collect())
            .await?;
        self.hooks.after_update(&updated).await?;
        tracing::info!(resource = %self.model.name, count = updated.len(), "updated");
        Ok(updated)
    }

    /// Delete one id (must exist) or an array of ids.
    pub async fn delete(&self, ids: &Value) -> Result<(), RestError> {
        match ids {
            Value::Array(list) => {
                let ids = list.iter().map(|id| self.coerce_id(id)).collect::<Result<Vec<_>, _>>()?;
                self.delete_many(&ids).await
            }
            id => self.delete_one(&self.coerce_id(id)?).await,
        }
    }

    pub async fn delete_one(&self, id: &Value) -> Result<(), RestError> {
        self.read_or_raise(id).await?;
        let ids = std::slice::from_ref(id);
        self.hooks.before_delete(ids).await?;
        self.backend.delete_one(&self.model, id).await?;
        self.hooks.after_delete(ids).await?;
        tracing::info!(resource = %self.model.name, id = %id, "deleted");
        Ok(())
    }

    pub async fn delete_many(&self, ids: &[Value]) -> Result<(), RestError> {
        self.hooks.before_delete(ids).await?;
        self.backend.delete_many(&self.model, ids).await?;
        self.hooks.after_delete(ids).await?;
        tracing::info!(resource = %self.model.name, count = ids.len(), "deleted");
        Ok(())
    }
}

fn id_display(model: &ModelInfo, item: &Item) -> String {
    item.get(&model.id_attribute).map(Value::to_string).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::ApiConfig;
    use crate::filters::FilterOp;
    use crate::schema::FieldDef;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn meta() -> ResourceMeta {
        ResourceMeta::new("book")
    }

    fn schema() -> Schema {
        Schema::new()
            .field(FieldDef::new("id", FieldKind::Integer).dump_only())
            .field(FieldDef::new("title", FieldKind::String).required())
            .field(FieldDef::new("rating", FieldKind::Integer))
            .field(FieldDef::new("yearPublished", FieldKind::Integer).attribute("year_published"))
            .field(FieldDef::new("tags", FieldKind::List))
    }

    fn service() -> Service {
        Service::new(&meta(), schema(), Arc::new(MemoryBackend::new()), Arc::new(NoHooks)).unwrap()
    }

    fn query(pairs: &[(&str, &str)]) -> ListQuery {
        let params: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ListQuery::from_params(&params, &ApiConfig::default()).unwrap()
    }

    async fn seed(service: &Service) {
        service
            .create(&json!([
                {"title": "Dune", "rating": 5, "yearPublished": 1965, "tags": ["scifi"]},
                {"title": "Emma", "rating": 3, "yearPublished": 1815, "tags": ["classic"]},
                {"title": "Ubik", "rating": 4, "yearPublished": 1969, "tags": ["scifi"]}
            ]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn parse_request_resolves_names() {
        let s = service();
        let param = s
            .parse_request(&query(&[
                ("where", r#"{"yearPublished": {"$gte": 1900}}"#),
                ("rating_lt", "5"),
                ("unrelated", "x"),
                ("sort", "year_published desc"),
            ]))
            .unwrap();
        assert_eq!(param.conditions.len(), 2);
        assert_eq!(param.conditions[0].attribute, "year_published");
        assert_eq!(param.conditions[0].op, FilterOp::GreaterThanEqual);
        assert_eq!(param.conditions[1].value, json!(5));
        assert_eq!(param.sort[0].attribute, "year_published");
        assert!(param.sort[0].descending);
    }

    #[tokio::test]
    async fn parse_request_rejects_unknown_where_and_sort() {
        let s = service();
        assert!(matches!(
            s.parse_request(&query(&[("where", r#"{"nope": 1}"#)])),
            Err(RestError::FilterNotAllow(_))
        ));
        assert!(matches!(
            s.parse_request(&query(&[("sort", "tags")])),
            Err(RestError::InvalidParam(_))
        ));
    }

    #[test]
    fn filter_policy_must_name_known_fields() {
        let mut meta = meta();
        meta.filters = serde_json::from_value(json!({"missing": true})).unwrap();
        let res = Service::new(&meta, schema(), Arc::new(MemoryBackend::new()), Arc::new(NoHooks));
        assert!(matches!(res, Err(ConfigError::UnknownField { .. })));
    }

    #[test]
    fn sort_is_limited_to_filterable_fields() {
        let meta = meta().filters(FiltersExpr::All(false));
        let s = Service::new(&meta, schema(), Arc::new(MemoryBackend::new()), Arc::new(NoHooks)).unwrap();
        assert!(matches!(
            s.parse_request(&query(&[("sort", "title")])),
            Err(RestError::InvalidParam(_))
        ));

        let meta = ResourceMeta::new("book").filters(serde_json::from_value(json!({"title": true})).unwrap());
        let s = Service::new(&meta, schema(), Arc::new(MemoryBackend::new()), Arc::new(NoHooks)).unwrap();
        assert_eq!(s.parse_request(&query(&[("sort", "title")])).unwrap().sort.len(), 1);
        assert!(matches!(
            s.parse_request(&query(&[("sort", "rating")])),
            Err(RestError::InvalidParam(_))
        ));
    }

    #[test]
    fn unsortable_resource_rejects_every_sort() {
        let meta = meta().sortable(false);
        let s = Service::new(&meta, schema(), Arc::new(MemoryBackend::new()), Arc::new(NoHooks)).unwrap();
        assert!(matches!(
            s.parse_request(&query(&[("sort", "title")])),
            Err(RestError::InvalidParam(_))
        ));
        assert!(s.parse_request(&query(&[("title", "Dune")])).is_ok());
    }

    #[test]
    fn field_names_ending_in_a_filter_name_stay_whole() {
        let schema = schema().field(FieldDef::new("opt_in", FieldKind::Boolean));
        let s = Service::new(&meta(), schema, Arc::new(MemoryBackend::new()), Arc::new(NoHooks)).unwrap();
        let param = s
            .parse_request(&query(&[("opt_in", "true"), ("where", r#"{"rating_gte": 4, "rating": 5}"#)]))
            .unwrap();
        let opt_in = param.conditions.iter().find(|c| c.attribute == "opt_in").unwrap();
        assert_eq!((opt_in.op, &opt_in.value), (FilterOp::Equal, &json!(true)));
        let rating_ops: Vec<FilterOp> = param
            .conditions
            .iter()
            .filter(|c| c.attribute == "rating")
            .map(|c| c.op)
            .collect();
        assert_eq!(rating_ops, vec![FilterOp::GreaterThanEqual, FilterOp::Equal]);
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let s = service();
        seed(&s).await;
        let param = s
            .parse_request(&query(&[("tags_contains", "scifi"), ("sort", "rating"), ("page_size", "1")]))
            .unwrap();
        let page = s.paginated_instances(&param).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0]["title"], json!("Ubik"));

        let first = s.first(&[], &[SortKey { attribute: "rating".into(), descending: true }]).await.unwrap();
        assert_eq!(first["title"], json!("Dune"));
    }

    #[tokio::test]
    async fn create_validates_and_ignores_dump_only_id() {
        let s = service();
        assert!(matches!(s.create(&json!({"rating": 1})).await, Err(RestError::Validation(_))));
        let created = s.create(&json!({"id": 50, "title": "Solaris"})).await.unwrap();
        let Items::One(item) = created else { panic!("expected one item") };
        assert_eq!(item["id"], json!(1));
    }

    #[tokio::test]
    async fn update_requires_id_and_existing_item() {
        let s = service();
        seed(&s).await;
        assert!(matches!(s.update(&json!({"rating": 1})).await, Err(RestError::Validation(_))));
        assert!(matches!(
            s.update(&json!({"id": 99, "rating": 1})).await,
            Err(RestError::ItemNotFound(_))
        ));
        let updated = s.update(&json!([{"id": 1, "rating": 1}, {"id": "2", "rating": 2}])).await.unwrap();
        let Items::Many(items) = updated else { panic!("expected many items") };
        assert_eq!(items[1]["rating"], json!(2));
        assert_eq!(s.read_or_raise(&json!(1)).await.unwrap()["rating"], json!(1));
    }

    #[tokio::test]
    async fn delete_one_checks_existence() {
        let s = service();
        seed(&s).await;
        assert!(matches!(s.delete(&json!(42)).await, Err(RestError::ItemNotFound(_))));
        s.delete(&json!("1")).await.unwrap();
        s.delete(&json!([2, 3, 42])).await.unwrap();
        assert!(s.instances(&[], &[]).await.unwrap().is_empty());
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ServiceHooks for Recorder {
        async fn before_create(&self, items: &mut [Item]) -> Result<(), RestError> {
            for item in items.iter_mut() {
                let rating = if item["title"] == json!("Bad") { json!("high") } else { json!("0") };
                item.insert("rating".into(), rating);
            }
            self.calls.lock().unwrap().push("before_create".into());
            Ok(())
        }

        async fn after_create(&self, items: &[Item]) -> Result<(), RestError> {
            self.calls.lock().unwrap().push(format!("after_create:{}", items.len()));
            Ok(())
        }

        async fn before_delete(&self, _ids: &[Value]) -> Result<(), RestError> {
            Err(RestError::BadRequest("books are forever".into()))
        }
    }

    #[tokio::test]
    async fn hooks_wrap_writes() {
        let hooks = Arc::new(Recorder::default());
        let s = Service::new(&meta(), schema(), Arc::new(MemoryBackend::new()), hooks.clone()).unwrap();
        let Items::One(item) = s.create(&json!({"title": "Dune", "rating": 5})).await.unwrap() else {
            panic!("expected one item")
        };
        assert_eq!(item["rating"], json!(0));
        assert_eq!(*hooks.calls.lock().unwrap(), vec!["before_create", "after_create:1"]);
        assert!(matches!(s.delete(&json!(1)).await, Err(RestError::BadRequest(_))));
        assert!(s.read(&json!(1)).await.unwrap().is_some());
        assert!(matches!(s.create(&json!({"title": "Bad"})).await, Err(RestError::Validation(_))));
    }
}
