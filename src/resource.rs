//! Resource declarations and the bound resource served by an [`crate::Api`].

use crate::backend::Backend;
use crate::config::ApiConfig;
use crate::error::{ConfigError, RestError};
use crate::filters::FiltersExpr;
use crate::route::Route;
use crate::schema::Schema;
use crate::service::{NoHooks, Service, ServiceHooks};
use axum::routing::MethodRouter;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Wraps the method router of one route (auth, extra layers, ...).
pub type RouteDecorator = Arc<dyn Fn(MethodRouter) -> MethodRouter + Send + Sync>;

/// How the `:id` path segment is parsed before reading the item.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdConverter {
    #[default]
    Int,
    String,
    Uuid,
}

impl IdConverter {
    /// `None` when the segment cannot be an id of this kind.
    pub fn parse(self, raw: &str) -> Option<Value> {
        match self {
            IdConverter::Int => raw.parse::<i64>().ok().map(Value::from),
            IdConverter::String => Some(Value::String(raw.to_string())),
            IdConverter::Uuid => uuid::Uuid::parse_str(raw).ok().map(|u| Value::String(u.to_string())),
        }
    }
}

fn default_id_attribute() -> String {
    "id".into()
}

fn default_true() -> bool {
    true
}

/// Declarative description of a resource.
#[derive(Clone, Debug, Deserialize)]
pub struct ResourceMeta {
    /// Collection path segment and endpoint prefix.
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_id_attribute")]
    pub id_attribute: String,
    #[serde(default)]
    pub id_converter: IdConverter,
    #[serde(default)]
    pub filters: FiltersExpr,
    #[serde(default = "default_true")]
    pub sortable: bool,
    /// Relation names of built-in routes not to mount.
    #[serde(default)]
    pub exclude_routes: Vec<String>,
}

impl ResourceMeta {
    pub fn new(name: impl Into<String>) -> Self {
        ResourceMeta {
            name: name.into(),
            title: None,
            description: None,
            id_attribute: default_id_attribute(),
            id_converter: IdConverter::default(),
            filters: FiltersExpr::default(),
            sortable: true,
            exclude_routes: Vec::new(),
        }
    }

    pub fn id_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.id_attribute = attribute.into();
        self
    }

    pub fn id_converter(mut self, converter: IdConverter) -> Self {
        self.id_converter = converter;
        self
    }

    pub fn filters(mut self, filters: FiltersExpr) -> Self {
        self.filters = filters;
        self
    }

    pub fn sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    pub fn exclude_routes<I, S>(mut self, rels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_routes = rels.into_iter().map(Into::into).collect();
        self
    }
}

/// Collects a resource declaration until an [`crate::Api`] binds it.
pub struct ResourceBuilder {
    meta: ResourceMeta,
    schema: Schema,
    backend: Option<Arc<dyn Backend>>,
    hooks: Arc<dyn ServiceHooks>,
    routes: Vec<Route>,
    route_decorators: HashMap<String, Vec<RouteDecorator>>,
}

impl ResourceBuilder {
    pub fn new(meta: ResourceMeta, schema: Schema) -> Self {
        ResourceBuilder {
            meta,
            schema,
            backend: None,
            hooks: Arc::new(NoHooks),
            routes: Vec::new(),
            route_decorators: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn backend(mut self, backend: impl Backend + 'static) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    pub fn shared_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn hooks(mut self, hooks: impl ServiceHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Add a custom route. A route with the same relation as a built-in one replaces it.
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Wrap the route with relation `rel`. Decorators apply in the order given.
    pub fn decorate<F>(mut self, rel: impl Into<String>, decorator: F) -> Self
    where
        F: Fn(MethodRouter) -> MethodRouter + Send + Sync + 'static,
    {
        self.route_decorators
            .entry(rel.into())
            .or_default()
            .push(Arc::new(decorator));
        self
    }

    pub(crate) fn build(
        self,
        config: ApiConfig,
        default_backend: Option<&crate::api::BackendFactory>,
    ) -> Result<ModelResource, ConfigError> {
        let backend = match (self.backend, default_backend) {
            (Some(b), _) => b,
            (None, Some(factory)) => factory(&self.meta),
            (None, None) => return Err(ConfigError::MissingBackend(self.meta.name.clone())),
        };
        let service = Service::new(&self.meta, self.schema, backend, self.hooks)?;

        let mut routes: Vec<Route> = Route::builtins()
            .into_iter()
            .filter(|r| !self.meta.exclude_routes.contains(&r.rel))
            .filter(|r| !self.routes.iter().any(|c| c.rel == r.rel))
            .collect();
        routes.extend(
            self.routes
                .into_iter()
                .filter(|r| !self.meta.exclude_routes.contains(&r.rel)),
        );

        Ok(ModelResource {
            meta: self.meta,
            service,
            routes,
            route_decorators: self.route_decorators,
            config,
        })
    }
}

/// A resource bound to an api: its service, its mounted routes, and the api settings.
pub struct ModelResource {
    pub meta: ResourceMeta,
    pub service: Service,
    routes: Vec<Route>,
    route_decorators: HashMap<String, Vec<RouteDecorator>>,
    config: ApiConfig,
}

impl fmt::Debug for ModelResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelResource")
            .field("meta", &self.meta)
            .field("routes", &self.routes)
            .finish()
    }
}

impl ModelResource {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub(crate) fn decorators_for(&self, rel: &str) -> &[RouteDecorator] {
        self.route_decorators.get(rel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parse the `:id` path segment, then normalize it to the id field's kind.
    pub fn parse_id(&self, raw: &str) -> Result<Value, RestError> {
        let id = self
            .meta
            .id_converter
            .parse(raw)
            .ok_or_else(|| RestError::not_found(format!("{} {}", self.meta.name, raw)))?;
        self.service
            .coerce_id(&id)
            .map_err(|_| RestError::not_found(format!("{} {}", self.meta.name, raw)))
    }

    /// Read the item named by a path segment, or `ItemNotFound`.
    pub async fn item(&self, raw_id: &str) -> Result<crate::schema::Item, RestError> {
        let id = self.parse_id(raw_id)?;
        self.service.read_or_raise(&id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::schema::{FieldDef, FieldKind};
    use serde_json::json;

    #[test]
    fn id_converters() {
        assert_eq!(IdConverter::Int.parse("12"), Some(json!(12)));
        assert_eq!(IdConverter::Int.parse("x"), None);
        assert_eq!(IdConverter::String.parse("x"), Some(json!("x")));
        assert_eq!(IdConverter::Uuid.parse("nope"), None);
    }

    #[test]
    fn meta_from_json_uses_defaults() {
        let meta: ResourceMeta = serde_json::from_value(json!({"name": "books", "exclude_routes": ["create_many"]})).unwrap();
        assert_eq!(meta.id_attribute, "id");
        assert_eq!(meta.id_converter, IdConverter::Int);
        assert!(meta.sortable);
        assert_eq!(meta.filters, FiltersExpr::All(true));
    }

    #[test]
    fn build_applies_exclusions_and_overrides() {
        let schema = Schema::new().field(FieldDef::new("id", FieldKind::Integer));
        let meta = ResourceMeta::new("books").exclude_routes(["create_many", "update_many"]);
        let resource = ResourceBuilder::new(meta, schema.clone())
            .backend(MemoryBackend::new())
            .build(ApiConfig::default(), None)
            .unwrap();
        assert_eq!(resource.routes().len(), 7);
        assert!(resource.routes().iter().all(|r| r.rel != "create_many"));

        let missing = ResourceBuilder::new(ResourceMeta::new("books"), schema).build(ApiConfig::default(), None);
        assert!(matches!(missing, Err(ConfigError::MissingBackend(_))));
    }
}
