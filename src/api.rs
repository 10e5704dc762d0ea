//! The api: binds resources, mounts their routes, and hands out the axum router.

use crate::backend::Backend;
use crate::config::ApiConfig;
use crate::error::ConfigError;
use crate::handlers;
use crate::resource::{ModelResource, ResourceBuilder, ResourceMeta, RouteDecorator};
use crate::route::{Route, RouteHandler};
use axum::{
    extract::{Path, Query, State},
    http::Method,
    routing::{on, MethodFilter, MethodRouter},
    Json, Router,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Builds the backend of a resource declared without one.
pub type BackendFactory = Arc<dyn Fn(&ResourceMeta) -> Arc<dyn Backend> + Send + Sync>;

/// One mounted route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub method: Method,
    pub path: String,
    /// `{resource}_{rel}`.
    pub name: String,
}

pub struct Api {
    config: ApiConfig,
    decorators: Vec<RouteDecorator>,
    default_backend: Option<BackendFactory>,
    resources: BTreeMap<String, Arc<ModelResource>>,
    endpoints: Vec<Endpoint>,
    router: Router,
}

impl Api {
    pub fn new(config: ApiConfig) -> Self {
        Api {
            config,
            decorators: Vec::new(),
            default_backend: None,
            resources: BTreeMap::new(),
            endpoints: Vec::new(),
            router: Router::new(),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Backend for resources that do not set their own.
    pub fn default_backend<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ResourceMeta) -> Arc<dyn Backend> + Send + Sync + 'static,
    {
        self.default_backend = Some(Arc::new(factory));
        self
    }

    /// Wrap every route (except those that opt out) added after this call.
    pub fn decorator<F>(mut self, decorator: F) -> Self
    where
        F: Fn(MethodRouter) -> MethodRouter + Send + Sync + 'static,
    {
        self.decorators.push(Arc::new(decorator));
        self
    }

    /// Bind a resource and mount its routes. Adding a name that is already bound keeps the first binding.
    pub fn add_resource(&mut self, builder: ResourceBuilder) -> Result<Arc<ModelResource>, ConfigError> {
        if let Some(existing) = self.resources.get(builder.name()) {
            tracing::warn!(resource = %builder.name(), "resource already added, ignoring");
            return Ok(existing.clone());
        }
        let resource = Arc::new(builder.build(self.config.clone(), self.default_backend.as_ref())?);

        let mut mounted = Vec::new();
        for route in resource.routes() {
            let path = route.path(&self.config.prefix, resource.name());
            let name = route.endpoint(resource.name());
            let clash = self
                .endpoints
                .iter()
                .chain(&mounted)
                .any(|e: &Endpoint| e.name == name || (e.path == path && e.method == route.method));
            if clash {
                return Err(ConfigError::DuplicateEndpoint(format!("{} {} ({})", route.method, path, name)));
            }
            mounted.push(Endpoint {
                method: route.method.clone(),
                path,
                name,
            });
        }

        let mut router = std::mem::replace(&mut self.router, Router::new());
        for (route, endpoint) in resource.routes().iter().zip(&mounted) {
            let method_router = self.method_router(&resource, route)?;
            tracing::debug!(method = %endpoint.method, path = %endpoint.path, endpoint = %endpoint.name, "mounted");
            router = router.route(&endpoint.path, method_router);
        }
        self.router = router;
        tracing::info!(resource = %resource.name(), routes = mounted.len(), "resource added");
        self.endpoints.extend(mounted);
        self.resources.insert(resource.name().to_string(), resource.clone());
        Ok(resource)
    }

    fn method_router(&self, resource: &Arc<ModelResource>, route: &Route) -> Result<MethodRouter, ConfigError> {
        let filter = MethodFilter::try_from(route.method.clone()).map_err(|_| ConfigError::UnsupportedMethod {
            rel: route.rel.clone(),
            method: route.method.to_string(),
        })?;
        let mr: MethodRouter<Arc<ModelResource>> = match &route.handler {
            RouteHandler::Instances => on(filter, handlers::instances),
            RouteHandler::Instance => on(filter, handlers::instance),
            RouteHandler::CreateEntrance => on(filter, handlers::create_entrance),
            RouteHandler::CreateMany => on(filter, handlers::create_many),
            RouteHandler::UpdateEntrance => on(filter, handlers::update_entrance),
            RouteHandler::UpdateMany => on(filter, handlers::update_many),
            RouteHandler::UpdateInstance => on(filter, handlers::update_instance),
            RouteHandler::DeleteEntrance => on(filter, handlers::delete_entrance),
            RouteHandler::DeleteInstance => on(filter, handlers::delete_instance),
            RouteHandler::Collection(action) => {
                let action = action.clone();
                on(
                    filter,
                    move |State(res): State<Arc<ModelResource>>,
                          Query(query): Query<HashMap<String, String>>,
                          body: Option<Json<Value>>| {
                        handlers::run_collection(res, action.clone(), query, body)
                    },
                )
            }
            RouteHandler::Item(action) => {
                let action = action.clone();
                on(
                    filter,
                    move |State(res): State<Arc<ModelResource>>,
                          Path(id): Path<String>,
                          Query(query): Query<HashMap<String, String>>,
                          body: Option<Json<Value>>| {
                        handlers::run_item(res, action.clone(), id, query, body)
                    },
                )
            }
        };
        let mut mr: MethodRouter = mr.with_state(resource.clone());
        for decorator in resource.decorators_for(&route.rel) {
            mr = decorator(mr);
        }
        if !route.skip_api_decorators {
            for decorator in &self.decorators {
                mr = decorator(mr);
            }
        }
        Ok(mr)
    }

    pub fn resource(&self, name: &str) -> Option<Arc<ModelResource>> {
        self.resources.get(name).cloned()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// The router serving every bound resource, with the request body limit applied.
    pub fn router(&self) -> Router {
        self.router
            .clone()
            .layer(RequestBodyLimitLayer::new(self.config.body_limit))
    }
}
