//! Route declarations: the built-in CRUD routes plus custom collection and item actions.

use crate::case::to_camel_case;
use crate::error::RestError;
use crate::resource::ModelResource;
use crate::schema::Item;
use async_trait::async_trait;
use axum::http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Whether a route is mounted under `/{resource}` or `/{resource}/:id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteScope {
    Collection,
    Item,
}

/// Query string and JSON body of a custom action request.
#[derive(Clone, Debug, Default)]
pub struct ActionInput {
    pub query: HashMap<String, String>,
    pub body: Option<Value>,
}

/// A custom route on the collection, e.g. `GET /books/top_rated`.
#[async_trait]
pub trait CollectionAction: Send + Sync {
    async fn call(&self, resource: &ModelResource, input: ActionInput) -> Result<Value, RestError>;
}

/// A custom route on one item, e.g. `POST /books/:id/publish`. The item is read before the call;
/// a missing id answers 404 without reaching the action.
#[async_trait]
pub trait ItemAction: Send + Sync {
    async fn call(&self, resource: &ModelResource, item: Item, input: ActionInput) -> Result<Value, RestError>;
}

#[derive(Clone)]
pub(crate) enum RouteHandler {
    Instances,
    Instance,
    CreateEntrance,
    CreateMany,
    UpdateEntrance,
    UpdateMany,
    UpdateInstance,
    DeleteEntrance,
    DeleteInstance,
    Collection(Arc<dyn CollectionAction>),
    Item(Arc<dyn ItemAction>),
}

#[derive(Clone)]
pub struct Route {
    pub method: Method,
    /// Path suffix after the collection or item path; empty for the path itself.
    pub rule: String,
    /// Relation name; the endpoint is `{resource}_{rel}`.
    pub rel: String,
    pub scope: RouteScope,
    /// Mount without the api-wide decorators.
    pub skip_api_decorators: bool,
    pub(crate) handler: RouteHandler,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("rule", &self.rule)
            .field("rel", &self.rel)
            .field("scope", &self.scope)
            .finish()
    }
}

fn normalize_rule(rule: &str) -> String {
    let rule = rule.trim_end_matches('/');
    if rule.is_empty() || rule.starts_with('/') {
        rule.to_string()
    } else {
        format!("/{}", rule)
    }
}

impl Route {
    fn builtin(method: Method, rule: &str, rel: &str, scope: RouteScope, handler: RouteHandler) -> Self {
        Route {
            method,
            rule: rule.to_string(),
            rel: rel.to_string(),
            scope,
            skip_api_decorators: false,
            handler,
        }
    }

    fn custom(method: Method, rule: &str, scope: RouteScope, handler: RouteHandler) -> Self {
        let rule = normalize_rule(rule);
        let mut rel = to_camel_case(&rule);
        if rel.is_empty() {
            rel = method.as_str().to_lowercase();
        }
        Route {
            method,
            rule,
            rel,
            scope,
            skip_api_decorators: false,
            handler,
        }
    }

    /// Custom route under the collection path. `rel` defaults to the camelCased rule.
    pub fn collection(method: Method, rule: &str, action: impl CollectionAction + 'static) -> Self {
        Self::custom(method, rule, RouteScope::Collection, RouteHandler::Collection(Arc::new(action)))
    }

    /// Custom route under the item path. `rule` must not declare further path captures.
    pub fn item(method: Method, rule: &str, action: impl ItemAction + 'static) -> Self {
        Self::custom(method, rule, RouteScope::Item, RouteHandler::Item(Arc::new(action)))
    }

    pub fn rel(mut self, rel: impl Into<String>) -> Self {
        self.rel = rel.into();
        self
    }

    pub fn skip_api_decorators(mut self) -> Self {
        self.skip_api_decorators = true;
        self
    }

    /// The nine generated CRUD routes.
    pub fn builtins() -> Vec<Route> {
        use RouteHandler::*;
        use RouteScope::{Collection as C, Item as I};
        vec![
            Self::builtin(Method::GET, "", "instances", C, Instances),
            Self::builtin(Method::GET, "", "instance", I, Instance),
            Self::builtin(Method::POST, "", "create_entrance", C, CreateEntrance),
            Self::builtin(Method::POST, "/batch", "create_many", C, CreateMany),
            Self::builtin(Method::PUT, "", "update_entrance", C, UpdateEntrance),
            Self::builtin(Method::PUT, "/batch", "update_many", C, UpdateMany),
            Self::builtin(Method::PUT, "", "update_instance", I, UpdateInstance),
            Self::builtin(Method::DELETE, "", "delete_entrance", C, DeleteEntrance),
            Self::builtin(Method::DELETE, "", "delete_instance", I, DeleteInstance),
        ]
    }

    /// Full axum path for this route under `prefix` and resource `name`.
    pub fn path(&self, prefix: &str, name: &str) -> String {
        let base = match self.scope {
            RouteScope::Collection => format!("{}/{}", prefix.trim_end_matches('/'), name),
            RouteScope::Item => format!("{}/{}/:id", prefix.trim_end_matches('/'), name),
        };
        let path = format!("{}{}", base, self.rule);
        if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        }
    }

    pub fn endpoint(&self, name: &str) -> String {
        format!("{}_{}", name, self.rel)
    }
}
