//! Restful SDK: declarative REST resources over pluggable storage backends.
//!
//! A resource is a [`ResourceMeta`] plus a [`Schema`]. Binding it to an [`Api`] mounts the
//! generated CRUD routes (list with filters, sorting and pagination; read; create, update and
//! delete, single or batch) and any custom routes on an axum router.

pub mod api;
pub mod backend;
pub mod case;
pub mod config;
pub mod error;
pub mod filters;
pub mod handlers;
pub mod mongo;
pub mod resource;
pub mod response;
pub mod route;
pub mod schema;
pub mod service;
pub mod sql;

pub use api::{Api, BackendFactory, Endpoint};
pub use backend::{Backend, MemoryBackend, ModelInfo, Pagination};
pub use config::{load_resources, parse_resources, ApiConfig, BackendTarget, Connections, ResourceConfig};
pub use error::{ConfigError, RestError};
pub use filters::{Condition, FilterOp, FiltersExpr, ListQuery, PageParam, SortKey, WhereBuilder};
pub use mongo::MongoBackend;
pub use resource::{IdConverter, ModelResource, ResourceBuilder, ResourceMeta, RouteDecorator};
pub use route::{ActionInput, CollectionAction, ItemAction, Route, RouteScope};
pub use schema::{FieldDef, FieldKind, Item, Schema, UnknownPolicy, ValidationRule};
pub use service::{Items, NoHooks, Service, ServiceHooks};
pub use sql::{SqlBackend, SqlTable};
