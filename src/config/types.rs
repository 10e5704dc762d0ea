//! Raw config types: api settings and resource declarations as read from JSON.

use crate::resource::ResourceMeta;
use crate::schema::Schema;
use serde::Deserialize;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Api-wide settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Mount point of every resource, e.g. "/api/v1". Empty mounts at the root.
    pub prefix: String,
    pub default_page_size: u32,
    /// Requested page sizes are clamped to this.
    pub max_page_size: u32,
    /// Maximum request body in bytes.
    pub body_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            prefix: String::new(),
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

/// Where a declared resource is stored. Absent means the api's default backend.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendTarget {
    Memory,
    Sql {
        #[serde(default)]
        schema: Option<String>,
        table: String,
    },
    Mongo {
        collection: String,
    },
}

/// One resource in a resources file.
///
/// ```json
/// {
///   "name": "books",
///   "filters": {"title": ["eq", "icontains"], "*": true},
///   "schema": {"fields": [{"name": "id", "type": "int", "dump_only": true}]},
///   "backend": {"kind": "sql", "table": "books"}
/// }
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct ResourceConfig {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub schema: Schema,
    #[serde(default)]
    pub backend: Option<BackendTarget>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ResourcesFile {
    #[serde(default)]
    pub api: ApiConfig,
    pub resources: Vec<ResourceConfig>,
}
