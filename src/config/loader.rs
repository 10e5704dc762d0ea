//! Load api settings from the environment and resource declarations from JSON.

use crate::backend::MemoryBackend;
use crate::config::types::*;
use crate::config::{validate_api, validate_resources};
use crate::error::ConfigError;
use crate::mongo::MongoBackend;
use crate::resource::ResourceBuilder;
use crate::sql::{SqlBackend, SqlTable};
use sqlx::PgPool;
use std::path::Path;
use std::str::FromStr;

impl ApiConfig {
    /// Read `RESTFUL_PREFIX`, `RESTFUL_PAGE_SIZE`, `RESTFUL_MAX_PAGE_SIZE` and `RESTFUL_BODY_LIMIT`.
    /// A `.env` file is loaded first when present. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
            match raw {
                Some(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Load(format!("{}: invalid value '{}'", key, s))),
                None => Ok(default),
            }
        }
        let defaults = ApiConfig::default();
        let config = ApiConfig {
            prefix: lookup("RESTFUL_PREFIX").unwrap_or(defaults.prefix),
            default_page_size: parse("RESTFUL_PAGE_SIZE", lookup("RESTFUL_PAGE_SIZE"), defaults.default_page_size)?,
            max_page_size: parse("RESTFUL_MAX_PAGE_SIZE", lookup("RESTFUL_MAX_PAGE_SIZE"), defaults.max_page_size)?,
            body_limit: parse("RESTFUL_BODY_LIMIT", lookup("RESTFUL_BODY_LIMIT"), defaults.body_limit)?,
        };
        validate_api(&config)?;
        Ok(config)
    }
}

/// Parse and validate a resources document.
pub fn parse_resources(json: &str) -> Result<ResourcesFile, ConfigError> {
    let file: ResourcesFile = serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
    validate_api(&file.api)?;
    validate_resources(&file.resources)?;
    Ok(file)
}

/// Read a resources document from disk.
pub async fn load_resources(path: impl AsRef<Path>) -> Result<ResourcesFile, ConfigError> {
    let path = path.as_ref();
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let file = parse_resources(&json)?;
    tracing::info!(path = %path.display(), resources = file.resources.len(), "resources loaded");
    Ok(file)
}

/// Connections available to declared backends.
#[derive(Clone, Debug, Default)]
pub struct Connections {
    pub pool: Option<PgPool>,
    pub mongo: Option<mongodb::Database>,
}

impl ResourceConfig {
    /// Turn a declaration into a builder, opening its backend on `connections`.
    pub fn into_builder(self, connections: &Connections) -> Result<ResourceBuilder, ConfigError> {
        let name = self.meta.name.clone();
        let builder = ResourceBuilder::new(self.meta, self.schema);
        Ok(match self.backend {
            None => builder,
            Some(BackendTarget::Memory) => builder.backend(MemoryBackend::new()),
            Some(BackendTarget::Sql { schema, table }) => {
                let pool = connections
                    .pool
                    .clone()
                    .ok_or_else(|| ConfigError::Validation(format!("resource '{}' needs a database pool", name)))?;
                let table = SqlTable { schema, name: table };
                builder.backend(SqlBackend::new(pool, table))
            }
            Some(BackendTarget::Mongo { collection }) => {
                let db = connections
                    .mongo
                    .clone()
                    .ok_or_else(|| ConfigError::Validation(format!("resource '{}' needs a mongodb database", name)))?;
                builder.backend(MongoBackend::new(db, collection))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FiltersExpr;
    use crate::resource::IdConverter;
    use std::collections::HashMap;

    const RESOURCES: &str = r#"{
        "api": {"prefix": "/api", "default_page_size": 10},
        "resources": [
            {
                "name": "books",
                "id_converter": "int",
                "filters": {"title": ["eq", "icontains"], "*": true},
                "schema": {"fields": [
                    {"name": "id", "type": "int", "dump_only": true},
                    {"name": "title", "type": "string", "required": true}
                ]},
                "backend": {"kind": "sql", "schema": "library", "table": "books"}
            },
            {
                "name": "notes",
                "id_converter": "string",
                "schema": {"fields": [{"name": "id", "type": "string"}]},
                "backend": {"kind": "memory"}
            }
        ]
    }"#;

    #[test]
    fn parses_resources_file() {
        let file = parse_resources(RESOURCES).unwrap();
        assert_eq!(file.api.prefix, "/api");
        assert_eq!(file.api.default_page_size, 10);
        assert_eq!(file.api.max_page_size, MAX_PAGE_SIZE);
        assert_eq!(file.resources.len(), 2);

        let books = &file.resources[0];
        assert!(matches!(books.meta.filters, FiltersExpr::Fields(_)));
        assert_eq!(
            books.backend,
            Some(BackendTarget::Sql {
                schema: Some("library".into()),
                table: "books".into()
            })
        );
        assert_eq!(file.resources[1].meta.id_converter, IdConverter::String);
    }

    #[test]
    fn rejects_duplicate_names_and_fields() {
        let dup = r#"{"resources": [
            {"name": "a", "schema": {"fields": []}},
            {"name": "a", "schema": {"fields": []}}
        ]}"#;
        assert!(matches!(parse_resources(dup), Err(ConfigError::Validation(_))));

        let fields = r#"{"resources": [
            {"name": "a", "schema": {"fields": [{"name": "x", "type": "int"}, {"name": "x", "type": "int"}]}}
        ]}"#;
        assert!(matches!(parse_resources(fields), Err(ConfigError::Validation(_))));
        assert!(matches!(parse_resources("{"), Err(ConfigError::Load(_))));
    }

    #[test]
    fn sql_backend_needs_a_pool() {
        let file = parse_resources(RESOURCES).unwrap();
        let mut resources = file.resources.into_iter();
        let books = resources.next().unwrap();
        assert!(books.into_builder(&Connections::default()).is_err());
        let notes = resources.next().unwrap();
        assert!(notes.into_builder(&Connections::default()).is_ok());
    }

    #[test]
    fn api_config_from_lookup() {
        let vars: HashMap<&str, &str> = [("RESTFUL_PREFIX", "/v1"), ("RESTFUL_PAGE_SIZE", "50")].into();
        let config = ApiConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.prefix, "/v1");
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.body_limit, DEFAULT_BODY_LIMIT);

        let bad = ApiConfig::from_lookup(|k| (k == "RESTFUL_MAX_PAGE_SIZE").then(|| "lots".to_string()));
        assert!(matches!(bad, Err(ConfigError::Load(_))));
        let inverted = ApiConfig::from_lookup(|k| (k == "RESTFUL_MAX_PAGE_SIZE").then(|| "5".to_string()));
        assert!(matches!(inverted, Err(ConfigError::Validation(_))));
    }
}
