//! Config validation: api limits and resource declarations.

use crate::config::{ApiConfig, BackendTarget, ResourceConfig};
use crate::error::ConfigError;
use std::collections::HashSet;

pub fn validate_api(config: &ApiConfig) -> Result<(), ConfigError> {
    if config.default_page_size == 0 || config.max_page_size == 0 {
        return Err(ConfigError::Validation("page sizes must be positive".into()));
    }
    if config.default_page_size > config.max_page_size {
        return Err(ConfigError::Validation(format!(
            "default_page_size {} exceeds max_page_size {}",
            config.default_page_size, config.max_page_size
        )));
    }
    if !config.prefix.is_empty() && !config.prefix.starts_with('/') {
        return Err(ConfigError::Validation(format!("prefix must start with '/': {}", config.prefix)));
    }
    Ok(())
}

pub fn validate_resources(resources: &[ResourceConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for r in resources {
        let name = r.meta.name.as_str();
        if name.is_empty() || name.contains('/') {
            return Err(ConfigError::Validation(format!("invalid resource name: '{}'", name)));
        }
        if !names.insert(name) {
            return Err(ConfigError::Validation(format!("duplicate resource: {}", name)));
        }

        let mut fields = HashSet::new();
        let mut attributes = HashSet::new();
        for f in &r.schema.fields {
            if !fields.insert(f.name.as_str()) || !attributes.insert(f.attribute_name()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate field '{}' in resource '{}'",
                    f.name, name
                )));
            }
            if f.dump_only && f.load_only {
                return Err(ConfigError::Validation(format!(
                    "field '{}' in resource '{}' cannot be both dump_only and load_only",
                    f.name, name
                )));
            }
        }

        match &r.backend {
            Some(BackendTarget::Sql { table, .. }) if table.is_empty() => {
                return Err(ConfigError::Validation(format!("resource '{}' has an empty table name", name)));
            }
            Some(BackendTarget::Mongo { collection }) if collection.is_empty() => {
                return Err(ConfigError::Validation(format!(
                    "resource '{}' has an empty collection name",
                    name
                )));
            }
            _ => {}
        }
    }
    Ok(())
}
