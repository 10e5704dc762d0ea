//! Resource field declarations: load (coerce + validate) request bodies, dump stored items.

mod kind;
mod validation;

pub use kind::FieldKind;
pub use validation::ValidationRule;

use crate::error::RestError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored record, keyed by attribute (column / document key).
pub type Item = Map<String, Value>;

/// What `load` does with keys no field declares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPolicy {
    #[default]
    Exclude,
    Raise,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Storage name; defaults to `name`.
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub dump_only: bool,
    #[serde(default)]
    pub load_only: bool,
    /// PostgreSQL type used to cast bound values (e.g. "timestamptz"); derived from `kind` when absent.
    #[serde(default)]
    pub db_type: Option<String>,
    #[serde(default)]
    pub validate: Option<ValidationRule>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        FieldDef {
            name: name.into(),
            attribute: None,
            kind,
            required: false,
            dump_only: false,
            load_only: false,
            db_type: None,
            validate: None,
        }
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn dump_only(mut self) -> Self {
        self.dump_only = true;
        self
    }

    pub fn load_only(mut self) -> Self {
        self.load_only = true;
        self
    }

    pub fn db_type(mut self, db_type: impl Into<String>) -> Self {
        self.db_type = Some(db_type.into());
        self
    }

    pub fn validate(mut self, rule: ValidationRule) -> Self {
        self.validate = Some(rule);
        self
    }

    pub fn attribute_name(&self) -> &str {
        self.attribute.as_deref().unwrap_or(&self.name)
    }

    /// Cast applied to bound SQL parameters for this field.
    pub fn pg_cast(&self) -> Option<&str> {
        self.db_type.as_deref().or_else(|| self.kind.pg_type())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub unknown: UnknownPolicy,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn unknown(mut self, policy: UnknownPolicy) -> Self {
        self.unknown = policy;
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn by_attribute(&self, attribute: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.attribute_name() == attribute)
    }

    /// Fields that appear in responses; filters and sorting are declared over these.
    pub fn dump_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.load_only)
    }

    /// Deserialize one JSON object into an item keyed by attribute.
    /// With `partial`, required fields may be absent (updates).
    pub fn load(&self, value: &Value, partial: bool) -> Result<Item, RestError> {
        let obj = value
            .as_object()
            .ok_or_else(|| RestError::Validation("expected a JSON object".into()))?;
        let mut item = Item::new();
        for (key, raw) in obj {
            let Some(field) = self.get(key) else {
                match self.unknown {
                    UnknownPolicy::Exclude => continue,
                    UnknownPolicy::Raise => {
                        return Err(RestError::Validation(format!("unknown field: {}", key)))
                    }
                }
            };
            if field.dump_only {
                continue;
            }
            let value = field
                .kind
                .coerce(raw)
                .map_err(|e| RestError::Validation(format!("{}: {}", key, e)))?;
            if let Some(rule) = &field.validate {
                rule.check(key, &value)?;
            }
            item.insert(field.attribute_name().to_string(), value);
        }
        if !partial {
            for field in self.fields.iter().filter(|f| f.required && !f.dump_only) {
                match item.get(field.attribute_name()) {
                    None | Some(Value::Null) => {
                        return Err(RestError::Validation(format!("{} is required", field.name)))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(item)
    }

    /// Coerce and validate the values of an attribute-keyed item again, e.g. after a hook
    /// changed it. Keys no field maps are left alone.
    pub fn normalize(&self, item: &mut Item) -> Result<(), RestError> {
        for (attribute, value) in item.iter_mut() {
            let Some(field) = self.by_attribute(attribute) else { continue };
            let coerced = field
                .kind
                .coerce(value)
                .map_err(|e| RestError::Validation(format!("{}: {}", field.name, e)))?;
            if let Some(rule) = &field.validate {
                rule.check(&field.name, &coerced)?;
            }
            *value = coerced;
        }
        Ok(())
    }

    pub fn load_many(&self, value: &Value, partial: bool) -> Result<Vec<Item>, RestError> {
        let arr = value
            .as_array()
            .ok_or_else(|| RestError::Validation("expected a JSON array".into()))?;
        arr.iter().map(|v| self.load(v, partial)).collect()
    }

    /// Serialize an item to its API shape (keyed by field name, `load_only` fields omitted).
    pub fn dump(&self, item: &Item) -> Value {
        let mut out = Map::new();
        for field in self.dump_fields() {
            if let Some(v) = item.get(field.attribute_name()) {
                out.insert(field.name.clone(), v.clone());
            }
        }
        Value::Object(out)
    }

    pub fn dump_many(&self, items: &[Item]) -> Vec<Value> {
        items.iter().map(|item| self.dump(item)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn book_schema() -> Schema {
        Schema::new()
            .field(FieldDef::new("id", FieldKind::Integer))
            .field(FieldDef::new("title", FieldKind::String).required())
            .field(FieldDef::new("yearPublished", FieldKind::Integer).attribute("year_published"))
            .field(FieldDef::new("secret", FieldKind::String).load_only())
            .field(FieldDef::new("createdAt", FieldKind::DateTime).attribute("created_at").dump_only())
    }

    #[test]
    fn load_maps_names_to_attributes_and_coerces() {
        let item = book_schema()
            .load(&json!({"title": "Dune", "yearPublished": "1965", "extra": 1}), false)
            .unwrap();
        assert_eq!(item.get("year_published"), Some(&json!(1965)));
        assert_eq!(item.get("title"), Some(&json!("Dune")));
        assert!(!item.contains_key("extra"));
    }

    #[test]
    fn load_enforces_required_unless_partial() {
        let schema = book_schema();
        assert!(matches!(schema.load(&json!({"yearPublished": 1}), false), Err(RestError::Validation(_))));
        assert!(schema.load(&json!({"yearPublished": 1}), true).is_ok());
    }

    #[test]
    fn load_ignores_dump_only_and_can_reject_unknown() {
        let schema = book_schema();
        let item = schema.load(&json!({"title": "x", "createdAt": "2020-01-01T00:00:00Z"}), false).unwrap();
        assert!(!item.contains_key("created_at"));

        let strict = book_schema().unknown(UnknownPolicy::Raise);
        assert!(strict.load(&json!({"title": "x", "bogus": true}), false).is_err());
    }

    #[test]
    fn dump_hides_load_only() {
        let schema = book_schema();
        let mut item = Item::new();
        item.insert("id".into(), json!(1));
        item.insert("year_published".into(), json!(1965));
        item.insert("secret".into(), json!("s"));
        assert_eq!(schema.dump(&item), json!({"id": 1, "yearPublished": 1965}));
    }

    #[test]
    fn deserializes_from_config() {
        let schema: Schema = serde_json::from_value(json!({
            "fields": [
                {"name": "id", "type": "int"},
                {"name": "title", "type": "string", "required": true, "validate": {"max_length": 3}}
            ],
            "unknown": "raise"
        }))
        .unwrap();
        assert_eq!(schema.fields.len(), 2);
        assert_eq!(schema.unknown, UnknownPolicy::Raise);
        assert!(schema.load(&json!({"title": "long"}), false).is_err());
    }
}
