//! Per-field validation rules applied while loading request bodies.

use crate::error::RestError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

impl ValidationRule {
    /// Check an already-coerced value. `null` always passes; `required` is the schema's concern.
    pub fn check(&self, field: &str, v: &Value) -> Result<(), RestError> {
        if v.is_null() {
            return Ok(());
        }
        if let Some(format) = &self.format {
            validate_format(field, v, format)?;
        }
        if let Some(s) = v.as_str() {
            let len = s.chars().count();
            if let Some(max) = self.max_length {
                if len > max as usize {
                    return Err(RestError::Validation(format!(
                        "{} must be at most {} characters",
                        field, max
                    )));
                }
            }
            if let Some(min) = self.min_length {
                if len < min as usize {
                    return Err(RestError::Validation(format!(
                        "{} must be at least {} characters",
                        field, min
                    )));
                }
            }
            if let Some(pattern) = &self.pattern {
                let re = Regex::new(pattern)
                    .map_err(|_| RestError::Validation(format!("invalid pattern for {}", field)))?;
                if !re.is_match(s) {
                    return Err(RestError::Validation(format!("{} does not match required pattern", field)));
                }
            }
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|a| value_eq(v, a)) {
                return Err(RestError::Validation(format!(
                    "{} must be one of: {:?}",
                    field,
                    allowed.iter().take(5).collect::<Vec<_>>()
                )));
            }
        }
        let number = match v {
            Value::Number(n) => n.as_f64(),
            // decimals are carried as strings
            Value::String(s) if self.minimum.is_some() || self.maximum.is_some() => s.parse::<f64>().ok(),
            _ => None,
        };
        if let Some(n) = number {
            if let Some(min) = self.minimum {
                if n < min {
                    return Err(RestError::Validation(format!("{} must be at least {}", field, min)));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    return Err(RestError::Validation(format!("{} must be at most {}", field, max)));
                }
            }
        }
        Ok(())
    }
}

fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        _ => a == b,
    }
}

fn validate_format(field: &str, v: &Value, format: &str) -> Result<(), RestError> {
    let Some(s) = v.as_str() else { return Ok(()) };
    match format.to_lowercase().as_str() {
        "email" => {
            if !s.contains('@') || s.len() < 3 {
                return Err(RestError::Validation(format!("{} must be a valid email", field)));
            }
        }
        "uuid" => {
            if uuid::Uuid::parse_str(s).is_err() {
                return Err(RestError::Validation(format!("{} must be a valid UUID", field)));
            }
        }
        _ => {}
    }
    Ok(())
}
