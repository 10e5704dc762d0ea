//! Field kinds and value coercion.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "int")]
    Integer,
    Float,
    Decimal,
    #[serde(alias = "str")]
    String,
    Date,
    DateTime,
    List,
    Raw,
}

impl FieldKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldKind::Integer | FieldKind::Float | FieldKind::Decimal)
    }

    pub fn is_sortable(self) -> bool {
        !matches!(self, FieldKind::List | FieldKind::Raw)
    }

    /// PostgreSQL cast used when binding values for this kind.
    pub fn pg_type(self) -> Option<&'static str> {
        match self {
            FieldKind::Boolean => Some("boolean"),
            FieldKind::Integer => Some("bigint"),
            FieldKind::Float => Some("double precision"),
            FieldKind::Decimal => Some("numeric"),
            FieldKind::Date => Some("date"),
            FieldKind::DateTime => Some("timestamptz"),
            FieldKind::List | FieldKind::Raw => Some("jsonb"),
            FieldKind::String => None,
        }
    }

    /// Normalize a JSON value (from a body or a query string) to this kind.
    /// `null` passes through every kind.
    pub fn coerce(self, v: &Value) -> Result<Value, String> {
        if v.is_null() {
            return Ok(Value::Null);
        }
        match self {
            FieldKind::Boolean => match v {
                Value::Bool(_) => Ok(v.clone()),
                Value::Number(n) if n.as_i64() == Some(0) || n.as_i64() == Some(1) => {
                    Ok(Value::Bool(n.as_i64() == Some(1)))
                }
                Value::String(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(Value::Bool(true)),
                    "false" | "0" => Ok(Value::Bool(false)),
                    _ => Err(format!("not a boolean: {}", s)),
                },
                _ => Err("not a boolean".into()),
            },
            FieldKind::Integer => match v {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(v.clone()),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => Ok(Value::Number((f as i64).into())),
                    _ => Err(format!("not an integer: {}", n)),
                },
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(|n| Value::Number(n.into()))
                    .map_err(|_| format!("not an integer: {}", s)),
                _ => Err("not an integer".into()),
            },
            FieldKind::Float => {
                let f = match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                f.and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("not a number: {}", v))
            }
            FieldKind::Decimal => match v {
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::String(s) if s.trim().parse::<f64>().is_ok() => Ok(Value::String(s.trim().to_string())),
                _ => Err(format!("not a decimal: {}", v)),
            },
            FieldKind::String => match v {
                Value::String(_) => Ok(v.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err("not a string".into()),
            },
            FieldKind::Date => {
                let s = v.as_str().ok_or("date must be a string")?;
                parse_date(s)
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .ok_or_else(|| format!("not a date: {}", s))
            }
            FieldKind::DateTime => {
                let s = v.as_str().ok_or("datetime must be a string")?;
                parse_datetime(s)
                    .map(|d| Value::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
                    .ok_or_else(|| format!("not a datetime: {}", s))
            }
            FieldKind::List => match v {
                Value::Array(_) => Ok(v.clone()),
                _ => Err("not a list".into()),
            },
            FieldKind::Raw => Ok(v.clone()),
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(s).map(|d| d.date_naive()))
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(n.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}
