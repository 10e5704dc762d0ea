//! Filter dispatch: which operators each field kind accepts, per-resource filter policy,
//! and conversion of request values (`1`, `{"$gte": 1}`) into backend-neutral conditions.

pub mod params;
mod where_builder;

pub use params::{convert_dict, legitimize_sort, legitimize_where, legitimize_where_with, ListQuery, PageParam, SortKey};
pub use where_builder::WhereBuilder;

use crate::error::{ConfigError, RestError};
use crate::schema::{FieldDef, FieldKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    In,
    NotIn,
    /// List membership.
    Contains,
    StringContains,
    StringIContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    DateBetween,
}

use FilterOp::*;

pub const COMMON_FILTERS: &[FilterOp] = &[Equal, NotEqual, In, NotIn];
pub const NUMBER_FILTERS: &[FilterOp] = &[LessThan, LessThanEqual, GreaterThan, GreaterThanEqual];
pub const STRING_FILTERS: &[FilterOp] = &[StringContains, StringIContains, StartsWith, IStartsWith, EndsWith, IEndsWith];
pub const DATE_FILTERS: &[FilterOp] = &[DateBetween];

/// Operator -> request name. `None` is the operator used for a bare value.
pub const FILTER_NAMES: &[(FilterOp, Option<&str>)] = &[
    (Equal, None),
    (Equal, Some("eq")),
    (NotEqual, Some("ne")),
    (LessThan, Some("lt")),
    (LessThanEqual, Some("lte")),
    (GreaterThan, Some("gt")),
    (GreaterThanEqual, Some("gte")),
    (In, Some("in")),
    (NotIn, Some("nin")),
    (Contains, Some("contains")),
    (StringContains, Some("contains")),
    (StringIContains, Some("icontains")),
    (StartsWith, Some("startswith")),
    (IStartsWith, Some("istartswith")),
    (EndsWith, Some("endswith")),
    (IEndsWith, Some("iendswith")),
    (DateBetween, Some("between")),
];

/// Whether `name` is a request filter name (`gte`, `icontains`, ...).
pub fn is_filter_name(name: &str) -> bool {
    FILTER_NAMES.iter().any(|(_, n)| *n == Some(name))
}

/// Filters of one field: request name (`None` = bare value) -> operator.
pub type FieldFilters = BTreeMap<Option<String>, FilterOp>;

/// The dispatch table of one backend: which operators each field kind accepts.
#[derive(Clone, Debug)]
pub struct FilterTable {
    by_kind: Vec<(FieldKind, Vec<FilterOp>)>,
}

fn concat(groups: &[&[FilterOp]]) -> Vec<FilterOp> {
    groups.iter().flat_map(|g| g.iter().copied()).collect()
}

impl FilterTable {
    /// Operators available on a relational backend.
    pub fn relational() -> Self {
        FilterTable {
            by_kind: vec![
                (FieldKind::Boolean, concat(&[COMMON_FILTERS])),
                (FieldKind::Integer, concat(&[COMMON_FILTERS, NUMBER_FILTERS])),
                (FieldKind::Float, concat(&[COMMON_FILTERS, NUMBER_FILTERS])),
                (FieldKind::Decimal, concat(&[COMMON_FILTERS, NUMBER_FILTERS])),
                (FieldKind::String, concat(&[COMMON_FILTERS, STRING_FILTERS])),
                (FieldKind::Date, concat(&[COMMON_FILTERS, NUMBER_FILTERS, DATE_FILTERS])),
                (FieldKind::DateTime, concat(&[COMMON_FILTERS, NUMBER_FILTERS, DATE_FILTERS])),
                (FieldKind::List, vec![Contains]),
            ],
        }
    }

    /// Operators available on a document backend: no date kinds, no `between`.
    pub fn document() -> Self {
        FilterTable {
            by_kind: vec![
                (FieldKind::Boolean, concat(&[COMMON_FILTERS])),
                (FieldKind::Integer, concat(&[COMMON_FILTERS, NUMBER_FILTERS])),
                (FieldKind::Float, concat(&[COMMON_FILTERS, NUMBER_FILTERS])),
                (FieldKind::Decimal, concat(&[COMMON_FILTERS, NUMBER_FILTERS])),
                (FieldKind::String, concat(&[COMMON_FILTERS, STRING_FILTERS])),
                (FieldKind::List, vec![Contains]),
            ],
        }
    }

    pub fn ops_for_kind(&self, kind: FieldKind) -> &[FilterOp] {
        self.by_kind
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, ops)| ops.as_slice())
            .unwrap_or(&[])
    }

    /// Every request name usable on a field of `kind`.
    pub fn filters_for_field(&self, kind: FieldKind) -> FieldFilters {
        let ops = self.ops_for_kind(kind);
        FILTER_NAMES
            .iter()
            .filter(|(op, _)| ops.contains(op))
            .map(|(op, name)| (name.map(str::to_string), *op))
            .collect()
    }
}

/// Per-field policy inside a [`FiltersExpr::Fields`] map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldPolicy {
    Enabled(bool),
    /// Only these request names, e.g. `["eq", "ne"]`.
    Only(Vec<String>),
    /// Custom request names mapped onto the field's operators, e.g. `{"text": "icontains"}`.
    Custom(BTreeMap<String, String>),
}

/// Declarative filter policy of a resource.
///
/// `true` allows every operator on every field; a map names fields (or `"*"` for the rest):
///
/// ```json
/// { "title": ["eq", "icontains"], "rating": true, "*": false }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FiltersExpr {
    All(bool),
    Fields(BTreeMap<String, FieldPolicy>),
}

impl Default for FiltersExpr {
    fn default() -> Self {
        FiltersExpr::All(true)
    }
}

/// Filters allowed on one field, bound to its storage attribute and kind.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundFilters {
    pub field: String,
    pub attribute: String,
    pub kind: FieldKind,
    pub filters: FieldFilters,
}

/// Resolve the filters of every field under `expr`. Fields with no usable operator are left out.
pub fn filters_for_fields<'a>(
    fields: impl IntoIterator<Item = &'a FieldDef>,
    expr: &FiltersExpr,
    table: &FilterTable,
) -> Result<BTreeMap<String, BoundFilters>, ConfigError> {
    let mut out = BTreeMap::new();
    for field in fields {
        let available = table.filters_for_field(field.kind);
        let filters = match expr {
            FiltersExpr::All(true) => available,
            FiltersExpr::All(false) => continue,
            FiltersExpr::Fields(map) => {
                let Some(policy) = map.get(&field.name).or_else(|| map.get("*")) else { continue };
                match policy {
                    FieldPolicy::Enabled(true) => available,
                    FieldPolicy::Enabled(false) => continue,
                    FieldPolicy::Only(names) => available
                        .into_iter()
                        .filter(|(name, _)| name.as_ref().map_or(false, |n| names.contains(n)))
                        .collect(),
                    FieldPolicy::Custom(custom) => {
                        let mut filters = FieldFilters::new();
                        for (alias, target) in custom {
                            let op = available.get(&Some(target.clone())).copied().ok_or_else(|| {
                                ConfigError::Validation(format!(
                                    "filter '{}' is not available on field '{}'",
                                    target, field.name
                                ))
                            })?;
                            filters.insert(Some(alias.clone()), op);
                        }
                        filters
                    }
                }
            }
        };
        if filters.is_empty() {
            continue;
        }
        out.insert(
            field.name.clone(),
            BoundFilters {
                field: field.name.clone(),
                attribute: field.attribute_name().to_string(),
                kind: field.kind,
                filters,
            },
        );
    }
    Ok(out)
}

/// One backend-neutral predicate: `attribute <op> value`.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub attribute: String,
    pub op: FilterOp,
    pub kind: FieldKind,
    pub value: Value,
}

/// Match a request value against a field's filters.
///
/// `{"$gte": 1, "$lte": 5}` yields one condition per key; anything else is an equality
/// on the bare-value filter. A `$name` the field does not allow is `FilterNotAllow`.
pub fn convert_filters(value: &Value, bound: &BoundFilters) -> Result<Vec<Condition>, RestError> {
    if let Value::Object(map) = value {
        let is_ops = !map.is_empty() && map.keys().all(|k| k.len() > 1 && k.starts_with('$'));
        if is_ops {
            return map
                .iter()
                .map(|(key, v)| {
                    let op = bound
                        .filters
                        .get(&Some(key[1..].to_string()))
                        .copied()
                        .ok_or_else(|| RestError::FilterNotAllow(format!("{}.{}", bound.field, key)))?;
                    bound.condition(op, v)
                })
                .collect();
        }
    }
    let op = bound
        .filters
        .get(&None)
        .copied()
        .ok_or_else(|| RestError::FilterNotAllow(format!("{} (bare value)", bound.field)))?;
    Ok(vec![bound.condition(op, value)?])
}

impl BoundFilters {
    fn condition(&self, op: FilterOp, raw: &Value) -> Result<Condition, RestError> {
        let value = self
            .coerce_for_op(op, raw)
            .map_err(|e| RestError::InvalidParam(format!("{}: {}", self.field, e)))?;
        Ok(Condition {
            attribute: self.attribute.clone(),
            op,
            kind: self.kind,
            value,
        })
    }

    fn coerce_for_op(&self, op: FilterOp, raw: &Value) -> Result<Value, String> {
        match op {
            In | NotIn => {
                let items = split_list(raw);
                items
                    .iter()
                    .map(|v| self.kind.coerce(v))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            DateBetween => {
                let items = split_list(raw);
                if items.len() != 2 {
                    return Err("between takes exactly two values".into());
                }
                items
                    .iter()
                    .map(|v| self.kind.coerce(v))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            Contains => Ok(raw.clone()),
            StringContains | StringIContains | StartsWith | IStartsWith | EndsWith | IEndsWith => {
                match FieldKind::String.coerce(raw)? {
                    Value::Null => Err("expected a string".into()),
                    v => Ok(v),
                }
            }
            _ => self.kind.coerce(raw),
        }
    }
}

/// Arrays stay arrays; a string is split on commas; any other scalar is a one-element list.
fn split_list(raw: &Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items.clone(),
        Value::String(s) if s.is_empty() => Vec::new(),
        Value::String(s) => s.split(',').map(|p| Value::String(p.trim().to_string())).collect(),
        other => vec![other.clone()],
    }
}
