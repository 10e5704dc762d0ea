//! List-request parameters: `page`, `page_size`, `if_page`, `where`, `sort` and flat `field_op=value` keys.

use super::{is_filter_name, Condition};
use crate::config::ApiConfig;
use crate::error::RestError;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::OnceLock;

const RESERVED: &[&str] = &["page", "page_size", "pageSize", "per_page", "if_page", "ifPage", "where", "sort"];

/// One ORDER BY entry, already resolved to a storage attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    pub attribute: String,
    pub descending: bool,
}

/// Everything a backend needs to answer a list request.
#[derive(Clone, Debug, PartialEq)]
pub struct PageParam {
    pub page: u32,
    pub page_size: u32,
    /// When false every matching row is returned.
    pub if_page: bool,
    pub conditions: Vec<Condition>,
    pub sort: Vec<SortKey>,
}

impl Default for PageParam {
    fn default() -> Self {
        PageParam {
            page: 1,
            page_size: crate::config::DEFAULT_PAGE_SIZE,
            if_page: true,
            conditions: Vec::new(),
            sort: Vec::new(),
        }
    }
}

impl PageParam {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

/// Raw list parameters before they are matched against a resource's fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListQuery {
    pub page: u32,
    pub page_size: u32,
    pub if_page: bool,
    /// The `where` JSON as sent: `{"field": value}`, `{"field": {"$op": value}}` or `{"field_op": value}`.
    /// Suffixed keys are folded once the resource's field names are known.
    pub where_: Map<String, Value>,
    /// Plain query keys (`age_gte=3`), unfolded. Names no field declares are skipped.
    pub flat: Map<String, Value>,
    /// `(name, descending)` in request order.
    pub sort: Vec<(String, bool)>,
}

impl ListQuery {
    pub fn from_params(params: &HashMap<String, String>, config: &ApiConfig) -> Result<Self, RestError> {
        let get = |keys: &[&str]| keys.iter().find_map(|k| params.get(*k));

        let page = match get(&["page"]) {
            Some(p) => p
                .parse::<u32>()
                .map_err(|_| RestError::InvalidParam(format!("page: {}", p)))?
                .max(1),
            None => 1,
        };
        let page_size = match get(&["page_size", "pageSize", "per_page"]) {
            Some(p) => p
                .parse::<u32>()
                .map_err(|_| RestError::InvalidParam(format!("page_size: {}", p)))?
                .clamp(1, config.max_page_size),
            None => config.default_page_size,
        };
        let if_page = match get(&["if_page", "ifPage"]) {
            Some(p) => match p.to_ascii_lowercase().as_str() {
                "true" | "1" => true,
                "false" | "0" => false,
                _ => return Err(RestError::InvalidParam(format!("if_page: {}", p))),
            },
            None => true,
        };

        let raw_where = convert_dict(params.get("where").map(String::as_str))?;
        let mut keys: Vec<(&String, &String)> = params
            .iter()
            .filter(|(k, _)| !RESERVED.contains(&k.as_str()))
            .collect();
        keys.sort();
        let flat: Map<String, Value> = keys
            .into_iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let sort = match params.get("sort").map(|s| s.trim()) {
            None | Some("") => Vec::new(),
            Some(s) if s.starts_with('{') => sort_from_json(&convert_dict(Some(s))?)?,
            Some(s) => legitimize_sort(s)?,
        };

        Ok(ListQuery {
            page,
            page_size,
            if_page,
            where_: raw_where,
            flat,
            sort,
        })
    }
}

/// Parse a JSON object parameter. Absent or non-object JSON gives an empty map.
pub fn convert_dict(param: Option<&str>) -> Result<Map<String, Value>, RestError> {
    let Some(param) = param.filter(|p| !p.trim().is_empty()) else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(param) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Ok(Map::new()),
        Err(e) => Err(RestError::InvalidJson(format!("{}: {}", param, e))),
    }
}

/// Fold `field_op` keys into the standard form:
/// `{"a_gte": 1, "a_lte": 2, "b": 3}` -> `{"a": {"$gte": 1, "$lte": 2}, "b": 3}`.
/// Only a trailing `_<filter name>` is split off, so `year_published_gte` targets `year_published`.
pub fn legitimize_where(where_: Map<String, Value>) -> Map<String, Value> {
    legitimize_where_with(where_, |_| false)
}

/// As [`legitimize_where`], but a key for which `is_field` holds is kept whole,
/// so a field named `opt_in` is not read as `opt` with `$in`.
pub fn legitimize_where_with(where_: Map<String, Value>, is_field: impl Fn(&str) -> bool) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, value) in where_ {
        let split = name
            .rsplit_once('_')
            .filter(|(column, op)| !column.is_empty() && is_filter_name(op) && !is_field(&name));
        match split {
            Some((column, op)) => {
                let entry = out
                    .entry(column.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !is_op_map(entry) {
                    // a bare value for the same field becomes `$eq`
                    let prev = entry.take();
                    let mut ops = Map::new();
                    ops.insert("$eq".into(), prev);
                    *entry = Value::Object(ops);
                }
                if let Value::Object(ops) = entry {
                    ops.insert(format!("${}", op), value);
                }
            }
            None => match out.get_mut(&name) {
                Some(Value::Object(ops)) => match value {
                    Value::Object(more) if more.keys().all(|k| k.len() > 1 && k.starts_with('$')) => ops.extend(more),
                    value => {
                        ops.insert("$eq".into(), value);
                    }
                },
                _ => {
                    out.insert(name, value);
                }
            },
        }
    }
    out
}

fn is_op_map(v: &Value) -> bool {
    match v {
        Value::Object(map) => map.keys().all(|k| k.len() > 1 && k.starts_with('$')),
        _ => false,
    }
}

fn sort_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\w+)(?:\s+(?i:(asc|desc)))?$").expect("static regex"))
}

/// `"a"` -> `[(a, asc)]`, `"a asc,b desc"` -> `[(a, asc), (b, desc)]`. `true` means descending.
pub fn legitimize_sort(sort: &str) -> Result<Vec<(String, bool)>, RestError> {
    sort.split(',')
        .map(|part| {
            let part = part.trim();
            let caps = sort_pattern()
                .captures(part)
                .ok_or_else(|| RestError::InvalidParam(format!("sort: {}", sort)))?;
            let descending = caps
                .get(2)
                .map_or(false, |m| m.as_str().eq_ignore_ascii_case("desc"));
            Ok((caps[1].to_string(), descending))
        })
        .collect()
}

fn sort_from_json(map: &Map<String, Value>) -> Result<Vec<(String, bool)>, RestError> {
    map.iter()
        .map(|(k, v)| match v {
            Value::Bool(desc) => Ok((k.clone(), *desc)),
            Value::String(s) if s.eq_ignore_ascii_case("desc") => Ok((k.clone(), true)),
            Value::String(s) if s.eq_ignore_ascii_case("asc") => Ok((k.clone(), false)),
            _ => Err(RestError::InvalidParam(format!("sort: {}={}", k, v))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn where_suffixes() {
        assert_eq!(legitimize_where(obj(json!({"a": 1}))), obj(json!({"a": 1})));
        assert_eq!(legitimize_where(obj(json!({"a_eq": 1}))), obj(json!({"a": {"$eq": 1}})));
        assert_eq!(legitimize_where(obj(json!({"a_in": [1, 2, 3]}))), obj(json!({"a": {"$in": [1, 2, 3]}})));
        assert_eq!(
            legitimize_where(obj(json!({"a_gte": 1, "a_lte": 2}))),
            obj(json!({"a": {"$gte": 1, "$lte": 2}}))
        );
        assert_eq!(
            legitimize_where(obj(json!({"year_published_gte": 1990, "first_name": "x"}))),
            obj(json!({"year_published": {"$gte": 1990}, "first_name": "x"}))
        );
    }

    #[test]
    fn bare_value_after_suffix_keeps_both() {
        assert_eq!(
            legitimize_where(obj(json!({"rating_gte": 4, "rating": 5}))),
            obj(json!({"rating": {"$gte": 4, "$eq": 5}}))
        );
        assert_eq!(
            legitimize_where(obj(json!({"rating": 5, "rating_gte": 4}))),
            obj(json!({"rating": {"$eq": 5, "$gte": 4}}))
        );
        assert_eq!(
            legitimize_where(obj(json!({"rating_gte": 4, "rating": {"$lte": 9}}))),
            obj(json!({"rating": {"$gte": 4, "$lte": 9}}))
        );
    }

    #[test]
    fn known_fields_are_not_split() {
        let is_field = |name: &str| name == "opt_in";
        assert_eq!(
            legitimize_where_with(obj(json!({"opt_in": "true", "age_in": "1,2"})), is_field),
            obj(json!({"opt_in": "true", "age": {"$in": "1,2"}}))
        );
        assert_eq!(
            legitimize_where_with(obj(json!({"opt_in_ne": "false"})), is_field),
            obj(json!({"opt_in": {"$ne": "false"}}))
        );
    }

    #[test]
    fn sort_strings() {
        assert_eq!(legitimize_sort("a").unwrap(), vec![("a".to_string(), false)]);
        assert_eq!(legitimize_sort("a asc").unwrap(), vec![("a".to_string(), false)]);
        assert_eq!(
            legitimize_sort("a asc,b desc").unwrap(),
            vec![("a".to_string(), false), ("b".to_string(), true)]
        );
        assert!(matches!(legitimize_sort("a sideways"), Err(RestError::InvalidParam(_))));
    }

    #[test]
    fn dict_params() {
        assert!(convert_dict(None).unwrap().is_empty());
        assert!(convert_dict(Some("[1,2]")).unwrap().is_empty());
        assert_eq!(convert_dict(Some(r#"{"id": 1}"#)).unwrap(), obj(json!({"id": 1})));
        assert!(matches!(convert_dict(Some("{nope")), Err(RestError::InvalidJson(_))));
    }

    #[test]
    fn list_query_from_params() {
        let config = ApiConfig::default();
        let params: HashMap<String, String> = [
            ("page", "2"),
            ("pageSize", "5"),
            ("where", r#"{"name": {"$icontains": "du"}}"#),
            ("age_gte", "3"),
            ("sort", "age desc"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let q = ListQuery::from_params(&params, &config).unwrap();
        assert_eq!((q.page, q.page_size, q.if_page), (2, 5, true));
        assert_eq!(q.where_, obj(json!({"name": {"$icontains": "du"}})));
        assert_eq!(q.flat, obj(json!({"age_gte": "3"})));
        assert_eq!(q.sort, vec![("age".to_string(), true)]);
    }

    #[test]
    fn list_query_defaults_and_limits() {
        let config = ApiConfig::default();
        let q = ListQuery::from_params(&HashMap::new(), &config).unwrap();
        assert_eq!((q.page, q.page_size, q.if_page), (1, config.default_page_size, true));

        let params: HashMap<String, String> =
            [("page_size".to_string(), "100000".to_string()), ("if_page".to_string(), "0".to_string())].into();
        let q = ListQuery::from_params(&params, &config).unwrap();
        assert_eq!(q.page_size, config.max_page_size);
        assert!(!q.if_page);

        let params: HashMap<String, String> = [("sort".to_string(), r#"{"a": true, "b": "asc"}"#.to_string())].into();
        let q = ListQuery::from_params(&params, &config).unwrap();
        assert_eq!(q.sort, vec![("a".to_string(), true), ("b".to_string(), false)]);
    }

    #[test]
    fn page_offset() {
        let p = PageParam { page: 3, page_size: 10, ..Default::default() };
        assert_eq!(p.offset(), 20);
    }
}
