//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE for one resource table.

use crate::backend::ModelInfo;
use crate::filters::{Condition, FilterOp, SortKey};
use crate::schema::{FieldKind, Item};
use serde::Deserialize;
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from resource declarations).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Table a resource is stored in.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SqlTable {
    #[serde(default)]
    pub schema: Option<String>,
    pub name: String,
}

impl SqlTable {
    pub fn new(name: impl Into<String>) -> Self {
        SqlTable {
            schema: None,
            name: name.into(),
        }
    }

    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    fn qualified(&self) -> String {
        match &self.schema {
            Some(s) => format!("{}.{}", quoted(s), quoted(&self.name)),
            None => quoted(&self.name),
        }
    }
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf::default()
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }

    /// Push a value and return its placeholder, cast when the column has a known type.
    fn placeholder(&mut self, v: Value, cast: Option<&str>) -> String {
        let n = self.push_param(v);
        match cast {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

fn cast_for<'a>(model: &'a ModelInfo, attribute: &str) -> Option<&'a str> {
    model.schema.by_attribute(attribute).and_then(|f| f.pg_cast())
}

/// SELECT list: numeric columns as col::text so sqlx returns String.
fn select_column_list(model: &ModelInfo) -> String {
    model
        .attributes()
        .into_iter()
        .map(|attr| {
            let q = quoted(attr);
            let numeric = model.schema.by_attribute(attr).map_or(false, |f| {
                f.kind == FieldKind::Decimal || f.pg_cast().map_or(false, |t| t == "numeric" || t.contains('.'))
            });
            if numeric {
                format!("{}::text AS {}", q, q)
            } else {
                q
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escape LIKE wildcards so user input matches literally.
fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn condition_sql(q: &mut QueryBuf, model: &ModelInfo, c: &Condition) -> String {
    let col = quoted(&c.attribute);
    let cast = cast_for(model, &c.attribute);
    let compare = |q: &mut QueryBuf, sym: &str| format!("{} {} {}", col, sym, q.placeholder(c.value.clone(), cast));
    let like = |q: &mut QueryBuf, op: &str, prefix: &str, suffix: &str| {
        let text = c.value.as_str().unwrap_or_default();
        let pattern = format!("{}{}{}", prefix, like_escape(text), suffix);
        format!("{} {} {}", col, op, q.placeholder(Value::String(pattern), None))
    };
    let items = c.value.as_array().map(Vec::as_slice).unwrap_or(&[]);
    match c.op {
        FilterOp::Equal if c.value.is_null() => format!("{} IS NULL", col),
        FilterOp::NotEqual if c.value.is_null() => format!("{} IS NOT NULL", col),
        FilterOp::Equal => compare(q, "="),
        FilterOp::NotEqual => compare(q, "<>"),
        FilterOp::LessThan => compare(q, "<"),
        FilterOp::LessThanEqual => compare(q, "<="),
        FilterOp::GreaterThan => compare(q, ">"),
        FilterOp::GreaterThanEqual => compare(q, ">="),
        FilterOp::In | FilterOp::NotIn if items.is_empty() => {
            // x IN () is invalid SQL
            if c.op == FilterOp::In { "FALSE".into() } else { "TRUE".into() }
        }
        FilterOp::In | FilterOp::NotIn => {
            let placeholders: Vec<String> = items.iter().map(|v| q.placeholder(v.clone(), cast)).collect();
            let op = if c.op == FilterOp::In { "IN" } else { "NOT IN" };
            format!("{} {} ({})", col, op, placeholders.join(", "))
        }
        FilterOp::Contains => {
            let needle = Value::Array(vec![c.value.clone()]);
            format!("{} @> {}", col, q.placeholder(needle, Some("jsonb")))
        }
        FilterOp::StringContains => like(q, "LIKE", "%", "%"),
        FilterOp::StringIContains => like(q, "ILIKE", "%", "%"),
        FilterOp::StartsWith => like(q, "LIKE", "", "%"),
        FilterOp::IStartsWith => like(q, "ILIKE", "", "%"),
        FilterOp::EndsWith => like(q, "LIKE", "%", ""),
        FilterOp::IEndsWith => like(q, "ILIKE", "%", ""),
        FilterOp::DateBetween => {
            let low = q.placeholder(items.first().cloned().unwrap_or(Value::Null), cast);
            let high = q.placeholder(items.get(1).cloned().unwrap_or(Value::Null), cast);
            format!("{} BETWEEN {} AND {}", col, low, high)
        }
    }
}

fn where_clause(q: &mut QueryBuf, model: &ModelInfo, conditions: &[Condition]) -> String {
    if conditions.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = conditions.iter().map(|c| condition_sql(q, model, c)).collect();
    format!(" WHERE {}", parts.join(" AND "))
}

/// ORDER BY the requested keys, then the id column so pages are stable.
fn order_clause(model: &ModelInfo, sort: &[SortKey]) -> String {
    let mut parts: Vec<String> = sort
        .iter()
        .map(|k| format!("{} {}", quoted(&k.attribute), if k.descending { "DESC" } else { "ASC" }))
        .collect();
    if !sort.iter().any(|k| k.attribute == model.id_attribute) {
        parts.push(format!("{} ASC", quoted(&model.id_attribute)));
    }
    format!(" ORDER BY {}", parts.join(", "))
}

/// SELECT rows matching all conditions; `page` is `(limit, offset)`.
pub fn select_page(
    table: &SqlTable,
    model: &ModelInfo,
    conditions: &[Condition],
    sort: &[SortKey],
    page: Option<(u32, u64)>,
) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_ = where_clause(&mut q, model, conditions);
    let limit_clause = page
        .map(|(limit, offset)| format!(" LIMIT {} OFFSET {}", limit, offset))
        .unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}",
        select_column_list(model),
        table.qualified(),
        where_,
        order_clause(model, sort),
        limit_clause
    );
    q
}

/// SELECT COUNT(*) AS "count" of rows matching all conditions.
pub fn count(table: &SqlTable, model: &ModelInfo, conditions: &[Condition]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_ = where_clause(&mut q, model, conditions);
    q.sql = format!("SELECT COUNT(*) AS \"count\" FROM {}{}", table.qualified(), where_);
    q
}

/// SELECT by primary key.
pub fn select_by_id(table: &SqlTable, model: &ModelInfo, id: &Value) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.placeholder(id.clone(), cast_for(model, &model.id_attribute));
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        select_column_list(model),
        table.qualified(),
        quoted(&model.id_attribute),
        ph
    );
    q
}

/// INSERT the attributes present in `item`; absent columns take their database default.
pub fn insert(table: &SqlTable, model: &ModelInfo, item: &Item) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for attr in model.attributes() {
        let Some(v) = item.get(attr) else { continue };
        if attr == model.id_attribute && v.is_null() {
            continue;
        }
        placeholders.push(q.placeholder(v.clone(), cast_for(model, attr)));
        cols.push(quoted(attr));
    }
    let returning = select_column_list(model);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table.qualified(), returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table.qualified(),
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by id: SET only attributes present in `changes`. The id itself is never changed.
/// With nothing to set this degrades to a SELECT by id.
pub fn update(table: &SqlTable, model: &ModelInfo, id: &Value, changes: &Item) -> QueryBuf {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for attr in model.attributes() {
        if attr == model.id_attribute {
            continue;
        }
        let Some(v) = changes.get(attr) else { continue };
        let rhs = q.placeholder(v.clone(), cast_for(model, attr));
        sets.push(format!("{} = {}", quoted(attr), rhs));
    }
    if sets.is_empty() {
        return select_by_id(table, model, id);
    }
    let id_ph = q.placeholder(id.clone(), cast_for(model, &model.id_attribute));
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {} RETURNING {}",
        table.qualified(),
        sets.join(", "),
        quoted(&model.id_attribute),
        id_ph,
        select_column_list(model)
    );
    q
}

/// DELETE every row whose id is in `ids`.
pub fn delete_in(table: &SqlTable, model: &ModelInfo, ids: &[Value]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let cast = cast_for(model, &model.id_attribute);
    let placeholders: Vec<String> = ids.iter().map(|id| q.placeholder(id.clone(), cast)).collect();
    q.sql = if placeholders.is_empty() {
        format!("DELETE FROM {} WHERE FALSE", table.qualified())
    } else {
        format!(
            "DELETE FROM {} WHERE {} IN ({})",
            table.qualified(),
            quoted(&model.id_attribute),
            placeholders.join(", ")
        )
    };
    q
}
