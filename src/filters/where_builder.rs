//! Builds the standard `where` document accepted by list routes.

use serde_json::{Map, Value};

/// Fluent builder for `{"field": {"$op": value}}` documents.
///
/// ```
/// use restful_sdk::filters::WhereBuilder;
///
/// let w = WhereBuilder::new()
///     .greater_than_equal("rating", 3)
///     .startswith("title", "Du");
/// assert_eq!(w.to_query_param(), r#"{"rating":{"$gte":3},"title":{"$startswith":"Du"}}"#);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WhereBuilder {
    data: Map<String, Value>,
}

impl WhereBuilder {
    pub fn new() -> Self {
        WhereBuilder::default()
    }

    fn push(mut self, op: &str, name: &str, value: Value) -> Self {
        let entry = self
            .data
            .entry(name.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(ops) = entry {
            ops.insert(format!("${}", op), value);
        }
        self
    }

    pub fn equal(self, name: &str, value: impl Into<Value>) -> Self {
        self.push("eq", name, value.into())
    }

    pub fn not_equal(self, name: &str, value: impl Into<Value>) -> Self {
        self.push("ne", name, value.into())
    }

    pub fn less_than(self, name: &str, value: impl Into<Value>) -> Self {
        self.push("lt", name, value.into())
    }

    pub fn less_than_equal(self, name: &str, value: impl Into<Value>) -> Self {
        self.push("lte", name, value.into())
    }

    pub fn greater_than(self, name: &str, value: impl Into<Value>) -> Self {
        self.push("gt", name, value.into())
    }

    pub fn greater_than_equal(self, name: &str, value: impl Into<Value>) -> Self {
        self.push("gte", name, value.into())
    }

    pub fn in_<V: Into<Value>>(self, name: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push("in", name, Value::Array(values))
    }

    pub fn not_in<V: Into<Value>>(self, name: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.push("nin", name, Value::Array(values))
    }

    pub fn contains(self, name: &str, value: impl Into<Value>) -> Self {
        self.push("contains", name, value.into())
    }

    pub fn icontains(self, name: &str, value: impl Into<Value>) -> Self {
        self.push("icontains", name, value.into())
    }

    pub fn startswith(self, name: &str, value: impl Into<Value>) -> Self {
        self.push("startswith", name, value.into())
    }

    pub fn endswith(self, name: &str, value: impl Into<Value>) -> Self {
        self.push("endswith", name, value.into())
    }

    pub fn between(self, name: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.push("between", name, Value::Array(vec![low.into(), high.into()]))
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.data
    }

    /// The JSON text for the `where` query parameter (not URL-encoded).
    pub fn to_query_param(&self) -> String {
        Value::Object(self.data.clone()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_operator_documents() {
        let w = WhereBuilder::new()
            .equal("a", 1)
            .not_equal("b", 1)
            .less_than("c", 1)
            .less_than_equal("c", 2)
            .in_("d", [1, 2])
            .not_in("e", ["x"])
            .contains("f", "y")
            .endswith("g", "z")
            .between("h", "2020-01-01", "2020-12-31");
        assert_eq!(
            Value::Object(w.into_map()),
            json!({
                "a": {"$eq": 1},
                "b": {"$ne": 1},
                "c": {"$lt": 1, "$lte": 2},
                "d": {"$in": [1, 2]},
                "e": {"$nin": ["x"]},
                "f": {"$contains": "y"},
                "g": {"$endswith": "z"},
                "h": {"$between": ["2020-01-01", "2020-12-31"]}
            })
        );
    }
}
