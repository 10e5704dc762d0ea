//! Translation of filter conditions and sort keys into MongoDB query documents.

use crate::backend::ModelInfo;
use crate::error::RestError;
use crate::filters::{Condition, FilterOp, SortKey};
use crate::schema::{FieldKind, Item};
use bson::{de::deserialize_from_bson, doc, oid::ObjectId, ser::serialize_to_bson, Bson, Document};
use serde_json::Value;

/// Key the id attribute is stored under.
pub const ID_KEY: &str = "_id";

fn bson_error(e: impl std::fmt::Display) -> RestError {
    RestError::Backend(format!("bson: {}", e))
}

fn field_key<'a>(model: &ModelInfo, attribute: &'a str) -> &'a str {
    if attribute == model.id_attribute {
        ID_KEY
    } else {
        attribute
    }
}

/// Ids that look like ObjectIds are stored as ObjectIds.
pub fn id_bson(v: &Value) -> Result<Bson, RestError> {
    if let Some(oid) = v.as_str().and_then(|s| ObjectId::parse_str(s).ok()) {
        return Ok(Bson::ObjectId(oid));
    }
    serialize_to_bson(v).map_err(bson_error)
}

/// Decimals are carried as strings in items but stored as doubles so they order numerically.
fn value_bson(model: &ModelInfo, attribute: &str, v: &Value) -> Result<Bson, RestError> {
    if attribute == model.id_attribute {
        return id_bson(v);
    }
    let decimal = model
        .schema
        .by_attribute(attribute)
        .map_or(false, |f| f.kind == FieldKind::Decimal);
    match v {
        Value::String(s) if decimal => s
            .parse::<f64>()
            .map(Bson::Double)
            .map_err(|_| RestError::Validation(format!("{}: not a decimal: {}", attribute, s))),
        _ => serialize_to_bson(v).map_err(bson_error),
    }
}

fn list_bson(model: &ModelInfo, attribute: &str, v: &Value) -> Result<Bson, RestError> {
    let items = v.as_array().map(Vec::as_slice).unwrap_or(&[]);
    items
        .iter()
        .map(|i| value_bson(model, attribute, i))
        .collect::<Result<Vec<_>, _>>()
        .map(Bson::Array)
}

fn regex_doc(pattern: String, ignore_case: bool) -> Document {
    if ignore_case {
        doc! { "$regex": pattern, "$options": "i" }
    } else {
        doc! { "$regex": pattern }
    }
}

fn condition_document(model: &ModelInfo, c: &Condition) -> Result<Document, RestError> {
    let key = field_key(model, &c.attribute);
    let value = || value_bson(model, &c.attribute, &c.value);
    let text = || regex::escape(c.value.as_str().unwrap_or_default());
    let expr = match c.op {
        FilterOp::Equal => doc! { "$eq": value()? },
        FilterOp::NotEqual => doc! { "$ne": value()? },
        FilterOp::LessThan => doc! { "$lt": value()? },
        FilterOp::LessThanEqual => doc! { "$lte": value()? },
        FilterOp::GreaterThan => doc! { "$gt": value()? },
        FilterOp::GreaterThanEqual => doc! { "$gte": value()? },
        FilterOp::In => doc! { "$in": list_bson(model, &c.attribute, &c.value)? },
        FilterOp::NotIn => doc! { "$nin": list_bson(model, &c.attribute, &c.value)? },
        FilterOp::Contains => doc! { "$elemMatch": { "$eq": serialize_to_bson(&c.value).map_err(bson_error)? } },
        FilterOp::StringContains => regex_doc(text(), false),
        FilterOp::StringIContains => regex_doc(text(), true),
        FilterOp::StartsWith => regex_doc(format!("^{}", text()), false),
        FilterOp::IStartsWith => regex_doc(format!("^{}", text()), true),
        FilterOp::EndsWith => regex_doc(format!("{}$", text()), false),
        FilterOp::IEndsWith => regex_doc(format!("{}$", text()), true),
        // FilterTable::document() never offers `between`
        FilterOp::DateBetween => {
            return Err(RestError::InvalidParam(format!(
                "{}: between is not supported on document backends",
                c.attribute
            )))
        }
    };
    Ok(doc! { key: expr })
}

/// AND of every condition; an empty list matches everything.
pub fn filter_document(model: &ModelInfo, conditions: &[Condition]) -> Result<Document, RestError> {
    let mut docs = conditions
        .iter()
        .map(|c| condition_document(model, c))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match docs.len() {
        0 => doc! {},
        1 => docs.remove(0),
        _ => doc! { "$and": docs },
    })
}

/// `{field: 1 | -1}` in key order, or `None` for natural order.
pub fn sort_document(model: &ModelInfo, sort: &[SortKey]) -> Option<Document> {
    if sort.is_empty() {
        return None;
    }
    let mut out = Document::new();
    for key in sort {
        out.insert(field_key(model, &key.attribute), if key.descending { -1 } else { 1 });
    }
    Some(out)
}

/// Item -> stored document, with the id under `_id`.
pub fn prepare_document(model: &ModelInfo, item: &Item) -> Result<Document, RestError> {
    let mut out = Document::new();
    for (k, v) in item {
        out.insert(field_key(model, k), value_bson(model, k, v)?);
    }
    Ok(out)
}

/// Stored document -> item: `_id` back to the id attribute, decimals back to strings.
pub fn restore_document(model: &ModelInfo, mut document: Document) -> Result<Item, RestError> {
    let id = document.remove(ID_KEY);
    let mut item = match deserialize_from_bson::<Value>(Bson::Document(document)).map_err(bson_error)? {
        Value::Object(map) => map,
        _ => Item::new(),
    };
    if let Some(id) = id {
        let id = match id {
            Bson::ObjectId(oid) => Value::String(oid.to_hex()),
            other => deserialize_from_bson::<Value>(other).map_err(bson_error)?,
        };
        item.insert(model.id_attribute.clone(), id);
    }
    for field in model.schema.fields.iter().filter(|f| f.kind == FieldKind::Decimal) {
        if let Some(v) = item.get_mut(field.attribute_name()) {
            let text = match v {
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            *v = Value::String(text);
        }
    }
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, Schema};
    use serde_json::json;

    fn model() -> ModelInfo {
        ModelInfo {
            name: "book".into(),
            id_attribute: "id".into(),
            schema: Schema::new()
                .field(FieldDef::new("id", FieldKind::String))
                .field(FieldDef::new("title", FieldKind::String))
                .field(FieldDef::new("price", FieldKind::Decimal))
                .field(FieldDef::new("tags", FieldKind::List)),
        }
    }

    fn cond(attribute: &str, op: FilterOp, kind: FieldKind, value: Value) -> Condition {
        Condition {
            attribute: attribute.into(),
            op,
            kind,
            value,
        }
    }

    #[test]
    fn single_and_combined_conditions() {
        let m = model();
        assert_eq!(filter_document(&m, &[]).unwrap(), doc! {});

        let one = filter_document(&m, &[cond("title", FilterOp::Equal, FieldKind::String, json!("Dune"))]).unwrap();
        assert_eq!(one, doc! { "title": { "$eq": "Dune" } });

        let both = filter_document(
            &m,
            &[
                cond("price", FilterOp::LessThan, FieldKind::Decimal, json!("9.5")),
                cond("title", FilterOp::IStartsWith, FieldKind::String, json!("a.b")),
            ],
        )
        .unwrap();
        assert_eq!(
            both,
            doc! { "$and": [
                { "price": { "$lt": 9.5 } },
                { "title": { "$regex": "^a\\.b", "$options": "i" } },
            ] }
        );
    }

    #[test]
    fn id_attribute_maps_to_object_id() {
        let m = model();
        let hex = "65a1f0c2e4b0a1b2c3d4e5f6";
        let d = filter_document(&m, &[cond("id", FilterOp::In, FieldKind::String, json!([hex]))]).unwrap();
        let oid = ObjectId::parse_str(hex).unwrap();
        assert_eq!(d, doc! { "_id": { "$in": [oid] } });
    }

    #[test]
    fn not_in_and_suffix_regexes() {
        let m = model();
        let d = filter_document(&m, &[cond("title", FilterOp::NotIn, FieldKind::String, json!(["Dune", "Emma"]))]).unwrap();
        assert_eq!(d, doc! { "title": { "$nin": ["Dune", "Emma"] } });

        let d = filter_document(&m, &[cond("title", FilterOp::IEndsWith, FieldKind::String, json!("(x)"))]).unwrap();
        assert_eq!(d, doc! { "title": { "$regex": "\\(x\\)$", "$options": "i" } });
    }

    #[test]
    fn between_is_rejected() {
        let c = cond("title", FilterOp::DateBetween, FieldKind::String, json!(["a", "b"]));
        assert!(matches!(filter_document(&model(), &[c]), Err(RestError::InvalidParam(_))));
    }

    #[test]
    fn list_contains_uses_elem_match() {
        let d = filter_document(&model(), &[cond("tags", FilterOp::Contains, FieldKind::List, json!("scifi"))]).unwrap();
        assert_eq!(d, doc! { "tags": { "$elemMatch": { "$eq": "scifi" } } });
    }

    #[test]
    fn sort_keys() {
        let m = model();
        assert!(sort_document(&m, &[]).is_none());
        let s = sort_document(
            &m,
            &[
                SortKey { attribute: "title".into(), descending: true },
                SortKey { attribute: "id".into(), descending: false },
            ],
        )
        .unwrap();
        assert_eq!(s, doc! { "title": -1, "_id": 1 });
    }

    #[test]
    fn documents_round_trip_through_storage_shape() {
        let m = model();
        let item = json!({"id": "b-1", "title": "Dune", "price": "9.5"}).as_object().cloned().unwrap();
        let stored = prepare_document(&m, &item).unwrap();
        assert_eq!(stored.get("_id"), Some(&Bson::String("b-1".into())));
        assert_eq!(stored.get("price"), Some(&Bson::Double(9.5)));
        assert_eq!(restore_document(&m, stored).unwrap(), item);
    }
}
