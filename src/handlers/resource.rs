//! Handlers for the generated CRUD routes and the custom-action adapters.

use crate::error::RestError;
use crate::filters::ListQuery;
use crate::resource::ModelResource;
use crate::response::{success, success_created, success_msg, success_page};
use crate::route::{ActionInput, CollectionAction, ItemAction};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

type Resource = State<Arc<ModelResource>>;

fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, RestError> {
    match body {
        Ok(Json(v)) => Ok(v),
        Err(JsonRejection::MissingJsonContentType(e)) => Err(RestError::RequestMustBeJson(e.body_text())),
        Err(JsonRejection::JsonSyntaxError(e)) => Err(RestError::InvalidJson(e.body_text())),
        Err(JsonRejection::JsonDataError(e)) => Err(RestError::InvalidJson(e.body_text())),
        Err(e) => Err(RestError::BadRequest(e.body_text())),
    }
}

fn json_array(body: Result<Json<Value>, JsonRejection>) -> Result<Value, RestError> {
    match json_body(body)? {
        v @ Value::Array(_) => Ok(v),
        _ => Err(RestError::Validation("expected a JSON array".into())),
    }
}

/// GET /{name}
pub async fn instances(State(res): Resource, Query(params): Query<HashMap<String, String>>) -> Result<Response, RestError> {
    let query = ListQuery::from_params(&params, res.config())?;
    let param = res.service.parse_request(&query)?;
    let page = res.service.paginated_instances(&param).await?;
    let items = res.service.schema().dump_many(&page.items);
    if param.if_page {
        Ok(success_page(items, page.total).into_response())
    } else {
        Ok(success(items).into_response())
    }
}

/// GET /{name}/:id
pub async fn instance(State(res): Resource, Path(id): Path<String>) -> Result<Response, RestError> {
    let item = res.item(&id).await?;
    Ok(success(res.service.schema().dump(&item)).into_response())
}

/// POST /{name}: one object or an array of objects.
pub async fn create_entrance(
    State(res): Resource,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, RestError> {
    let created = res.service.create(&json_body(body)?).await?;
    Ok(success_created(created.dump(res.service.schema())).into_response())
}

/// POST /{name}/batch
pub async fn create_many(
    State(res): Resource,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, RestError> {
    let created = res.service.create(&json_array(body)?).await?;
    Ok(success_created(created.dump(res.service.schema())).into_response())
}

/// PUT /{name}: one object or an array of objects, each carrying its id.
pub async fn update_entrance(
    State(res): Resource,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, RestError> {
    let updated = res.service.update(&json_body(body)?).await?;
    Ok(success(updated.dump(res.service.schema())).into_response())
}

/// PUT /{name}/batch
pub async fn update_many(
    State(res): Resource,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, RestError> {
    let updated = res.service.update(&json_array(body)?).await?;
    Ok(success(updated.dump(res.service.schema())).into_response())
}

/// PUT /{name}/:id: the path id wins over any id in the body.
pub async fn update_instance(
    State(res): Resource,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, RestError> {
    let id = res.parse_id(&id)?;
    let mut props = match json_body(body)? {
        Value::Object(map) => map,
        _ => return Err(RestError::Validation("expected a JSON object".into())),
    };
    props.insert(res.service.id_field_name().to_string(), id);
    let updated = res.service.update(&Value::Object(props)).await?;
    Ok(success(updated.dump(res.service.schema())).into_response())
}

/// DELETE /{name}?ids=1,2 or with a JSON array body.
pub async fn delete_entrance(
    State(res): Resource,
    Query(params): Query<HashMap<String, String>>,
    body: Option<Json<Value>>,
) -> Result<Response, RestError> {
    let ids = match (params.get("ids"), body) {
        (Some(ids), _) => Value::Array(
            ids.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
        (None, Some(Json(v @ Value::Array(_)))) => v,
        (None, Some(Json(_))) => return Err(RestError::Validation("expected a JSON array of ids".into())),
        (None, None) => return Err(RestError::BadRequest("no ids given".into())),
    };
    res.service.delete(&ids).await?;
    Ok(success_msg(Value::Null, "deleted").into_response())
}

/// DELETE /{name}/:id
pub async fn delete_instance(State(res): Resource, Path(id): Path<String>) -> Result<Response, RestError> {
    let id = res.parse_id(&id)?;
    res.service.delete_one(&id).await?;
    Ok(success_msg(Value::Null, "deleted").into_response())
}

pub(crate) async fn run_collection(
    res: Arc<ModelResource>,
    action: Arc<dyn CollectionAction>,
    query: HashMap<String, String>,
    body: Option<Json<Value>>,
) -> Result<Response, RestError> {
    let input = ActionInput {
        query,
        body: body.map(|Json(v)| v),
    };
    let result = action.call(&res, input).await?;
    Ok(success(result).into_response())
}

pub(crate) async fn run_item(
    res: Arc<ModelResource>,
    action: Arc<dyn ItemAction>,
    id: String,
    query: HashMap<String, String>,
    body: Option<Json<Value>>,
) -> Result<Response, RestError> {
    let item = res.item(&id).await?;
    let input = ActionInput {
        query,
        body: body.map(|Json(v)| v),
    };
    let result = action.call(&res, item, input).await?;
    Ok(success(result).into_response())
}
