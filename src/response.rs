//! Standard response envelope helpers.

use axum::{http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct SuccessBody<T> {
    pub msg: String,
    pub result: T,
    /// Total number of matching rows; only set for paginated lists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

fn body<T: Serialize>(status: StatusCode, msg: &str, result: T, total: Option<u64>) -> (StatusCode, Json<SuccessBody<T>>) {
    (
        status,
        Json(SuccessBody {
            msg: msg.to_string(),
            result,
            total,
        }),
    )
}

pub fn success<T: Serialize>(result: T) -> (StatusCode, Json<SuccessBody<T>>) {
    body(StatusCode::OK, "success", result, None)
}

pub fn success_msg<T: Serialize>(result: T, msg: &str) -> (StatusCode, Json<SuccessBody<T>>) {
    body(StatusCode::OK, msg, result, None)
}

pub fn success_created<T: Serialize>(result: T) -> (StatusCode, Json<SuccessBody<T>>) {
    body(StatusCode::CREATED, "created", result, None)
}

pub fn success_page<T: Serialize>(result: Vec<T>, total: u64) -> (StatusCode, Json<SuccessBody<Vec<T>>>) {
    body(StatusCode::OK, "success", result, Some(total))
}
