//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Problems found while declaring resources or registering them on an [`crate::Api`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("resource '{0}' has no backend and the api has no default backend factory")]
    MissingBackend(String),
    #[error("duplicate endpoint: {0}")]
    DuplicateEndpoint(String),
    #[error("unsupported http method for route '{rel}': {method}")]
    UnsupportedMethod { rel: String, method: String },
    #[error("unknown field '{field}' in resource '{resource}'")]
    UnknownField { resource: String, field: String },
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum RestError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("item not found: {0}")]
    ItemNotFound(String),
    #[error("filter not allowed: {0}")]
    FilterNotAllow(String),
    #[error("invalid param: {0}")]
    InvalidParam(String),
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("request must be json: {0}")]
    RequestMustBeJson(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("backend conflict: {0}")]
    BackendConflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("document store: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("backend: {0}")]
    Backend(String),
}

impl RestError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        RestError::ItemNotFound(what.to_string())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            RestError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            RestError::ItemNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            RestError::FilterNotAllow(_) => (StatusCode::BAD_REQUEST, "filter_not_allowed"),
            RestError::InvalidParam(_) => (StatusCode::BAD_REQUEST, "invalid_param"),
            RestError::InvalidJson(_) => (StatusCode::BAD_REQUEST, "invalid_json"),
            RestError::RequestMustBeJson(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "request_must_be_json"),
            RestError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            RestError::BackendConflict(_) => (StatusCode::CONFLICT, "conflict"),
            RestError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RestError::Db(e) => {
                if let sqlx::Error::RowNotFound = e {
                    (StatusCode::NOT_FOUND, "not_found")
                } else if is_unique_violation(e) {
                    (StatusCode::CONFLICT, "conflict")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
                }
            }
            RestError::Mongo(_) | RestError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "backend_error"),
        }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}
