//! The closed error-kind set of spec.md §7, exposed as one typed `ApiError`.
//!
//! Generalizes the teacher's ad hoc `(StatusCode, String)` handler return
//! type into a single enum implementing `IntoResponse`, so every handler in
//! `crate::handlers` returns `Result<_, ApiError>` uniformly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("malformed query option: {0}")]
    BadOption(String),
    #[error("invalid $orderby: {0}")]
    OrderByInvalid(String),
    #[error("invalid $select: {0}")]
    SelectInvalid(String),
    #[error("invalid $expand: {0}")]
    ExpandInvalid(String),
    #[error("invalid $filter: {0}")]
    FilterInvalid(String),
    #[error("no such relation: {0}")]
    NoSuchRelation(String),
    #[error("not found")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("backend error: {0}")]
    BackendError(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl ApiError {
    fn kind_name(&self) -> &'static str {
        match self {
            ApiError::BadOption(_) => "BadOption",
            ApiError::OrderByInvalid(_) => "OrderByInvalid",
            ApiError::SelectInvalid(_) => "SelectInvalid",
            ApiError::ExpandInvalid(_) => "ExpandInvalid",
            ApiError::FilterInvalid(_) => "FilterInvalid",
            ApiError::NoSuchRelation(_) => "NoSuchRelation",
            ApiError::NotFound => "NotFound",
            ApiError::MethodNotAllowed => "MethodNotAllowed",
            ApiError::Conflict(_) => "Conflict",
            ApiError::BackendError(_) => "BackendError",
            ApiError::NotImplemented(_) => "NotImplemented",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadOption(_)
            | ApiError::OrderByInvalid(_)
            | ApiError::SelectInvalid(_)
            | ApiError::ExpandInvalid(_)
            | ApiError::FilterInvalid(_) => StatusCode::BAD_REQUEST,
            ApiError::NoSuchRelation(_) | ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.kind_name(),
            message: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

/// A Postgres foreign-key violation (SQLSTATE 23503) becomes a 409 Conflict;
/// every other backend failure is a 500, per spec.md §7.
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23503") {
                return ApiError::Conflict(db_err.message().to_string());
            }
        }
        ApiError::BackendError(err.to_string())
    }
}
