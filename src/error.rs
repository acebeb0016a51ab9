// SPDX-License-Identifier: AGPL-3.0-or-later

//! # API Error Handling
//!
//! One error type crosses the HTTP boundary: [`AppError`]. It carries the
//! HTTP status directly, a machine-readable [`ErrorKind`], a human message,
//! and an optional params map for request context. Handlers return
//! `Result<Json<T>, AppError>` and axum serializes the failure as JSON.
//!
//! ## JSON Response Format
//!
//! ```json
//! { "error": "insufficient balance", "code": "VALIDATION" }
//! ```

use std::collections::HashMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Failure classification used to map engine errors onto HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Connection,
    Database,
    Validation,
    Unknown,
    Timeout,
    Notfound,
    AlreadyExists,
    Unauthorized,
    Server,
    Limit,
}

/// Application error with HTTP status, kind and message.
///
/// A plain struct, not an enum hierarchy; the facade branches on `kind`
/// and forwards `status` as-is.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code for the response.
    pub status: StatusCode,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable error message (included in the JSON response).
    pub message: String,
    /// Optional request context (caller, request id, operation).
    pub params: Option<HashMap<String, String>>,
}

/// JSON body structure for error responses.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: ErrorKind,
}

impl AppError {
    pub fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            params: None,
        }
    }

    /// Attach a context parameter (caller, request id, ...).
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// 400: malformed or semantically invalid input.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::Validation, message)
    }

    /// 400: a configured cap was exceeded.
    pub fn limit(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::Limit, message)
    }

    /// 401: missing or invalid access key.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, ErrorKind::Unauthorized, message)
    }

    /// 404: resource does not exist.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorKind::Notfound, message)
    }

    /// 500: upstream collaborator (mint, oracle, LNURL) failed.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Connection,
            message,
        )
    }

    /// 400: upstream rejected the request before doing any work.
    pub fn connection_bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::Connection, message)
    }

    /// 500: persistence failure.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Database,
            message,
        )
    }

    /// 202: the operation is still in flight; the caller should poll.
    pub fn pending(message: impl Into<String>) -> Self {
        Self::new(StatusCode::ACCEPTED, ErrorKind::Timeout, message)
    }

    /// 500: anything unexpected.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unknown,
            message,
        )
    }

    /// 500: invariant violation on our side.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Server, message)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.kind,
        });
        (self.status, body).into_response()
    }
}

impl From<crate::store::StoreError> for AppError {
    fn from(err: crate::store::StoreError) -> Self {
        match err {
            crate::store::StoreError::NotFound(msg) => AppError::not_found(msg),
            crate::store::StoreError::Duplicate(msg) => AppError::new(
                StatusCode::CONFLICT,
                ErrorKind::AlreadyExists,
                msg,
            ),
            other => AppError::database(other.to_string()),
        }
    }
}
