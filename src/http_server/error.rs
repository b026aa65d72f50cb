//! Defines the custom `ApiError` type for the HTTP server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::{
    delivery::DeliveryError, engine::PipelineError, persistence::error::PersistenceError,
    registry::RegistryError,
};

/// A custom error type for the API that can be converted into an HTTP response.
#[derive(Debug)]
pub enum ApiError {
    /// Represents an unauthorized request.
    Unauthorized,

    /// Represents a resource that could not be found.
    NotFound(String),

    /// Represents a malformed request.
    BadRequest(String),

    /// Represents a generic internal server error.
    InternalServerError(String),
}

/// Converts a `PersistenceError` into an `ApiError`.
///
/// This allows for the convenient use of the `?` operator in handlers
/// on functions that return `Result<_, PersistenceError>`.
impl From<PersistenceError> for ApiError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            PersistenceError::InvalidInput(message) => ApiError::BadRequest(message),
            _ => ApiError::InternalServerError(err.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidSubscription(message) => ApiError::BadRequest(message),
            RegistryError::NotFound(_) => ApiError::NotFound("Subscriber not found".to_string()),
            RegistryError::Persistence(e) => e.into(),
        }
    }
}

impl From<DeliveryError> for ApiError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::UnknownSubscriber(_) => {
                ApiError::NotFound("Subscriber not found".to_string())
            }
            DeliveryError::Registry(e) => e.into(),
            DeliveryError::Persistence(e) => e.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Persistence(e) => e.into(),
            PipelineError::Registry(e) => e.into(),
            PipelineError::Delivery(e) => e.into(),
        }
    }
}

/// Implements the conversion from `ApiError` into an `axum` response.
///
/// This is the central point for mapping internal application errors to
/// user-facing HTTP responses.
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ApiError::Unauthorized =>
                (StatusCode::UNAUTHORIZED, json!({ "success": false, "error": "Unauthorized" })),
            ApiError::InternalServerError(err) => {
                tracing::error!(error = %err, "Internal server error.");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "error": "An internal server error occurred" }),
                )
            }
            ApiError::NotFound(message) =>
                (StatusCode::NOT_FOUND, json!({ "success": false, "error": message })),
            ApiError::BadRequest(message) =>
                (StatusCode::BAD_REQUEST, json!({ "success": false, "error": message })),
        };

        (status, Json(body)).into_response()
    }
}
