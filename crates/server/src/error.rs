use axum::http::header::ETAG;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use service::ServiceError;

pub type ServerResult<T> = Result<T, ServerError>;

/// Kind of request a service error surfaced from.
///
/// A missing blueprint or output is a 404 on reads but a 400 on writes, and a
/// missing version is a 422 when updating a blueprint but a 404 when creating
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Write,
    UpdateBlueprint,
}

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{error}")]
    Service {
        error: ServiceError,
        operation: Operation,
    },

    #[error("required If-Match header is missing")]
    MissingIfMatch,

    #[error("invalid query parameter: {0}")]
    InvalidQueryParameter(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forwarding failed: {0}")]
    Forwarding(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Not found")]
    NotFound,
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServerError {
    pub fn read(error: ServiceError) -> Self {
        ServerError::Service {
            error,
            operation: Operation::Read,
        }
    }

    pub fn create(error: ServiceError) -> Self {
        ServerError::Service {
            error,
            operation: Operation::Create,
        }
    }

    pub fn write(error: ServiceError) -> Self {
        ServerError::Service {
            error,
            operation: Operation::Write,
        }
    }

    pub fn update_blueprint(error: ServiceError) -> Self {
        ServerError::Service {
            error,
            operation: Operation::UpdateBlueprint,
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Service { error, operation } => service_status(error.root(), *operation),
            ServerError::MissingIfMatch
            | ServerError::InvalidQueryParameter(_)
            | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Forwarding(_) => StatusCode::BAD_GATEWAY,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Service { error, .. } => service_code(error.root()),
            ServerError::MissingIfMatch => "MISSING_IF_MATCH",
            ServerError::InvalidQueryParameter(_) => "INVALID_QUERY_PARAMETER",
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::Forwarding(_) => "FORWARDING_ERROR",
            ServerError::Internal(_) => "INTERNAL_ERROR",
            ServerError::NotFound => "NOT_FOUND",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        let ServerError::Service { error, operation } = self else {
            return None;
        };
        service_details(error, *operation)
    }

    /// Message shown to clients; internal failures are not described.
    fn public_message(&self) -> String {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self, "Request failed");
            return "internal error".to_string();
        }
        self.to_string()
    }
}

fn service_status(error: &ServiceError, operation: Operation) -> StatusCode {
    match error {
        ServiceError::FilterNotFound(_) => match operation {
            Operation::Read => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        },
        ServiceError::VersionNotFound(_) => match operation {
            Operation::UpdateBlueprint => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::NOT_FOUND,
        },
        ServiceError::OutputNotFound(_) => match operation {
            Operation::Read => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        },
        ServiceError::DimensionNotFound(_) | ServiceError::OptionNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        ServiceError::Conflict(_) => StatusCode::CONFLICT,
        ServiceError::IncorrectDimensions(_)
        | ServiceError::IncorrectDimensionOptions { .. }
        | ServiceError::BadRequest(_)
        | ServiceError::Patch(_) => StatusCode::BAD_REQUEST,
        ServiceError::Forbidden(_) | ServiceError::AlreadySubmitted(_) => StatusCode::FORBIDDEN,
        ServiceError::Unauthorised => StatusCode::UNAUTHORIZED,
        ServiceError::PatchFailed { error, .. } => service_status(error, operation),
        ServiceError::Catalog(_) | ServiceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn service_code(error: &ServiceError) -> &'static str {
    match error {
        ServiceError::FilterNotFound(_) => "FILTER_NOT_FOUND",
        ServiceError::OutputNotFound(_) => "FILTER_OUTPUT_NOT_FOUND",
        ServiceError::Conflict(_) => "CONFLICT",
        ServiceError::DimensionNotFound(_) => "DIMENSION_NOT_FOUND",
        ServiceError::OptionNotFound(_) => "OPTION_NOT_FOUND",
        ServiceError::IncorrectDimensions(_) => "INCORRECT_DIMENSIONS",
        ServiceError::IncorrectDimensionOptions { .. } => "INCORRECT_DIMENSION_OPTIONS",
        ServiceError::VersionNotFound(_) => "VERSION_NOT_FOUND",
        ServiceError::Forbidden(_) => "FORBIDDEN",
        ServiceError::AlreadySubmitted(_) => "ALREADY_SUBMITTED",
        ServiceError::Unauthorised => "UNAUTHORISED",
        ServiceError::BadRequest(_) => "BAD_REQUEST",
        ServiceError::Patch(_) => "INVALID_PATCH",
        ServiceError::PatchFailed { error, .. } => service_code(error),
        ServiceError::Catalog(_) => "UPSTREAM_ERROR",
        ServiceError::Store(_) => "INTERNAL_ERROR",
    }
}

fn service_details(error: &ServiceError, operation: Operation) -> Option<serde_json::Value> {
    match error {
        ServiceError::PatchFailed {
            successful,
            etag,
            error,
        } => {
            // The operation that stopped the patch, described like a top-level error.
            let message = if service_status(error, operation).is_server_error() {
                "internal error".to_string()
            } else {
                error.to_string()
            };
            let mut cause = json!({ "code": service_code(error), "message": message });
            if let Some(details) = service_details(error, operation) {
                cause["details"] = details;
            }
            Some(json!({ "successful": successful, "etag": etag, "cause": cause }))
        }
        ServiceError::IncorrectDimensions(names) => Some(json!({ "dimensions": names })),
        ServiceError::IncorrectDimensionOptions { dimension, options } => {
            Some(json!({ "dimension": dimension, "options": options }))
        }
        ServiceError::Forbidden(fields) => Some(json!({ "fields": fields })),
        _ => None,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.public_message(),
                details: self.details(),
            },
        };

        let mut response = (status, Json(body)).into_response();

        // A stopped patch still advanced the blueprint; report where it is now.
        if let ServerError::Service {
            error: ServiceError::PatchFailed { etag, .. },
            ..
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(etag) {
                response.headers_mut().insert(ETAG, value);
            }
        }

        response
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::BadRequest(format!("JSON parse error: {err}"))
    }
}
