use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Service-level errors. Business outcomes (NOT_FOUND, ALREADY_REDEEMED,
/// DUPLICATE, ...) are not errors; they are typed results returned by the
/// coordinator and the scan gate. This enum covers caller faults,
/// throttling and infrastructure failures only.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("insufficient role for this operation")]
    Forbidden,

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorBody {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Error::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            Error::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Error::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            Error::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded"),
            Error::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            // Infrastructure failures surface as a generic internal code,
            // distinct from every business code, and are always logged.
            Error::Store(_) | Error::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        if status.is_server_error() {
            tracing::error!(target: "prizegate::error", error = %self, "request failed");
        }

        let body = ErrorBody::new(code, &self.to_string(), status.as_u16());
        let mut response = (status, Json(body)).into_response();

        if let Error::RateLimited { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}
