use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

#[derive(Debug, Clone, Error)]
pub enum ThrottlerError {
    /// Caller exhausted the quota of the current window.
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// The counter backend could not be reached or answered garbage.
    #[error("Counter storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A route referenced a policy the registry does not know.
    #[error("Unknown throttle policy '{0}'")]
    UnknownPolicy(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for ThrottlerError {
    fn from(err: redis::RedisError) -> Self {
        ThrottlerError::StorageUnavailable(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &ThrottlerError) -> Self {
        let status = err.status_code().as_u16();
        match err {
            ThrottlerError::RateLimitExceeded { .. } => {
                Self::new("rate_limit_exceeded", "Too many requests", status)
            }
            ThrottlerError::StorageUnavailable(_) => {
                Self::new("storage_unavailable", "Rate limit storage is unavailable", status)
            }
            ThrottlerError::UnknownPolicy(name) => {
                Self::new("configuration_error", &format!("Unknown throttle policy '{}'", name), status)
            }
            ThrottlerError::Configuration(msg) => Self::new("configuration_error", msg, status),
            ThrottlerError::Validation(msg) => Self::new("validation_error", msg, status),
            ThrottlerError::Internal(msg) => Self::new("internal_error", msg, status),
        }
    }
}

impl ThrottlerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ThrottlerError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ThrottlerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ThrottlerError::StorageUnavailable(_)
            | ThrottlerError::UnknownPolicy(_)
            | ThrottlerError::Configuration(_)
            | ThrottlerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ThrottlerError {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(ErrorResponse::from_error(&self))).into_response();

        if let ThrottlerError::RateLimitExceeded { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_exceeded_response() {
        let response = ThrottlerError::RateLimitExceeded { retry_after: 10 }.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "10");
    }

    #[test]
    fn test_storage_unavailable_is_server_error() {
        let err = ThrottlerError::StorageUnavailable("connection refused".into());
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_error_body_codes() {
        let body = ErrorResponse::from_error(&ThrottlerError::Validation("bad".into()));
        assert_eq!(body.error, "validation_error");
        assert_eq!(body.code, 422);

        let body = ErrorResponse::from_error(&ThrottlerError::RateLimitExceeded { retry_after: 3 });
        assert_eq!(body.error, "rate_limit_exceeded");
        assert_eq!(body.code, 429);
    }
}
