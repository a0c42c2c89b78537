use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed token")]
    TokenMalformed,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token type mismatch")]
    TokenTypeMismatch,

    #[error("Session revoked")]
    SessionRevoked,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    // Catch-all for unexpected failures on the authentication path. Renders
    // as a generic 401 so internals never leak through auth responses.
    #[error("Authentication failed")]
    UnknownError,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Stable machine-readable code carried in every error body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::TokenMalformed => "TOKEN_MALFORMED",
            AppError::TokenExpired => "TOKEN_EXPIRED",
            AppError::TokenTypeMismatch => "TOKEN_TYPE_MISMATCH",
            AppError::SessionRevoked => "SESSION_REVOKED",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::UnknownError => "UNKNOWN_ERROR",
            AppError::DatabaseError(_)
            | AppError::CacheError(_)
            | AppError::ConfigError(_)
            | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AppError::TokenExpired,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => AppError::TokenMalformed,
            _ => AppError::Unauthorized,
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // 5xx details stay in the logs; clients get a generic message.
        let message = if status.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = json!({
            "error": {
                "status": status.as_u16(),
                "code": self.code(),
                "message": message
            }
        });

        let mut builder = HttpResponse::build(status);
        if let AppError::RateLimited { retry_after } = self {
            builder.insert_header(("Retry-After", retry_after.to_string()));
        }
        builder.json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::TokenMalformed => StatusCode::BAD_REQUEST,
            AppError::TokenExpired
            | AppError::TokenTypeMismatch
            | AppError::Unauthorized
            | AppError::UnknownError => StatusCode::UNAUTHORIZED,
            AppError::SessionRevoked | AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::DatabaseError(_)
            | AppError::CacheError(_)
            | AppError::ConfigError(_)
            | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::InternalError(_)));

        let config_err = config::ConfigError::NotFound(String::from("key not found"));
        let app_err: AppError = config_err.into();
        assert!(matches!(app_err, AppError::ConfigError(_)));

        let db_err = sqlx::Error::RowNotFound;
        let app_err: AppError = db_err.into();
        assert!(matches!(app_err, AppError::DatabaseError(_)));
    }

    #[test]
    fn test_jwt_error_conversion() {
        use jsonwebtoken::errors::{Error, ErrorKind};

        let err: AppError = Error::from(ErrorKind::ExpiredSignature).into();
        assert!(matches!(err, AppError::TokenExpired));

        let err: AppError = Error::from(ErrorKind::InvalidToken).into();
        assert!(matches!(err, AppError::TokenMalformed));

        let err: AppError = Error::from(ErrorKind::InvalidSignature).into();
        assert!(matches!(err, AppError::Unauthorized));
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AppError::TokenMalformed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::TokenExpired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::SessionRevoked.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::RateLimited { retry_after: 60 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::ValidationError("invalid input".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::DatabaseError("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::TokenExpired.code(), "TOKEN_EXPIRED");
        assert_eq!(AppError::SessionRevoked.code(), "SESSION_REVOKED");
        assert_eq!(AppError::UnknownError.code(), "UNKNOWN_ERROR");
        assert_eq!(AppError::CacheError("x".into()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_retry_after_header() {
        let resp = AppError::RateLimited { retry_after: 60 }.error_response();
        let header = resp.headers().get("Retry-After").unwrap();
        assert_eq!(header.to_str().unwrap(), "60");
    }

    #[test]
    fn test_error_display() {
        let err = AppError::ValidationError("test error".to_string());
        assert_eq!(err.to_string(), "Validation error: test error");

        let err = AppError::TokenTypeMismatch;
        assert_eq!(err.to_string(), "Token type mismatch");
    }
}
