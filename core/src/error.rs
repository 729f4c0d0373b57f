//! Error types and HTTP status mapping

use serde::Serialize;
use thiserror::Error;

/// Result type alias for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Authentication error with HTTP status code mapping
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("invalid token: {message}")]
    InvalidToken { message: String },

    #[error("token verification failed: {message}")]
    TokenVerificationFailed { message: String },

    #[error("invalid state: {message}")]
    InvalidState { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("upstream error: {message}")]
    UpstreamError { message: String },

    #[error("upstream timeout")]
    UpstreamTimeout,
}

impl AuthError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    pub fn token_verification_failed(message: impl Into<String>) -> Self {
        Self::TokenVerificationFailed {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::UpstreamError {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::InvalidToken { .. } => 400,
            Self::InvalidState { .. } => 400,
            Self::TokenVerificationFailed { .. } => 401,
            Self::Configuration { .. } => 500,
            Self::Internal { .. } => 500,
            Self::UpstreamError { .. } => 502,
            Self::UpstreamTimeout => 504,
        }
    }

    /// Get the error key for this error
    pub fn error_key(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidToken { .. } => "invalid_token",
            Self::TokenVerificationFailed { .. } => "token_verification_failed",
            Self::InvalidState { .. } => "invalid_state",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
            Self::UpstreamError { .. } => "upstream_error",
            Self::UpstreamTimeout => "upstream_timeout",
        }
    }

    /// Build the JSON error body for this error
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_key().to_string(),
            message: self.to_string(),
        }
    }
}

/// Error response body (platform-neutral)
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::invalid_request("x").status_code(), 400);
        assert_eq!(AuthError::invalid_state("x").status_code(), 400);
        assert_eq!(AuthError::token_verification_failed("x").status_code(), 401);
        assert_eq!(AuthError::configuration("x").status_code(), 500);
        assert_eq!(AuthError::upstream_error("x").status_code(), 502);
        assert_eq!(AuthError::UpstreamTimeout.status_code(), 504);
    }

    #[test]
    fn test_error_response_body() {
        let body = AuthError::invalid_token("bad signature").to_error_response();
        assert_eq!(body.error, "invalid_token");
        assert_eq!(body.message, "invalid token: bad signature");
    }
}
