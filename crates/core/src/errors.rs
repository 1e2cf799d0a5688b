use std::fmt;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::domain::envelope::{ErrorBody, GatewayResponse};

/// Error codes surfaced at the gateway boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidRequest,
    UnknownService,
    UnknownAction,
    ValidationError,
    AuthFailed,
    ScopeDenied,
    RateLimited,
    NoCredential,
    Upstream(u16),
    NetworkError,
    InternalError,
}

impl ErrorCode {
    pub fn as_code(&self) -> String {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST".to_string(),
            Self::UnknownService => "UNKNOWN_SERVICE".to_string(),
            Self::UnknownAction => "UNKNOWN_ACTION".to_string(),
            Self::ValidationError => "VALIDATION_ERROR".to_string(),
            Self::AuthFailed => "AUTH_FAILED".to_string(),
            Self::ScopeDenied => "SCOPE_DENIED".to_string(),
            Self::RateLimited => "RATE_LIMITED".to_string(),
            Self::NoCredential => "NO_CREDENTIAL".to_string(),
            Self::Upstream(status) => format!("UPSTREAM_{status}"),
            Self::NetworkError => "NETWORK_ERROR".to_string(),
            Self::InternalError => "INTERNAL_ERROR".to_string(),
        }
    }

    /// HTTP status the gateway answers with when this code is returned.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest
            | Self::UnknownService
            | Self::UnknownAction
            | Self::ValidationError => 400,
            Self::AuthFailed => 401,
            Self::ScopeDenied => 403,
            Self::RateLimited => 429,
            Self::Upstream(_) | Self::NetworkError => 502,
            Self::NoCredential => 503,
            Self::InternalError => 500,
        }
    }

    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest
                | Self::UnknownService
                | Self::UnknownAction
                | Self::ValidationError
                | Self::AuthFailed
                | Self::ScopeDenied
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_code())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_code())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
    pub reset_at: Option<u64>,
    pub limit: Option<u32>,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), reset_at: None, limit: None }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn unknown_service(service: &str) -> Self {
        Self::new(ErrorCode::UnknownService, format!("unknown service `{service}`"))
    }

    pub fn unknown_action(service: &str, action: &str) -> Self {
        Self::new(
            ErrorCode::UnknownAction,
            format!("unknown action `{action}` for service `{service}`"),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Every authentication failure looks the same to the caller.
    pub fn auth_failed() -> Self {
        Self::new(ErrorCode::AuthFailed, "authentication failed")
    }

    pub fn scope_denied(service: &str, action: &str) -> Self {
        Self::new(
            ErrorCode::ScopeDenied,
            format!("agent is not permitted to call {service}.{action}"),
        )
    }

    pub fn rate_limited(message: impl Into<String>, limit: u32, reset_at: u64) -> Self {
        Self {
            code: ErrorCode::RateLimited,
            message: message.into(),
            reset_at: Some(reset_at),
            limit: Some(limit),
        }
    }

    pub fn no_credential(service: &str) -> Self {
        Self::new(
            ErrorCode::NoCredential,
            format!("no upstream credential configured for `{service}`"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn into_response(self) -> GatewayResponse {
        GatewayResponse::Failure(ErrorBody {
            code: self.code,
            message: self.message,
            reset_at: self.reset_at,
            limit: self.limit,
        })
    }
}

/// Failure of a backing store (agents, counters, audit log).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ErrorCode, GatewayError};

    #[test]
    fn upstream_code_embeds_http_status() {
        assert_eq!(ErrorCode::Upstream(404).as_code(), "UPSTREAM_404");
        assert_eq!(ErrorCode::Upstream(503).http_status(), 502);
    }

    #[test]
    fn caller_errors_map_to_client_statuses() {
        assert_eq!(ErrorCode::UnknownService.http_status(), 400);
        assert_eq!(ErrorCode::AuthFailed.http_status(), 401);
        assert_eq!(ErrorCode::ScopeDenied.http_status(), 403);
        assert!(ErrorCode::ValidationError.is_caller_error());
        assert!(!ErrorCode::NetworkError.is_caller_error());
    }

    #[test]
    fn rate_limited_error_carries_reset_and_limit() {
        let response =
            GatewayError::rate_limited("agent minute limit exceeded", 5, 120).into_response();
        let value = serde_json::to_value(&response).expect("serialize");

        assert_eq!(
            value,
            json!({
                "success": false,
                "error": {
                    "code": "RATE_LIMITED",
                    "message": "agent minute limit exceeded",
                    "reset_at": 120,
                    "limit": 5
                }
            })
        );
    }

    #[test]
    fn auth_failure_message_is_generic() {
        let error = GatewayError::auth_failed();
        assert_eq!(error.to_string(), "AUTH_FAILED: authentication failed");
    }
}
