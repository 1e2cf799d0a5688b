use async_trait::async_trait;
use serde_json::Value;

use crate::domain::envelope::{ErrorBody, GatewayResponse};
use crate::errors::ErrorCode;
use crate::registry::UpstreamRequest;

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    pub response: GatewayResponse,
    pub latency_ms: u64,
    /// Upstream HTTP status, or 0 when no response was received.
    pub http_status: u16,
}

/// Performs exactly one outbound call per request. Implementations never retry and never
/// return an error: every outcome is folded into [`ExecutionResult`].
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: UpstreamRequest) -> ExecutionResult;
}

/// Folds an upstream response into the gateway envelope.
///
/// Bodies are parsed as JSON when the content type says so, falling back to text.
pub fn normalize(status: u16, content_type: &str, body: &str, latency_ms: u64) -> ExecutionResult {
    let data = if content_type.to_ascii_lowercase().contains("application/json") {
        serde_json::from_str::<Value>(body).unwrap_or_else(|_| Value::String(body.to_string()))
    } else {
        Value::String(body.to_string())
    };

    let response = if (200..300).contains(&status) {
        GatewayResponse::success(data)
    } else {
        let message = match data {
            Value::String(text) => text,
            other => other.to_string(),
        };
        GatewayResponse::Failure(ErrorBody {
            code: ErrorCode::Upstream(status),
            message,
            reset_at: None,
            limit: None,
        })
    };

    ExecutionResult { response, latency_ms, http_status: status }
}

pub fn network_failure(message: &str, latency_ms: u64) -> ExecutionResult {
    ExecutionResult {
        response: GatewayResponse::Failure(ErrorBody {
            code: ErrorCode::NetworkError,
            message: format!("Upstream request failed: {message}"),
            reset_at: None,
            limit: None,
        }),
        latency_ms,
        http_status: 0,
    }
}
