use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::errors::ErrorCode;

/// Inbound request body: `{ service, action, params }`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GatewayRequest {
    pub service: String,
    pub action: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Result of a gateway call as seen by the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayResponse {
    Success { data: Value },
    Failure(ErrorBody),
}

impl GatewayResponse {
    pub fn success(data: Value) -> Self {
        Self::Success { data }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(error) => Some(error.code),
        }
    }
}

impl Serialize for GatewayResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("GatewayResponse", 2)?;
        match self {
            Self::Success { data } => {
                state.serialize_field("success", &true)?;
                state.serialize_field("data", data)?;
            }
            Self::Failure(error) => {
                state.serialize_field("success", &false)?;
                state.serialize_field("error", error)?;
            }
        }
        state.end()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResponseMeta {
    pub service: String,
    pub action: String,
    pub latency_ms: u64,
    pub correlation_id: String,
}

/// Response body written to the wire.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GatewayEnvelope {
    #[serde(flatten)]
    pub response: GatewayResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

impl GatewayEnvelope {
    pub fn bare(response: GatewayResponse) -> Self {
        Self { response, meta: None }
    }

    /// HTTP status for this envelope; successes are always 200.
    pub fn http_status(&self) -> u16 {
        self.response.error_code().map(|code| code.http_status()).unwrap_or(200)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{GatewayEnvelope, GatewayRequest, GatewayResponse, ResponseMeta};
    use crate::errors::GatewayError;

    #[test]
    fn success_envelope_serializes_data_and_meta() {
        let envelope = GatewayEnvelope {
            response: GatewayResponse::success(json!({"ok": 1})),
            meta: Some(ResponseMeta {
                service: "github".to_string(),
                action: "get_repo".to_string(),
                latency_ms: 12,
                correlation_id: "req-1".to_string(),
            }),
        };

        let value = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["data"], json!({"ok": 1}));
        assert_eq!(value["meta"]["latency_ms"], json!(12));
        assert!(value.get("error").is_none());
        assert_eq!(envelope.http_status(), 200);
    }

    #[test]
    fn failure_envelope_omits_data() {
        let envelope = GatewayEnvelope::bare(GatewayError::unknown_service("ghost").into_response());

        let value = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["error"]["code"], json!("UNKNOWN_SERVICE"));
        assert!(value.get("data").is_none());
        assert!(value.get("meta").is_none());
        assert_eq!(envelope.http_status(), 400);
    }

    #[test]
    fn request_params_default_to_null() {
        let request: GatewayRequest =
            serde_json::from_value(json!({"service": "exa", "action": "search"}))
                .expect("deserialize");
        assert!(request.params.is_null());
    }
}
