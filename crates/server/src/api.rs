use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use warden_core::auth::{CallerCredentials, NONCE_TTL};
use warden_core::domain::agent::AgentId;
use warden_core::domain::envelope::{GatewayEnvelope, GatewayRequest, GatewayResponse};
use warden_core::errors::{ErrorCode, GatewayError};
use warden_core::rate_limit::unix_now;
use warden_core::registry::ServiceDescriptor;
use warden_core::Gateway;

pub const AGENT_HEADER: &str = "x-warden-agent";
pub const NONCE_HEADER: &str = "x-warden-nonce";
pub const SIGNATURE_HEADER: &str = "x-warden-signature";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct ApiState {
    gateway: Arc<Gateway>,
}

impl ApiState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NonceRequest {
    pub agent_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NonceResponse {
    pub nonce: String,
    pub expires_in: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServicesResponse {
    pub services: Vec<ServiceDescriptor>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/request", post(dispatch))
        .route("/v1/nonce", post(issue_nonce))
        .route("/v1/services", get(list_services))
        .with_state(state)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = header_value(headers, header::AUTHORIZATION.as_str())?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
}

pub fn caller_credentials(headers: &HeaderMap) -> CallerCredentials {
    CallerCredentials {
        bearer: bearer_token(headers),
        agent_id: header_value(headers, AGENT_HEADER),
        nonce: header_value(headers, NONCE_HEADER),
        signature: header_value(headers, SIGNATURE_HEADER),
    }
}

fn envelope_response(envelope: GatewayEnvelope, correlation_id: &str) -> Response {
    let status =
        StatusCode::from_u16(envelope.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    if let GatewayResponse::Failure(error) = &envelope.response {
        if let (ErrorCode::RateLimited, Some(reset_at)) = (error.code, error.reset_at) {
            let retry_after = reset_at.saturating_sub(unix_now()).max(1);
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
    }

    (status, headers, Json(envelope)).into_response()
}

pub async fn dispatch(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    let request = match serde_json::from_slice::<GatewayRequest>(&body) {
        Ok(request) => request,
        Err(error) => {
            info!(
                event_name = "gateway.request.malformed",
                correlation_id = %correlation_id,
                error = %error,
                "request envelope could not be parsed"
            );
            let error = GatewayError::invalid_request(format!("malformed request envelope: {error}"));
            return envelope_response(GatewayEnvelope::bare(error.into_response()), &correlation_id);
        }
    };

    let credentials = caller_credentials(&headers);
    let envelope = state.gateway.handle(&credentials, request, &correlation_id).await;
    envelope_response(envelope, &correlation_id)
}

/// Issues a challenge nonce to a known, enabled agent.
pub async fn issue_nonce(State(state): State<ApiState>, body: Bytes) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    let agent_id = match serde_json::from_slice::<NonceRequest>(&body) {
        Ok(request) if !request.agent_id.trim().is_empty() => request.agent_id.trim().to_string(),
        Ok(_) => {
            let error = GatewayError::invalid_request("agent_id must not be empty");
            return envelope_response(GatewayEnvelope::bare(error.into_response()), &correlation_id);
        }
        Err(error) => {
            let error = GatewayError::invalid_request(format!("malformed nonce request: {error}"));
            return envelope_response(GatewayEnvelope::bare(error.into_response()), &correlation_id);
        }
    };

    let authenticator = state.gateway.authenticator();
    let eligible = matches!(
        authenticator.agents().find_by_id(&AgentId(agent_id.clone())).await,
        Ok(Some(agent)) if agent.enabled
    );
    if !eligible {
        info!(
            event_name = "gateway.nonce.refused",
            correlation_id = %correlation_id,
            agent_id = %agent_id,
            "nonce refused for unknown or disabled agent"
        );
        let error = GatewayError::auth_failed();
        return envelope_response(GatewayEnvelope::bare(error.into_response()), &correlation_id);
    }

    let nonce = authenticator.nonces().issue(&agent_id).await;
    info!(
        event_name = "gateway.nonce.issued",
        correlation_id = %correlation_id,
        agent_id = %agent_id,
        "challenge nonce issued"
    );
    (StatusCode::OK, Json(NonceResponse { nonce, expires_in: NONCE_TTL.as_secs() })).into_response()
}

pub async fn list_services(State(state): State<ApiState>) -> Json<ServicesResponse> {
    Json(ServicesResponse { services: state.gateway.registry().describe() })
}
