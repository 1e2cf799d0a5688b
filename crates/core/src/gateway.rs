//! The request pipeline: authenticate, resolve, authorize, validate, admit, execute, scrub.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::auth::{Authenticator, Caller, CallerCredentials};
use crate::credentials::CredentialStore;
use crate::domain::envelope::{GatewayEnvelope, GatewayRequest, GatewayResponse, ResponseMeta};
use crate::errors::GatewayError;
use crate::executor::{ExecutionResult, Executor};
use crate::rate_limit::RateLimiter;
use crate::registry::{ActionError, ServiceRegistry};
use crate::scrub::{scrub, scrub_message};

pub struct Gateway {
    registry: Arc<ServiceRegistry>,
    authenticator: Arc<Authenticator>,
    rate_limiter: Arc<RateLimiter>,
    credentials: Arc<dyn CredentialStore>,
    executor: Arc<dyn Executor>,
    audit: Arc<dyn AuditSink>,
}

impl Gateway {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        authenticator: Arc<Authenticator>,
        rate_limiter: Arc<RateLimiter>,
        credentials: Arc<dyn CredentialStore>,
        executor: Arc<dyn Executor>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { registry, authenticator, rate_limiter, credentials, executor, audit }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Authenticates the caller, then dispatches.
    pub async fn handle(
        &self,
        credentials: &CallerCredentials,
        request: GatewayRequest,
        correlation_id: &str,
    ) -> GatewayEnvelope {
        let caller = match self.authenticator.authenticate(credentials, correlation_id).await {
            Ok(caller) => caller,
            Err(error) => {
                let caller = credentials
                    .agent_id
                    .as_deref()
                    .map(|agent_id| format!("agent:{agent_id}"))
                    .unwrap_or_else(|| "anonymous".to_string());
                return self.reject(&caller, &request, correlation_id, error);
            }
        };

        if let Caller::Agent(agent) = &caller {
            let recorded = self.authenticator.agents().record_usage(&agent.id, Utc::now()).await;
            if let Err(error) = recorded {
                warn!(
                    event_name = "gateway.agent.usage_record_failed",
                    correlation_id = %correlation_id,
                    agent_id = %agent.id,
                    error = %error,
                    "could not record agent usage"
                );
            }
        }

        self.dispatch(&caller, request, correlation_id).await
    }

    /// Runs an already-authenticated request through the pipeline.
    pub async fn dispatch(
        &self,
        caller: &Caller,
        request: GatewayRequest,
        correlation_id: &str,
    ) -> GatewayEnvelope {
        let label = caller.label();
        match self.execute_checked(caller, &request, correlation_id).await {
            Ok(result) => self.complete(&label, &request, correlation_id, result),
            Err(error) => self.reject(&label, &request, correlation_id, error),
        }
    }

    /// Runs the pipeline up to the upstream call. The agent window is charged before the service
    /// ceiling is consulted, so a request the ceiling turns away still counts against the agent.
    async fn execute_checked(
        &self,
        caller: &Caller,
        request: &GatewayRequest,
        correlation_id: &str,
    ) -> Result<ExecutionResult, GatewayError> {
        let service = request.service.as_str();
        let action = request.action.as_str();

        let definition =
            self.registry.lookup(service).ok_or_else(|| GatewayError::unknown_service(service))?;
        if !definition.has_action(action) {
            return Err(GatewayError::unknown_action(service, action));
        }

        if let Some(agent) = caller.agent() {
            if !agent.permits(service, action) {
                return Err(GatewayError::scope_denied(service, action));
            }
        }

        let prepared = definition.prepare(action, &request.params).map_err(|error| match error {
            ActionError::UnknownAction(_) => GatewayError::unknown_action(service, action),
            ActionError::Validation(error) => GatewayError::validation(error.to_string()),
        })?;

        if let Some(agent) = caller.agent() {
            let admission = self.rate_limiter.check_agent(agent, service).await;
            if !admission.allowed {
                return Err(GatewayError::rate_limited(
                    format!("agent `{}` rate limit exceeded", agent.id),
                    admission.limit,
                    admission.reset_at,
                ));
            }
        }

        let admission = self.rate_limiter.check_service(service).await;
        if !admission.allowed {
            return Err(GatewayError::rate_limited(
                format!("service `{service}` rate limit exceeded"),
                admission.limit,
                admission.reset_at,
            ));
        }

        let credential =
            self.credentials.resolve(service).ok_or_else(|| GatewayError::no_credential(service))?;
        let upstream = definition.build_request(&prepared, &credential);
        drop(credential);

        info!(
            event_name = "gateway.upstream.dispatch",
            correlation_id = %correlation_id,
            service,
            action,
            method = upstream.method.as_str(),
            "dispatching upstream request"
        );
        Ok(self.executor.execute(upstream).await)
    }

    fn complete(
        &self,
        caller: &str,
        request: &GatewayRequest,
        correlation_id: &str,
        result: ExecutionResult,
    ) -> GatewayEnvelope {
        let response = match result.response {
            GatewayResponse::Success { data } => GatewayResponse::success(scrub(data)),
            GatewayResponse::Failure(mut error) => {
                error.message = scrub_message(&error.message);
                GatewayResponse::Failure(error)
            }
        };

        let outcome =
            if response.is_success() { AuditOutcome::Success } else { AuditOutcome::Failed };
        let code = response.error_code().map(|code| code.as_code());
        info!(
            event_name = "gateway.request.completed",
            correlation_id = %correlation_id,
            caller = %caller,
            service = %request.service,
            action = %request.action,
            outcome = outcome.as_str(),
            code = code.as_deref().unwrap_or("OK"),
            upstream_status = result.http_status,
            latency_ms = result.latency_ms,
            "gateway request completed"
        );

        let mut event = AuditEvent::new(
            correlation_id,
            caller,
            &request.service,
            &request.action,
            outcome,
        )
        .with_http(result.http_status, result.latency_ms);
        if let Some(code) = code {
            event = event.with_code(code);
        }
        self.audit.emit(event);

        GatewayEnvelope {
            response,
            meta: Some(meta(request, correlation_id, result.latency_ms)),
        }
    }

    fn reject(
        &self,
        caller: &str,
        request: &GatewayRequest,
        correlation_id: &str,
        error: GatewayError,
    ) -> GatewayEnvelope {
        let code = error.code;
        let fault = if code.is_caller_error() { "caller" } else { "gateway" };
        if code.is_caller_error() {
            info!(
                event_name = "gateway.request.rejected",
                correlation_id = %correlation_id,
                caller = %caller,
                service = %request.service,
                action = %request.action,
                code = %code,
                fault,
                "gateway request rejected"
            );
        } else {
            warn!(
                event_name = "gateway.request.rejected",
                correlation_id = %correlation_id,
                caller = %caller,
                service = %request.service,
                action = %request.action,
                code = %code,
                fault,
                "gateway request rejected"
            );
        }
        self.audit.emit(
            AuditEvent::new(
                correlation_id,
                caller,
                &request.service,
                &request.action,
                AuditOutcome::Rejected,
            )
            .with_code(code.as_code())
            .with_http(code.http_status(), 0)
            .with_metadata("fault", fault),
        );

        GatewayEnvelope {
            response: error.into_response(),
            meta: Some(meta(request, correlation_id, 0)),
        }
    }
}

fn meta(request: &GatewayRequest, correlation_id: &str, latency_ms: u64) -> ResponseMeta {
    ResponseMeta {
        service: request.service.clone(),
        action: request.action.clone(),
        latency_ms,
        correlation_id: correlation_id.to_string(),
    }
}
