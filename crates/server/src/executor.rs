use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use tracing::warn;

use warden_core::executor::{network_failure, normalize, ExecutionResult, Executor};
use warden_core::registry::{HttpMethod, UpstreamRequest};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends each upstream request exactly once over a shared rustls client.
pub struct HttpExecutor {
    client: Client,
    timeout: Duration,
}

impl HttpExecutor {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, timeout })
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, request: UpstreamRequest) -> ExecutionResult {
        let started = Instant::now();
        let host = request.url.host_str().unwrap_or("unknown").to_string();

        let mut builder = self.client.request(method(request.method), request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(error) => {
                let message = if error.is_timeout() {
                    format!("timed out after {}s", self.timeout.as_secs())
                } else if error.is_connect() {
                    "could not connect to upstream".to_string()
                } else {
                    error.without_url().to_string()
                };
                warn!(
                    event_name = "gateway.upstream.network_error",
                    upstream_host = %host,
                    error = %message,
                    "upstream request failed before a response was received"
                );
                return network_failure(&message, elapsed_ms(started));
            }
        };

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        match response.text().await {
            Ok(body) => normalize(status, &content_type, &body, elapsed_ms(started)),
            Err(error) => {
                let message = error.without_url().to_string();
                warn!(
                    event_name = "gateway.upstream.body_error",
                    upstream_host = %host,
                    status,
                    error = %message,
                    "upstream response body could not be read"
                );
                network_failure(&message, elapsed_ms(started))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use reqwest::Url;
    use serde_json::{json, Value};

    use warden_core::domain::envelope::GatewayResponse;
    use warden_core::errors::ErrorCode;
    use warden_core::executor::Executor;
    use warden_core::registry::{HttpMethod, UpstreamRequest};

    use super::HttpExecutor;

    async fn upstream() -> Url {
        let app = Router::new()
            .route(
                "/echo",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    Json(json!({"auth_seen": !auth.is_empty(), "body": body}))
                }),
            )
            .route("/text", get(|| async { "plain pong" }))
            .route(
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"}))) }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    "late"
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Url::parse(&format!("http://{address}/")).expect("url")
    }

    #[tokio::test]
    async fn json_post_carries_headers_and_body() {
        let base = upstream().await;
        let executor = HttpExecutor::new(Duration::from_secs(5)).expect("client");
        let request = UpstreamRequest::new(HttpMethod::Post, base.join("echo").expect("join"))
            .with_header("Authorization", "Bearer upstream-token")
            .with_json(json!({"query": "q"}));

        let result = executor.execute(request).await;

        assert_eq!(result.http_status, 200);
        assert_eq!(
            result.response,
            GatewayResponse::success(json!({"auth_seen": true, "body": {"query": "q"}}))
        );
    }

    #[tokio::test]
    async fn text_bodies_and_upstream_errors_are_normalized() {
        let base = upstream().await;
        let executor = HttpExecutor::new(Duration::from_secs(5)).expect("client");

        let text = executor
            .execute(UpstreamRequest::new(HttpMethod::Get, base.join("text").expect("join")))
            .await;
        assert_eq!(text.response, GatewayResponse::success(json!("plain pong")));

        let missing = executor
            .execute(UpstreamRequest::new(HttpMethod::Get, base.join("missing").expect("join")))
            .await;
        assert_eq!(missing.http_status, 404);
        assert_eq!(missing.response.error_code(), Some(ErrorCode::Upstream(404)));
    }

    #[tokio::test]
    async fn timeouts_become_network_errors() {
        let base = upstream().await;
        let executor = HttpExecutor::new(Duration::from_secs(1)).expect("client");

        let result = executor
            .execute(UpstreamRequest::new(HttpMethod::Get, base.join("slow").expect("join")))
            .await;

        assert_eq!(result.http_status, 0);
        match result.response {
            GatewayResponse::Failure(error) => {
                assert_eq!(error.code, ErrorCode::NetworkError);
                assert!(error.message.contains("timed out"), "{}", error.message);
            }
            other => panic!("expected network error, got {other:?}"),
        }
    }
}
