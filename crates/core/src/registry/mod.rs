//! Catalog of upstream services and the request-building contract each action implements.

pub mod schema;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;

pub use schema::{ActionError, Validate, ValidationError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthStrategy {
    /// `Authorization: Bearer <credential>`
    Bearer,
    /// HTTP Basic with the credential as username and an empty password.
    Basic,
    /// Credential sent verbatim under a named header.
    Header { name: String },
    /// Credential merged into the JSON body under `field`.
    BodyField { field: String },
}

impl AuthStrategy {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bearer => "bearer",
            Self::Basic => "basic",
            Self::Header { .. } => "header",
            Self::BodyField { .. } => "body",
        }
    }

    pub fn inject(&self, request: &mut UpstreamRequest, credential: &SecretString) {
        let credential = credential.expose_secret();
        match self {
            Self::Bearer => {
                request.set_header("Authorization", format!("Bearer {credential}"));
            }
            Self::Basic => {
                let encoded = STANDARD.encode(format!("{credential}:"));
                request.set_header("Authorization", format!("Basic {encoded}"));
            }
            Self::Header { name } => request.set_header(name, credential.to_string()),
            Self::BodyField { field } => {
                let body = request.body.get_or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(object) = body {
                    object.insert(field.clone(), Value::String(credential.to_string()));
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Fully-formed outbound call. Once a credential is injected this value must not be logged.
#[derive(Clone, PartialEq)]
pub struct UpstreamRequest {
    pub url: Url,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl UpstreamRequest {
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self { url, method, headers: Vec::new(), body: None }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value.into());
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Replaces any existing header with the same case-insensitive name.
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Debug for UpstreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("UpstreamRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &header_names)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// A validated action, ready to become an [`UpstreamRequest`].
pub trait BuildRequest: Send + Sync {
    fn build(&self, base_url: &Url) -> UpstreamRequest;
}

/// The closed set of actions a service supports.
pub trait ServiceActions: Send + Sync {
    fn action_names(&self) -> &'static [&'static str];

    /// Parses and validates `params` for `action`; no credential is involved.
    fn prepare(&self, action: &str, params: &Value) -> Result<Box<dyn BuildRequest>, ActionError>;
}

/// Output of [`ServiceDefinition::prepare`]. Holding one proves validation already passed.
pub struct PreparedRequest {
    service: String,
    action: String,
    builder: Box<dyn BuildRequest>,
}

impl fmt::Debug for PreparedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedRequest")
            .field("service", &self.service)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ServiceDefinition {
    pub name: String,
    pub base_url: Url,
    pub auth: AuthStrategy,
    pub actions: Arc<dyn ServiceActions>,
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("auth", &self.auth)
            .field("actions", &self.actions.action_names())
            .finish()
    }
}

impl ServiceDefinition {
    pub fn new(
        name: impl Into<String>,
        base_url: Url,
        auth: AuthStrategy,
        actions: Arc<dyn ServiceActions>,
    ) -> Self {
        Self { name: name.into(), base_url, auth, actions }
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.action_names().contains(&action)
    }

    pub fn prepare(&self, action: &str, params: &Value) -> Result<PreparedRequest, ActionError> {
        let builder = self.actions.prepare(action, params)?;
        Ok(PreparedRequest { service: self.name.clone(), action: action.to_string(), builder })
    }

    /// Builds the outbound request and injects the credential per [`AuthStrategy`].
    pub fn build_request(
        &self,
        prepared: &PreparedRequest,
        credential: &SecretString,
    ) -> UpstreamRequest {
        let mut request = prepared.builder.build(&self.base_url);
        self.auth.inject(&mut request, credential);
        request
    }

    pub fn describe(&self) -> ServiceDescriptor {
        ServiceDescriptor {
            name: self.name.clone(),
            base_url: self.base_url.to_string(),
            auth: self.auth.kind(),
            actions: self.actions.action_names().to_vec(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub base_url: String,
    pub auth: &'static str,
    pub actions: Vec<&'static str>,
}

#[derive(Clone, Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceDefinition>,
}

impl ServiceRegistry {
    /// Registering an existing name replaces the previous definition.
    pub fn register(&mut self, definition: ServiceDefinition) {
        self.services.insert(definition.name.clone(), definition);
    }

    pub fn lookup(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.get(name)
    }

    pub fn list_services(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn describe(&self) -> Vec<ServiceDescriptor> {
        self.services.values().map(ServiceDefinition::describe).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Appends percent-encoded path `segments` and `query` pairs to `base`.
pub fn endpoint(base: &Url, segments: &[&str], query: &[(&str, String)]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in query {
            pairs.append_pair(name, value);
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;
    use serde_json::{json, Value};
    use url::Url;

    use super::{
        endpoint, ActionError, AuthStrategy, BuildRequest, HttpMethod, ServiceActions,
        ServiceDefinition, ServiceRegistry, UpstreamRequest,
    };

    struct Echo;

    impl BuildRequest for Echo {
        fn build(&self, base_url: &Url) -> UpstreamRequest {
            UpstreamRequest::new(HttpMethod::Post, endpoint(base_url, &["echo"], &[]))
                .with_json(json!({"q": "hello"}))
        }
    }

    struct EchoActions(&'static [&'static str]);

    impl ServiceActions for EchoActions {
        fn action_names(&self) -> &'static [&'static str] {
            self.0
        }

        fn prepare(&self, action: &str, _params: &Value) -> Result<Box<dyn BuildRequest>, ActionError> {
            if self.0.contains(&action) {
                Ok(Box::new(Echo))
            } else {
                Err(ActionError::UnknownAction(action.to_string()))
            }
        }
    }

    fn definition(name: &str, auth: AuthStrategy, actions: &'static [&'static str]) -> ServiceDefinition {
        ServiceDefinition::new(
            name,
            Url::parse("https://api.example.test/v1").expect("url"),
            auth,
            Arc::new(EchoActions(actions)),
        )
    }

    fn credential() -> SecretString {
        String::from("cred-123").into()
    }

    #[test]
    fn registry_lookup_and_last_write_wins() {
        let mut registry = ServiceRegistry::default();
        registry.register(definition("echo", AuthStrategy::Bearer, &["one"]));
        registry.register(definition("echo", AuthStrategy::Basic, &["two"]));
        registry.register(definition("alpha", AuthStrategy::Bearer, &["one"]));

        assert_eq!(registry.list_services(), vec!["alpha".to_string(), "echo".to_string()]);
        let echo = registry.lookup("echo").expect("registered");
        assert_eq!(echo.auth, AuthStrategy::Basic);
        assert!(echo.has_action("two"));
        assert!(!echo.has_action("one"));
        assert!(registry.lookup("ghost").is_none());
    }

    #[test]
    fn each_auth_strategy_injects_the_credential() {
        let bearer = definition("s", AuthStrategy::Bearer, &["go"]);
        let prepared = bearer.prepare("go", &Value::Null).expect("prepare");
        let request = bearer.build_request(&prepared, &credential());
        assert_eq!(request.header("authorization"), Some("Bearer cred-123"));
        assert_eq!(request.url.as_str(), "https://api.example.test/v1/echo");

        let basic = definition("s", AuthStrategy::Basic, &["go"]);
        let request = basic.build_request(&basic.prepare("go", &Value::Null).expect("prepare"), &credential());
        assert_eq!(request.header("Authorization"), Some("Basic Y3JlZC0xMjM6"));

        let header =
            definition("s", AuthStrategy::Header { name: "X-Api-Key".to_string() }, &["go"]);
        let request = header.build_request(&header.prepare("go", &Value::Null).expect("prepare"), &credential());
        assert_eq!(request.header("x-api-key"), Some("cred-123"));

        let body = definition("s", AuthStrategy::BodyField { field: "api_key".to_string() }, &["go"]);
        let request = body.build_request(&body.prepare("go", &Value::Null).expect("prepare"), &credential());
        assert_eq!(request.body, Some(json!({"q": "hello", "api_key": "cred-123"})));
        assert!(request.header("authorization").is_none());
    }

    #[test]
    fn debug_output_hides_header_values() {
        let bearer = definition("s", AuthStrategy::Bearer, &["go"]);
        let request =
            bearer.build_request(&bearer.prepare("go", &Value::Null).expect("prepare"), &credential());
        let debug = format!("{request:?}");
        assert!(debug.contains("Authorization"));
        assert!(!debug.contains("cred-123"));
    }

    #[test]
    fn endpoint_percent_encodes_segments() {
        let base = Url::parse("https://api.example.test/client/v4").expect("url");
        let url = endpoint(&base, &["zones", "a/b c"], &[("page", "2".to_string())]);
        assert_eq!(url.as_str(), "https://api.example.test/client/v4/zones/a%2Fb%20c?page=2");

        let root = Url::parse("https://api.example.test").expect("url");
        assert_eq!(endpoint(&root, &["search"], &[]).as_str(), "https://api.example.test/search");
    }
}
