//! Built-in upstream service definitions.

pub mod cloudflare;
pub mod exa;
pub mod github;
pub mod resend;
pub mod stripe;
pub mod tavily;

use std::sync::Arc;

use url::Url;

use crate::registry::{AuthStrategy, ServiceDefinition, ServiceRegistry};

pub const SERVICE_NAMES: &[&str] = &["cloudflare", "exa", "github", "resend", "stripe", "tavily"];

/// Registry with every built-in service. `sender_domain` restricts Resend's `from` address.
pub fn default_registry(sender_domain: &str) -> Result<ServiceRegistry, url::ParseError> {
    let mut registry = ServiceRegistry::default();

    registry.register(ServiceDefinition::new(
        "github",
        Url::parse(github::BASE_URL)?,
        AuthStrategy::Bearer,
        Arc::new(github::GithubActions),
    ));
    registry.register(ServiceDefinition::new(
        "cloudflare",
        Url::parse(cloudflare::BASE_URL)?,
        AuthStrategy::Bearer,
        Arc::new(cloudflare::CloudflareActions),
    ));
    registry.register(ServiceDefinition::new(
        "stripe",
        Url::parse(stripe::BASE_URL)?,
        AuthStrategy::Basic,
        Arc::new(stripe::StripeActions),
    ));
    registry.register(ServiceDefinition::new(
        "tavily",
        Url::parse(tavily::BASE_URL)?,
        AuthStrategy::BodyField { field: "api_key".to_string() },
        Arc::new(tavily::TavilyActions),
    ));
    registry.register(ServiceDefinition::new(
        "exa",
        Url::parse(exa::BASE_URL)?,
        AuthStrategy::Bearer,
        Arc::new(exa::ExaActions),
    ));
    registry.register(ServiceDefinition::new(
        "resend",
        Url::parse(resend::BASE_URL)?,
        AuthStrategy::Bearer,
        Arc::new(resend::ResendActions::new(sender_domain)),
    ));

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;

    use super::{default_registry, SERVICE_NAMES};
    use crate::registry::ActionError;

    #[test]
    fn default_registry_lists_every_service() {
        let registry = default_registry("grove.place").expect("registry");
        assert_eq!(registry.list_services(), SERVICE_NAMES.to_vec());
    }

    #[test]
    fn stripe_uses_basic_auth_and_tavily_body_key() {
        let registry = default_registry("grove.place").expect("registry");
        let credential: SecretString = String::from("sk_test_abc").into();

        let stripe = registry.lookup("stripe").expect("stripe");
        let prepared = stripe.prepare("get_customer", &json!({"customer_id": "cus_1"})).expect("ok");
        let request = stripe.build_request(&prepared, &credential);
        assert_eq!(request.header("authorization"), Some("Basic c2tfdGVzdF9hYmM6"));

        let tavily = registry.lookup("tavily").expect("tavily");
        let prepared = tavily.prepare("search", &json!({"query": "q"})).expect("ok");
        let request = tavily.build_request(&prepared, &credential);
        assert_eq!(request.body.as_ref().and_then(|body| body.get("api_key")), Some(&json!("sk_test_abc")));
    }

    #[test]
    fn unknown_action_surfaces_from_definition() {
        let registry = default_registry("grove.place").expect("registry");
        let exa = registry.lookup("exa").expect("exa");
        assert!(matches!(
            exa.prepare("delete_index", &json!({})),
            Err(ActionError::UnknownAction(ref action)) if action == "delete_index"
        ));
    }
}
