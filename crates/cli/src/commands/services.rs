use serde_json::json;
use warden_core::config::{AppConfig, LoadOptions};
use warden_core::services::default_registry;

use crate::commands::CommandResult;

/// Lists registered services with their auth strategy, actions and credential readiness.
pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "services",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let registry = match default_registry(&config.gateway.sender_domain) {
        Ok(registry) => registry,
        Err(error) => {
            return CommandResult::failure("services", "registry", error.to_string(), 3);
        }
    };

    let configured = config.credentials.store().configured_services();
    let services: Vec<_> = registry
        .describe()
        .into_iter()
        .map(|descriptor| {
            let limit = config.gateway.service_limits.get(&descriptor.name);
            let credential_configured = configured.contains(&descriptor.name);
            json!({
                "name": descriptor.name,
                "base_url": descriptor.base_url,
                "auth": descriptor.auth,
                "actions": descriptor.actions,
                "credential_configured": credential_configured,
                "per_minute": limit.map(|limit| limit.per_minute),
                "per_day": limit.map(|limit| limit.per_day),
            })
        })
        .collect();

    CommandResult::success_with_data(
        "services",
        format!("{} services registered", services.len()),
        json!({ "services": services }),
    )
}
