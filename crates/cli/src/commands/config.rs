use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use toml::Value;
use warden_core::config::{AppConfig, LoadOptions};
use warden_core::services::SERVICE_NAMES;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, &[env_key], config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "WARDEN_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "WARDEN_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "WARDEN_DATABASE_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", "WARDEN_SERVER_BIND_ADDRESS"),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", "WARDEN_SERVER_PORT"),
    ));
    lines.push(render_line(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
        source("server.graceful_shutdown_secs", "WARDEN_SERVER_GRACEFUL_SHUTDOWN_SECS"),
    ));

    lines.push(render_line(
        "gateway.upstream_timeout_secs",
        &config.gateway.upstream_timeout_secs.to_string(),
        source("gateway.upstream_timeout_secs", "WARDEN_GATEWAY_UPSTREAM_TIMEOUT_SECS"),
    ));
    lines.push(render_line(
        "gateway.sender_domain",
        &config.gateway.sender_domain,
        source("gateway.sender_domain", "WARDEN_GATEWAY_SENDER_DOMAIN"),
    ));
    for (service, limit) in &config.gateway.service_limits {
        let key_path = format!("gateway.service_limits.{service}");
        lines.push(render_line(
            &key_path,
            &format!("{}/min, {}/day", limit.per_minute, limit.per_day),
            field_source(&key_path, &[], config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    }

    lines.push(render_line(
        "auth.api_keys",
        &format!("<{} redacted>", config.auth.api_keys.len()),
        source("auth.api_keys", "WARDEN_API_KEYS"),
    ));

    for service in SERVICE_NAMES {
        let key_path = format!("credentials.{service}");
        let env_key = format!("WARDEN_CREDENTIAL_{}", service.to_ascii_uppercase());
        let value = match config.credentials.services.get(*service) {
            Some(secret) => redact_credential(secret.expose_secret()),
            None => "<unset>".to_string(),
        };
        lines.push(render_line(
            &key_path,
            &value,
            field_source(
                &key_path,
                &[env_key.as_str()],
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        ));
    }

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        field_source(
            "logging.level",
            &["WARDEN_LOGGING_LEVEL", "WARDEN_LOG_LEVEL"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        field_source(
            "logging.format",
            &["WARDEN_LOGGING_FORMAT", "WARDEN_LOG_FORMAT"],
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        ),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("warden.toml"), PathBuf::from("config/warden.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps a vendor prefix such as `ghp_` or `sk_live_` visible, nothing else.
fn redact_credential(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.rfind(['_', '-']) {
        Some(index) if index + 1 < trimmed.len() && index <= 8 => {
            format!("{}***", &trimmed[..=index])
        }
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_credential};

    #[test]
    fn credentials_keep_only_their_prefix() {
        assert_eq!(redact_credential("ghp_abcdef123456"), "ghp_***");
        assert_eq!(redact_credential("sk_live_abc"), "sk_live_***");
        assert_eq!(redact_credential("opaquetoken"), "<redacted>");
        assert_eq!(redact_credential("  "), "<empty>");
    }

    #[test]
    fn nested_key_paths_are_found_in_file_documents() {
        let doc: toml::Value =
            "[gateway.service_limits.github]\nper_minute = 5\n".parse().expect("toml");
        assert!(contains_path(&doc, "gateway.service_limits.github"));
        assert!(!contains_path(&doc, "gateway.sender_domain"));
    }
}
