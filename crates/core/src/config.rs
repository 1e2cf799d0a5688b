use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::ConfigCredentialStore;
use crate::rate_limit::{default_service_limits, ServiceLimit};
use crate::services::resend::DEFAULT_SENDER_DOMAIN;
use crate::services::SERVICE_NAMES;

pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub credentials: CredentialsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub upstream_timeout_secs: u64,
    /// Domain every outbound `from` address must belong to.
    pub sender_domain: String,
    pub service_limits: BTreeMap<String, ServiceLimit>,
}

#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Static bearer keys for trusted internal callers.
    pub api_keys: Vec<SecretString>,
}

#[derive(Clone, Debug, Default)]
pub struct CredentialsConfig {
    pub services: BTreeMap<String, SecretString>,
}

impl CredentialsConfig {
    pub fn store(&self) -> ConfigCredentialStore {
        ConfigCredentialStore::new(self.services.clone())
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub upstream_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://warden.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            gateway: GatewayConfig {
                upstream_timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
                sender_domain: DEFAULT_SENDER_DOMAIN.to_string(),
                service_limits: default_service_limits(),
            },
            auth: AuthConfig::default(),
            credentials: CredentialsConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("warden.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(gateway) = patch.gateway {
            if let Some(upstream_timeout_secs) = gateway.upstream_timeout_secs {
                self.gateway.upstream_timeout_secs = upstream_timeout_secs;
            }
            if let Some(sender_domain) = gateway.sender_domain {
                self.gateway.sender_domain = sender_domain;
            }
            for (service, limit) in gateway.service_limits {
                let current = self
                    .gateway
                    .service_limits
                    .get(&service)
                    .copied()
                    .unwrap_or(ServiceLimit::new(0, 0));
                self.gateway.service_limits.insert(
                    service,
                    ServiceLimit::new(
                        limit.per_minute.unwrap_or(current.per_minute),
                        limit.per_day.unwrap_or(current.per_day),
                    ),
                );
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(api_keys) = auth.api_keys {
                self.auth.api_keys = api_keys.into_iter().map(SecretString::from).collect();
            }
        }

        if let Some(credentials) = patch.credentials {
            for (service, value) in credentials {
                self.credentials.services.insert(service, value.into());
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("WARDEN_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("WARDEN_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("WARDEN_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("WARDEN_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("WARDEN_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("WARDEN_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("WARDEN_SERVER_PORT") {
            self.server.port = parse_u16("WARDEN_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("WARDEN_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("WARDEN_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("WARDEN_GATEWAY_UPSTREAM_TIMEOUT_SECS") {
            self.gateway.upstream_timeout_secs =
                parse_u64("WARDEN_GATEWAY_UPSTREAM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("WARDEN_GATEWAY_SENDER_DOMAIN") {
            self.gateway.sender_domain = value;
        }

        if let Some(value) = read_env("WARDEN_API_KEYS") {
            self.auth.api_keys = value
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(|key| SecretString::from(key.to_string()))
                .collect();
        }

        for service in SERVICE_NAMES {
            let key = format!("WARDEN_CREDENTIAL_{}", service.to_ascii_uppercase());
            if let Some(value) = read_env(&key) {
                self.credentials.services.insert(service.to_string(), value.into());
            }
        }

        let log_level = read_env("WARDEN_LOGGING_LEVEL").or_else(|| read_env("WARDEN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("WARDEN_LOGGING_FORMAT").or_else(|| read_env("WARDEN_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(upstream_timeout_secs) = overrides.upstream_timeout_secs {
            self.gateway.upstream_timeout_secs = upstream_timeout_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_gateway(&self.gateway)?;
        validate_auth(&self.auth)?;
        validate_credentials(&self.credentials)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("warden.toml"), PathBuf::from("config/warden.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    if gateway.upstream_timeout_secs == 0 || gateway.upstream_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "gateway.upstream_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    let domain = gateway.sender_domain.trim();
    if domain.is_empty() || domain.contains('@') || !domain.contains('.') {
        return Err(ConfigError::Validation(
            "gateway.sender_domain must be a bare domain such as `example.com`".to_string(),
        ));
    }

    for (service, limit) in &gateway.service_limits {
        if !SERVICE_NAMES.contains(&service.as_str()) {
            return Err(ConfigError::Validation(format!(
                "gateway.service_limits.{service} does not name a known service"
            )));
        }
        if limit.per_minute == 0 || limit.per_day == 0 {
            return Err(ConfigError::Validation(format!(
                "gateway.service_limits.{service} needs per_minute and per_day greater than zero"
            )));
        }
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    if auth.api_keys.iter().any(|key| key.expose_secret().trim().len() < 16) {
        return Err(ConfigError::Validation(
            "auth.api_keys entries must be at least 16 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_credentials(credentials: &CredentialsConfig) -> Result<(), ConfigError> {
    match credentials.services.keys().find(|service| !SERVICE_NAMES.contains(&service.as_str())) {
        Some(service) => Err(ConfigError::Validation(format!(
            "credentials.{service} does not name a known service (expected one of {})",
            SERVICE_NAMES.join("|")
        ))),
        None => Ok(()),
    }
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    gateway: Option<GatewayPatch>,
    auth: Option<AuthPatch>,
    credentials: Option<BTreeMap<String, String>>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayPatch {
    upstream_timeout_secs: Option<u64>,
    sender_domain: Option<String>,
    #[serde(default)]
    service_limits: BTreeMap<String, ServiceLimitPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceLimitPatch {
    per_minute: Option<u32>,
    per_day: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    api_keys: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
