use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};
use warden_core::config::{AppConfig, ConfigError, LoadOptions};
use warden_core::rate_limit::unix_now;
use warden_core::services::default_registry;
use warden_core::{Authenticator, Gateway, InMemoryNonceStore, RateLimiter, ServiceRegistry};
use warden_db::{
    connect_with_settings, migrations, DbPool, SqlAgentRepository, SqlAuditSink, SqlCounterStore,
};

use crate::executor::HttpExecutor;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub registry: Arc<ServiceRegistry>,
    pub gateway: Arc<Gateway>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("service registry could not be built: {0}")]
    Registry(String),
    #[error("upstream http client could not be built: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    config.validate()?;

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let counters = SqlCounterStore::new(db_pool.clone());
    match counters.purge_expired(unix_now()).await {
        Ok(purged) => info!(
            event_name = "system.bootstrap.counters_purged",
            correlation_id = "bootstrap",
            purged,
            "expired rate counters removed"
        ),
        Err(error) => warn!(
            event_name = "system.bootstrap.counters_purge_failed",
            correlation_id = "bootstrap",
            error = %error,
            "expired rate counters could not be removed"
        ),
    }

    let registry = Arc::new(
        default_registry(&config.gateway.sender_domain)
            .map_err(|error| BootstrapError::Registry(error.to_string()))?,
    );
    let executor =
        HttpExecutor::new(Duration::from_secs(config.gateway.upstream_timeout_secs))
            .map_err(BootstrapError::HttpClient)?;
    let credentials = config.credentials.store();
    let configured = credentials.configured_services();

    let gateway = Gateway::new(
        registry.clone(),
        Arc::new(Authenticator::new(
            config.auth.api_keys.clone(),
            Arc::new(SqlAgentRepository::new(db_pool.clone())),
            Arc::new(InMemoryNonceStore::default()),
        )),
        Arc::new(RateLimiter::new(Arc::new(counters), config.gateway.service_limits.clone())),
        Arc::new(credentials),
        Arc::new(executor),
        Arc::new(SqlAuditSink::new(db_pool.clone())),
    );
    info!(
        event_name = "system.bootstrap.gateway_ready",
        correlation_id = "bootstrap",
        services = registry.len(),
        credentials_configured = configured.len(),
        api_keys = config.auth.api_keys.len(),
        "gateway pipeline assembled"
    );

    Ok(Application { config, db_pool, registry, gateway: Arc::new(gateway) })
}

#[cfg(test)]
mod tests {
    use warden_core::config::{AppConfig, ConfigOverrides, LoadOptions};
    use warden_core::domain::envelope::GatewayRequest;
    use warden_core::errors::ErrorCode;
    use warden_core::Caller;

    use crate::bootstrap::{bootstrap, bootstrap_with_config, BootstrapError};

    #[tokio::test]
    async fn bootstrap_fails_fast_on_invalid_upstream_timeout() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                upstream_timeout_secs: Some(0),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let error = result.err().expect("invalid timeout should fail bootstrap");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("upstream_timeout_secs"), "{error}");
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_assembles_the_gateway() {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:?cache=shared".to_string();

        let app = bootstrap_with_config(config).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('agents', 'rate_counters', 'audit_log')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("gateway tables should exist after bootstrap");
        assert_eq!(table_count, 3);
        assert_eq!(app.registry.len(), 6);

        let envelope = app
            .gateway
            .dispatch(
                &Caller::Trusted { key_index: 0 },
                GatewayRequest {
                    service: "ghost".to_string(),
                    action: "anything".to_string(),
                    params: serde_json::Value::Null,
                },
                "corr-bootstrap",
            )
            .await;
        assert_eq!(envelope.response.error_code(), Some(ErrorCode::UnknownService));

        app.db_pool.close().await;
    }
}
