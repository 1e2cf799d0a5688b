use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use warden_cli::commands::agent::{self, RegisterArgs};
use warden_cli::commands::{doctor, migrate, services};

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("WARDEN_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_timeout() {
    with_env(
        &[
            ("WARDEN_DATABASE_URL", "sqlite::memory:"),
            ("WARDEN_GATEWAY_UPSTREAM_TIMEOUT_SECS", "0"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn services_reports_credential_readiness() {
    with_env(
        &[
            ("WARDEN_DATABASE_URL", "sqlite::memory:"),
            ("WARDEN_CREDENTIAL_GITHUB", "ghp_runtime_test"),
        ],
        || {
            let result = services::run();
            assert_eq!(result.exit_code, 0);

            let payload = parse_payload(&result.output);
            let listed = payload["data"]["services"].as_array().expect("services array");
            assert_eq!(listed.len(), 6);

            let github = listed.iter().find(|service| service["name"] == "github").expect("github");
            assert_eq!(github["credential_configured"], true);
            assert_eq!(github["auth"], "bearer");
            assert!(github["actions"].as_array().is_some_and(|actions| !actions.is_empty()));

            let stripe = listed.iter().find(|service| service["name"] == "stripe").expect("stripe");
            assert_eq!(stripe["credential_configured"], false);
            assert!(!result.output.contains("ghp_runtime_test"));
        },
    );
}

#[test]
fn agent_lifecycle_persists_across_invocations() {
    let dir = tempfile::tempdir().expect("temp dir");
    let database_url = format!("sqlite://{}?mode=rwc", dir.path().join("warden.db").display());

    with_env(&[("WARDEN_DATABASE_URL", database_url.as_str())], || {
        let registered = agent::register(register_args("triage-bot", &["github", "tavily:search"]));
        assert_eq!(registered.exit_code, 0, "{}", registered.output);
        let payload = parse_payload(&registered.output);
        let secret = payload["data"]["secret"].as_str().expect("secret is returned once");
        assert!(secret.len() >= 32);
        assert_eq!(payload["data"]["agent"]["enabled"], true);

        let duplicate = agent::register(register_args("triage-bot", &["github"]));
        assert_eq!(duplicate.exit_code, 7);
        assert_eq!(parse_payload(&duplicate.output)["error_class"], "agent_exists");

        let listed = agent::list();
        assert_eq!(listed.exit_code, 0);
        assert!(!listed.output.contains(secret), "list must not expose the raw secret");
        assert!(!listed.output.contains("secret_hash"));
        let agents = parse_payload(&listed.output)["data"]["agents"].clone();
        assert_eq!(agents[0]["id"], "triage-bot");
        assert_eq!(agents[0]["scopes"], serde_json::json!(["github", "tavily:search"]));

        let disabled = agent::disable("triage-bot");
        assert_eq!(disabled.exit_code, 0, "{}", disabled.output);
        let agents = parse_payload(&agent::list().output)["data"]["agents"].clone();
        assert_eq!(agents[0]["enabled"], false);

        let missing = agent::disable("ghost-bot");
        assert_eq!(missing.exit_code, 7);
        assert_eq!(parse_payload(&missing.output)["error_class"], "not_found");
    });
}

#[test]
fn agent_register_rejects_unknown_scope() {
    with_env(&[("WARDEN_DATABASE_URL", "sqlite::memory:")], || {
        let result = agent::register(register_args("scope-bot", &["gitlab"]));
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_arguments");
    });
}

#[test]
fn doctor_passes_with_credentials_and_reachable_database() {
    with_env(
        &[
            ("WARDEN_DATABASE_URL", "sqlite::memory:"),
            ("WARDEN_CREDENTIAL_TAVILY", "tvly-doctor"),
            ("WARDEN_API_KEYS", "doctor-key-0123456789"),
        ],
        || {
            let report: Value =
                serde_json::from_str(&doctor::run(true)).expect("doctor output should be JSON");
            assert_eq!(report["overall_status"], "pass");
            let names: Vec<&str> = report["checks"]
                .as_array()
                .expect("checks")
                .iter()
                .filter_map(|check| check["name"].as_str())
                .collect();
            assert!(names.contains(&"credential_coverage"));
            assert!(names.contains(&"database_connectivity"));
        },
    );
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("WARDEN_SERVER_PORT", "not-a-port")], || {
        let report: Value = serde_json::from_str(&doctor::run(true)).expect("json");
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][0]["status"], "fail");
        assert_eq!(report["checks"][1]["status"], "skipped");
    });
}

fn register_args(id: &str, scopes: &[&str]) -> RegisterArgs {
    RegisterArgs {
        id: id.to_string(),
        name: String::new(),
        owner: "platform".to_string(),
        scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
        rate_limit_rpm: agent::DEFAULT_RATE_LIMIT_RPM,
        rate_limit_daily: agent::DEFAULT_RATE_LIMIT_DAILY,
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "WARDEN_DATABASE_URL",
        "WARDEN_DATABASE_MAX_CONNECTIONS",
        "WARDEN_DATABASE_TIMEOUT_SECS",
        "WARDEN_SERVER_BIND_ADDRESS",
        "WARDEN_SERVER_PORT",
        "WARDEN_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "WARDEN_GATEWAY_UPSTREAM_TIMEOUT_SECS",
        "WARDEN_GATEWAY_SENDER_DOMAIN",
        "WARDEN_API_KEYS",
        "WARDEN_CREDENTIAL_GITHUB",
        "WARDEN_CREDENTIAL_CLOUDFLARE",
        "WARDEN_CREDENTIAL_STRIPE",
        "WARDEN_CREDENTIAL_TAVILY",
        "WARDEN_CREDENTIAL_EXA",
        "WARDEN_CREDENTIAL_RESEND",
        "WARDEN_LOGGING_LEVEL",
        "WARDEN_LOGGING_FORMAT",
        "WARDEN_LOG_LEVEL",
        "WARDEN_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
