use chrono::Utc;
use serde_json::json;
use warden_core::auth::signature;
use warden_core::config::{AppConfig, LoadOptions};
use warden_core::services::SERVICE_NAMES;
use warden_core::{Agent, AgentId, AgentRepository, AgentSummary, WILDCARD_SCOPE};
use warden_db::SqlAgentRepository;

use crate::commands::{with_database, CommandFailure, CommandResult};

pub const DEFAULT_RATE_LIMIT_RPM: u32 = 60;
pub const DEFAULT_RATE_LIMIT_DAILY: u32 = 1_000;

#[derive(Clone, Debug)]
pub struct RegisterArgs {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub scopes: Vec<String>,
    pub rate_limit_rpm: u32,
    pub rate_limit_daily: u32,
}

fn load_config(command: &str) -> Result<AppConfig, CommandResult> {
    AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })
}

/// Scopes are `*`, `<service>` or `<service>:<action>` against a registered service.
fn validate_scopes(scopes: &[String]) -> Result<(), String> {
    if scopes.is_empty() {
        return Err("at least one --scope is required".to_string());
    }
    for scope in scopes {
        let scope = scope.trim();
        if scope == WILDCARD_SCOPE {
            continue;
        }
        let service = scope.split_once(':').map_or(scope, |(service, _)| service);
        if !SERVICE_NAMES.contains(&service) {
            return Err(format!("scope `{scope}` references unknown service `{service}`"));
        }
    }
    Ok(())
}

fn validate_register(args: &RegisterArgs) -> Result<(), String> {
    if args.id.trim().is_empty() {
        return Err("agent id must not be empty".to_string());
    }
    if args.rate_limit_rpm == 0 || args.rate_limit_daily == 0 {
        return Err("rate limits must be greater than zero".to_string());
    }
    validate_scopes(&args.scopes)
}

/// Provisions an agent and prints its raw secret once. Only the hash is stored.
pub fn register(args: RegisterArgs) -> CommandResult {
    const COMMAND: &str = "agent register";

    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };
    if let Err(message) = validate_register(&args) {
        return CommandResult::failure(COMMAND, "invalid_arguments", message, 2);
    }

    let raw_secret = signature::generate_secret();
    let id = args.id.trim().to_string();
    let agent = Agent {
        id: AgentId(id.clone()),
        name: if args.name.trim().is_empty() { id.clone() } else { args.name.trim().to_string() },
        owner: args.owner.trim().to_string(),
        secret_hash: signature::hash_secret(&raw_secret).into(),
        scopes: args.scopes.iter().map(|scope| scope.trim().to_string()).collect(),
        rate_limit_rpm: args.rate_limit_rpm,
        rate_limit_daily: args.rate_limit_daily,
        enabled: true,
        created_at: Utc::now(),
        last_used_at: None,
        request_count: 0,
    };
    let summary = agent.summary();

    let outcome = with_database(&config, |pool| async move {
        let repository = SqlAgentRepository::new(pool);
        let existing = repository
            .find_by_id(&agent.id)
            .await
            .map_err(|error| ("repository", error.to_string(), 6u8))?;
        if existing.is_some() {
            return Err::<(), CommandFailure>((
                "agent_exists",
                format!("agent `{}` is already registered", agent.id),
                7,
            ));
        }
        repository.save(agent).await.map_err(|error| ("repository", error.to_string(), 6u8))
    });

    match outcome {
        Ok(()) => CommandResult::success_with_data(
            COMMAND,
            "agent registered; the secret is shown once and cannot be recovered",
            json!({ "agent": summary, "secret": raw_secret }),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

pub fn list() -> CommandResult {
    const COMMAND: &str = "agent list";

    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let outcome = with_database(&config, |pool| async move {
        SqlAgentRepository::new(pool)
            .list()
            .await
            .map_err(|error| ("repository", error.to_string(), 6u8))
    });

    match outcome {
        Ok(agents) => {
            let summaries: Vec<AgentSummary> = agents.iter().map(Agent::summary).collect();
            CommandResult::success_with_data(
                COMMAND,
                format!("{} agents registered", summaries.len()),
                json!({ "agents": summaries }),
            )
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

pub fn disable(id: &str) -> CommandResult {
    const COMMAND: &str = "agent disable";

    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let agent_id = AgentId(id.trim().to_string());
    let outcome = with_database(&config, |pool| {
        let agent_id = agent_id.clone();
        async move {
            SqlAgentRepository::new(pool)
                .set_enabled(&agent_id, false)
                .await
                .map_err(|error| ("repository", error.to_string(), 6u8))
        }
    });

    match outcome {
        Ok(true) => CommandResult::success(COMMAND, format!("agent `{agent_id}` disabled")),
        Ok(false) => CommandResult::failure(
            COMMAND,
            "not_found",
            format!("agent `{agent_id}` is not registered"),
            7,
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_register, validate_scopes, RegisterArgs};

    fn args(scopes: &[&str]) -> RegisterArgs {
        RegisterArgs {
            id: "triage-bot".to_string(),
            name: "Triage".to_string(),
            owner: "platform".to_string(),
            scopes: scopes.iter().map(|scope| scope.to_string()).collect(),
            rate_limit_rpm: 60,
            rate_limit_daily: 1_000,
        }
    }

    #[test]
    fn scopes_must_reference_registered_services() {
        assert!(validate_scopes(&["*".to_string()]).is_ok());
        assert!(validate_scopes(&["github:get_repo".to_string(), "tavily".to_string()]).is_ok());

        let error = validate_scopes(&["gitlab".to_string()]).expect_err("unknown service");
        assert!(error.contains("gitlab"));
        assert!(validate_scopes(&[]).is_err());
    }

    #[test]
    fn register_arguments_reject_zero_limits_and_blank_ids() {
        assert!(validate_register(&args(&["github"])).is_ok());

        let mut blank = args(&["github"]);
        blank.id = "  ".to_string();
        assert!(validate_register(&blank).is_err());

        let mut zero = args(&["github"]);
        zero.rate_limit_rpm = 0;
        assert!(validate_register(&zero).is_err());
    }
}
