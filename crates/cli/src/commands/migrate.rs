use crate::commands::{with_database, CommandResult};
use warden_core::config::{AppConfig, LoadOptions};
use warden_db::migrations;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    match with_database(&config, |_pool| async { Ok(()) }) {
        Ok(()) => CommandResult::success(
            "migrate",
            format!("applied pending migrations (known versions: {:?})", migrations::known_versions()),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
