pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::agent::{RegisterArgs, DEFAULT_RATE_LIMIT_DAILY, DEFAULT_RATE_LIMIT_RPM};

#[derive(Debug, Parser)]
#[command(
    name = "warden",
    about = "Warden operator CLI",
    long_about = "Operate the Warden egress gateway: migrations, config inspection, readiness checks, and agent provisioning.",
    after_help = "Examples:\n  warden doctor --json\n  warden agent register --id triage-bot --scope github\n  warden sign --secret <secret> --nonce <nonce>"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, credential coverage, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List registered upstream services and their actions")]
    Services,
    /// Provision and manage agent identities
    #[command(subcommand)]
    Agent(AgentCommand),
    #[command(about = "Sign a challenge nonce with a raw agent secret")]
    Sign {
        #[arg(long)]
        secret: String,
        #[arg(long)]
        nonce: String,
    },
}

#[derive(Debug, Subcommand)]
enum AgentCommand {
    #[command(about = "Register an agent and print its secret once")]
    Register {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        owner: String,
        #[arg(long = "scope", help = "`*`, `<service>` or `<service>:<action>`; repeatable")]
        scopes: Vec<String>,
        #[arg(long, default_value_t = DEFAULT_RATE_LIMIT_RPM)]
        rpm: u32,
        #[arg(long, default_value_t = DEFAULT_RATE_LIMIT_DAILY)]
        daily: u32,
    },
    #[command(about = "List agents without key material")]
    List,
    #[command(about = "Disable an agent; its signatures stop authenticating")]
    Disable {
        #[arg(long)]
        id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Services => commands::services::run(),
        Command::Agent(AgentCommand::Register { id, name, owner, scopes, rpm, daily }) => {
            commands::agent::register(RegisterArgs {
                id,
                name,
                owner,
                scopes,
                rate_limit_rpm: rpm,
                rate_limit_daily: daily,
            })
        }
        Command::Agent(AgentCommand::List) => commands::agent::list(),
        Command::Agent(AgentCommand::Disable { id }) => commands::agent::disable(&id),
        Command::Sign { secret, nonce } => commands::sign::run(&secret, &nonce),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
