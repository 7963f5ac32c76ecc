pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tireline_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "tireline",
    about = "Tireline operator CLI",
    long_about = "Operate the Tireline quote service: migrations, demo data, config inspection, \
                  admin session tokens and expiry sweeps.",
    after_help = "Examples:\n  tireline migrate\n  tireline seed --reset\n  \
                  tireline token --subject ops@tireline.example\n  tireline expire"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a TOML config file (defaults to tireline.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo quote dataset (idempotent)")]
    Seed {
        #[arg(long, help = "Remove existing demo quotes before loading")]
        reset: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Issue a signed session token for the admin API")]
    Token {
        #[arg(long, help = "Who the token identifies, recorded as the actor")]
        subject: String,
        #[arg(long, default_value = "admin")]
        role: String,
        #[arg(long, help = "Lifetime in hours (defaults to auth.session_ttl_hours)")]
        ttl_hours: Option<u32>,
    },
    #[command(about = "Expire every open quote whose validity window has closed")]
    Expire,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Seed { reset } => commands::seed::run(options, reset),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(options) }
        }
        Command::Token { subject, role, ttl_hours } => {
            commands::token::run(options, &subject, &role, ttl_hours)
        }
        Command::Expire => commands::expire::run(options),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
