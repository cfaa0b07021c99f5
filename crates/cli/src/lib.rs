pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "noticeboard",
    about = "Noticeboard approval operator CLI",
    long_about = "Apply migrations, check readiness, inspect configuration, and look into or unblock approval chains.",
    after_help = "Examples:\n  noticeboard doctor --json\n  noticeboard pending hod-science\n  noticeboard withdraw APR-... --actor office --reason \"approver on leave\" --admin"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, dispatch settings, DB connectivity and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Show the status snapshot of one approval record")]
    Status { record_id: String },
    #[command(about = "List pending records waiting on an approver")]
    Pending {
        approver_id: String,
        #[arg(long)]
        limit: Option<u32>,
    },
    #[command(about = "Withdraw a pending approval chain")]
    Withdraw {
        record_id: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: String,
        #[arg(long, help = "Withdraw as an administrator instead of the requesting author")]
        admin: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Config => commands::config::run(),
        Command::Status { record_id } => commands::status::run(&record_id),
        Command::Pending { approver_id, limit } => commands::pending::run(&approver_id, limit),
        Command::Withdraw { record_id, actor, reason, admin } => {
            commands::withdraw::run(&record_id, &actor, &reason, admin)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
