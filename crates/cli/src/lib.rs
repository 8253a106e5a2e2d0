pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "rentdesk",
    about = "Rentdesk operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations, and manage the persisted device inventory.",
    after_help = "Examples:\n  rentdesk doctor --json\n  rentdesk config\n  rentdesk import devices.txt"
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
    #[command(about = "Validate config, Telegram token readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the persisted device inventory")]
    Inventory {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply a bulk device list file, one `<description>, <quantity>` per line")]
    Import {
        file: PathBuf,
        #[arg(long, help = "Parse and report the lines without changing the inventory")]
        dry_run: bool,
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
        Command::Inventory { json } => commands::inventory::run(json),
        Command::Import { file, dry_run } => commands::import::run(&file, dry_run),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
