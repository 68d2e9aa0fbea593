//! Ledger Import CLI - preview and import bank exports from the terminal

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{batch, formats, import, logs, preview, sessions};
use ledger_import_core::{Error, OperationResult};

/// li - import bank exports without importing them twice
#[derive(Parser)]
#[command(name = "li", version, about, long_about = None)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that read one or more export files
#[derive(clap::Args, Clone)]
pub struct SourceArgs {
    /// Account the rows belong to (e.g. "chase-checking")
    #[arg(long, short)]
    pub account: String,
    /// Use this built-in or saved format instead of detecting one
    #[arg(long, conflicts_with = "mapping")]
    pub format: Option<String>,
    /// Read the column mapping from a JSON file
    #[arg(long)]
    pub mapping: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show how a file would be imported, without writing anything
    Preview {
        /// Export file (CSV, QIF, OFX/QFX)
        file: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
        /// Number of rows to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Preview a file, then write it after confirmation
    Import {
        /// Export file (CSV, QIF, OFX/QFX)
        file: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
        /// Skip confirmation prompt
        #[arg(long, short)]
        yes: bool,
        /// Write this source row even though it is a duplicate (repeatable)
        #[arg(long = "force-row", value_name = "ROW")]
        force_rows: Vec<usize>,
        /// Save the resolved mapping as a named format
        #[arg(long, value_name = "NAME")]
        save_format: Option<String>,
    },

    /// Preview several files together and write them in one step
    Batch {
        /// Export files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        source: SourceArgs,
        /// Skip confirmation prompt
        #[arg(long, short)]
        yes: bool,
        /// Preview only
        #[arg(long)]
        dry_run: bool,
    },

    /// List built-in and saved formats
    Formats {
        #[command(subcommand)]
        command: Option<formats::FormatsCommands>,
    },

    /// Inspect and roll back import sessions
    Sessions {
        #[command(subcommand)]
        command: sessions::SessionsCommands,
    },

    /// View and manage the event log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                print_json_error(e);
            } else {
                output::error(&format!("{:#}", e));
            }
            ExitCode::FAILURE
        }
    }
}

fn print_json_error(e: anyhow::Error) {
    let message = format!("{:#}", e);
    let result: OperationResult<()> = match e.downcast::<Error>() {
        Ok(core) => OperationResult::from(Err::<(), Error>(core)),
        Err(_) => OperationResult::fail(message.clone()),
    };
    match serde_json::to_string_pretty(&result) {
        Ok(s) => println!("{}", s),
        Err(_) => eprintln!("{}", message),
    }
}

fn run(cli: Cli) -> Result<()> {
    let json = cli.json;
    match cli.command {
        Commands::Preview { file, source, limit } => preview::run(&file, &source, limit, json),
        Commands::Import {
            file,
            source,
            yes,
            force_rows,
            save_format,
        } => import::run(&file, &source, yes, force_rows, save_format, json),
        Commands::Batch {
            files,
            source,
            yes,
            dry_run,
        } => batch::run(&files, &source, yes, dry_run, json),
        Commands::Formats { command } => formats::run(command, json),
        Commands::Sessions { command } => sessions::run(command, json),
        Commands::Logs { command } => logs::run(command, json),
    }
}
