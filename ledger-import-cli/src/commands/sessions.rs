//! Sessions command - audit and roll back confirmed imports

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;
use ledger_import_core::domain::SessionStatus;
use uuid::Uuid;

use super::{get_context, log_command};
use crate::output::{self, format_amount, format_range};

#[derive(Subcommand)]
pub enum SessionsCommands {
    /// List import sessions, newest first
    List {
        /// Number of sessions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show one session and its transactions
    Show {
        /// Session id
        id: String,
    },
    /// Delete a session's transactions and mark it rolled back
    Rollback {
        /// Session id
        id: String,
        /// Skip confirmation prompt
        #[arg(long, short = 'f')]
        force: bool,
    },
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid session id: {}", id))
}

pub fn run(command: SessionsCommands, json: bool) -> Result<()> {
    let ctx = get_context()?;
    log_command(&ctx, "sessions");

    match command {
        SessionsCommands::List { limit } => {
            let sessions: Vec<_> = ctx.store.list_sessions()?.into_iter().take(limit).collect();
            if json {
                return output::print_json(&sessions);
            }
            if sessions.is_empty() {
                println!("No imports yet.");
                return Ok(());
            }
            let mut table = output::create_table();
            table.set_header(vec!["Id", "Imported", "File", "Account", "Rows", "Total", "Status"]);
            for s in &sessions {
                let status = match s.status {
                    SessionStatus::RolledBack => s.status.as_str().red().to_string(),
                    _ => s.status.as_str().to_string(),
                };
                table.add_row(vec![
                    s.id.to_string(),
                    s.created_at.format("%Y-%m-%d %H:%M").to_string(),
                    s.filename.clone(),
                    s.account_source.clone(),
                    s.transaction_count.to_string(),
                    format_amount(s.total_amount).to_string(),
                    status,
                ]);
            }
            println!("{}", table);
        }
        SessionsCommands::Show { id } => {
            let id = parse_id(&id)?;
            let session = ctx
                .store
                .get_session(&id)?
                .ok_or_else(|| anyhow::anyhow!("Session not found: {}", id))?;
            let transactions = ctx.store.session_transactions(&id)?;

            if json {
                return output::print_json(serde_json::json!({
                    "session": session,
                    "transactions": transactions,
                }));
            }

            println!("{}", session.filename.bold());
            println!("  Session: {}", session.id);
            println!("  Format: {}", session.format_id);
            println!("  Account: {}", session.account_source);
            println!("  Status: {}", session.status.as_str());
            println!("  Written: {}", session.transaction_count);
            println!("  Skipped: {}", session.duplicate_count);
            println!("  Total: {}", format_amount(session.total_amount));
            println!("  Dates: {}", format_range(session.date_range));

            if !transactions.is_empty() {
                let mut table = output::create_table();
                table.set_header(vec!["Row", "Date", "Amount", "Description"]);
                for tx in &transactions {
                    let description = if tx.forced {
                        format!("{} {}", tx.merchant, "(forced)".yellow())
                    } else {
                        tx.merchant.clone()
                    };
                    table.add_row(vec![
                        tx.source_row.to_string(),
                        tx.date.to_string(),
                        format_amount(tx.amount).to_string(),
                        description,
                    ]);
                }
                println!("{}", table);
            }
        }
        SessionsCommands::Rollback { id, force } => {
            let id = parse_id(&id)?;
            if !force && !json {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Delete every transaction imported by session {}?", id))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            let session = ctx.store.rollback_session(&id)?;
            if json {
                return output::print_json(&session);
            }
            output::success(&format!(
                "Rolled back {} ({} transactions removed)",
                session.filename, session.transaction_count
            ));
        }
    }
    Ok(())
}
