//! Output formatting utilities

use anyhow::Result;
use colored::{ColoredString, Colorize};
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use ledger_import_core::domain::DateRange;
use ledger_import_core::{DuplicateStatus, OperationResult};
use rust_decimal::Decimal;
use serde::Serialize;

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Print `data` wrapped in a successful OperationResult
pub fn print_json<T: Serialize>(data: T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&OperationResult::ok(data))?);
    Ok(())
}

/// Signed amount, red when negative
pub fn format_amount(amount: Decimal) -> ColoredString {
    let text = format!("{:.2}", amount);
    if amount.is_sign_negative() {
        text.red()
    } else {
        text.green()
    }
}

pub fn format_range(range: Option<DateRange>) -> String {
    match range {
        Some(r) if r.start == r.end => r.start.to_string(),
        Some(r) => format!("{} to {}", r.start, r.end),
        None => "-".to_string(),
    }
}

pub fn format_status(status: DuplicateStatus, forced: bool) -> ColoredString {
    let label = match status {
        DuplicateStatus::Unique => return "new".normal(),
        DuplicateStatus::DuplicateSameAccount => "duplicate",
        DuplicateStatus::DuplicateCrossAccount => "other account",
        DuplicateStatus::DuplicateWithinBatch => "repeated in batch",
    };
    if forced {
        format!("{} (forced)", label).yellow()
    } else if status.blocks_write() {
        label.dimmed()
    } else {
        label.yellow()
    }
}

pub fn format_confidence(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}
