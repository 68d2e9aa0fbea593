//! Preview command - show how a file would be imported

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use ledger_import_core::services::{MappingOrigin, PreviewResult};
use ledger_import_core::domain::ColumnRole;

use super::{build_request, get_context, log_command};
use crate::output::{self, format_amount, format_confidence, format_range, format_status};
use crate::SourceArgs;

pub fn run(file: &Path, source: &SourceArgs, limit: usize, json: bool) -> Result<()> {
    let ctx = get_context()?;
    log_command(&ctx, "preview");

    let request = build_request(file, source)?;
    let preview = ctx.import_service.preview(&request)?;

    if json {
        return output::print_json(&preview);
    }

    print_preview(&preview, limit);
    Ok(())
}

fn describe_origin(origin: &MappingOrigin) -> String {
    match origin {
        MappingOrigin::Explicit => "mapping supplied on the command line".to_string(),
        MappingOrigin::Builtin { name, .. } => name.clone(),
        MappingOrigin::Saved { id } => format!("saved format '{}'", id),
        MappingOrigin::Detected { name, score, .. } => {
            format!("{} (detected, {})", name, format_confidence(*score))
        }
        MappingOrigin::Inferred => "inferred from column contents".to_string(),
    }
}

/// Mapping, summary and the first `limit` drafts of one file
pub fn print_preview(preview: &PreviewResult, limit: usize) {
    let resolution = &preview.resolution;
    println!("{}", preview.filename.bold());
    println!("  Format: {}", describe_origin(&resolution.origin));

    let mapping = &resolution.mapping;
    let column = |c: &Option<String>| c.clone().unwrap_or_else(|| "-".to_string());
    println!("  Date: {} ({})", column(&mapping.date_column), mapping.date_format_pattern);
    if mapping.uses_debit_credit() {
        println!(
            "  Debit / Credit: {} / {}",
            column(&mapping.debit_column),
            column(&mapping.credit_column)
        );
    } else {
        println!(
            "  Amount: {} ({})",
            column(&mapping.amount_column),
            mapping.amount_sign_convention.as_str()
        );
    }
    println!("  Description: {}", column(&mapping.description_column));
    if mapping.invert_sign {
        println!("  Signs inverted");
    }

    if !preview.is_complete() {
        println!();
        output::warning(&format!(
            "Could not resolve: {}. Pass --format or --mapping.",
            resolution.missing().join(", ")
        ));
        print_column_hints(preview);
        return;
    }
    if preview.summary.needs_review {
        output::warning("Weak format match, check the mapping before importing.");
    }

    println!();
    let mut table = output::create_table();
    table.set_header(vec!["Row", "Date", "Amount", "Description", "Status"]);
    for draft in preview.drafts.iter().take(limit) {
        table.add_row(vec![
            draft.row_number.to_string(),
            draft.date.to_string(),
            format_amount(draft.amount).to_string(),
            draft.merchant.clone(),
            format_status(draft.duplicate_status, draft.forced).to_string(),
        ]);
    }
    println!("{}", table);
    if preview.drafts.len() > limit {
        println!("... and {} more", preview.drafts.len() - limit);
    }

    let summary = &preview.summary;
    println!();
    println!("  Rows parsed: {}", summary.parsed_rows);
    println!("  New: {}", summary.will_write);
    if summary.duplicates.same_account + summary.duplicates.within_batch > 0 {
        println!(
            "  Duplicates skipped: {}",
            summary.duplicates.same_account + summary.duplicates.within_batch
        );
    }
    if summary.duplicates.cross_account > 0 {
        output::warning(&format!(
            "  {} rows also appear under another account (written anyway)",
            summary.duplicates.cross_account
        ));
    }
    println!("  Total: {}", format_amount(summary.total_amount));
    println!("  Dates: {}", format_range(summary.date_range));

    if !preview.errors.is_empty() {
        println!();
        println!("{}", format!("{} rows could not be parsed:", preview.errors.len()).red());
        for err in preview.errors.iter().take(5) {
            println!("  {}", err);
        }
        if preview.errors.len() > 5 {
            println!("  ... and {} more", preview.errors.len() - 5);
        }
    }
}

fn print_column_hints(preview: &PreviewResult) {
    let mut table = output::create_table();
    table.set_header(vec!["Column", "Looks like", "Confidence"]);
    for hint in &preview.resolution.column_hints {
        let role = if hint.inferred_role == ColumnRole::Unknown {
            "-".dimmed().to_string()
        } else {
            hint.inferred_role.to_string()
        };
        table.add_row(vec![
            hint.column_name.clone(),
            role,
            format_confidence(hint.confidence),
        ]);
    }
    println!("{}", table);
}
