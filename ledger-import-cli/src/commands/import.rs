//! Import command - preview one file, confirm, then write it

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use ledger_import_core::services::ConfirmResult;
use ledger_import_core::{ConfirmRequest, Error};

use super::{build_request, get_context, log_command};
use super::preview::print_preview;
use crate::output::{self, format_amount, format_range};
use crate::SourceArgs;

pub fn run(
    file: &Path,
    source: &SourceArgs,
    yes: bool,
    force_rows: Vec<usize>,
    save_format: Option<String>,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    log_command(&ctx, "import");

    let mut request = build_request(file, source)?;
    let preview = ctx.import_service.preview(&request)?;

    if !preview.is_complete() {
        if !json {
            print_preview(&preview, 0);
        }
        return Err(Error::FormatDetectionIncomplete {
            missing: preview.resolution.missing(),
        }
        .into());
    }

    if !json {
        print_preview(&preview, 10);
        println!();
    }

    if preview.resolution.needs_review() {
        let format_id = preview.resolution.mapping.format_id.clone();
        let accepted = !yes
            && !json
            && Confirm::new()
                .with_prompt(format!(
                    "The file only partially matches '{}'. Use this mapping?",
                    format_id
                ))
                .default(false)
                .interact()?;
        if !accepted {
            return Err(Error::NeedsReview { format_id }.into());
        }
        request = request.with_mapping(preview.resolution.mapping.clone());
    }

    let writes = preview.summary.will_write + force_rows.len();
    if writes == 0 {
        if json {
            return output::print_json(serde_json::json!({ "written": 0, "skipped": preview.drafts.len() }));
        }
        output::info("Nothing new to import.");
        return Ok(());
    }

    if !yes && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!("Import {} into '{}'?", preview.filename, preview.account_source))
            .default(true)
            .interact()?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let mut confirm = ConfirmRequest::new(request)
        .expecting(preview.digest.clone())
        .force_rows(force_rows);
    if let Some(name) = save_format {
        confirm = confirm.save_format_as(name);
    }
    let result = ctx.import_service.confirm(&confirm)?;

    if json {
        return output::print_json(&result);
    }
    print_result(&result);
    Ok(())
}

pub fn print_result(result: &ConfirmResult) {
    let session = &result.session;
    output::success(&format!("Imported {}", session.filename));
    println!("  Session: {}", session.id.to_string().dimmed());
    println!("  Written: {}", result.written);
    println!("  Skipped: {}", result.skipped);
    println!("  Total: {}", format_amount(session.total_amount));
    println!("  Dates: {}", format_range(session.date_range));
    if result.cross_account_warnings > 0 {
        output::warning(&format!(
            "  {} written rows also exist under another account",
            result.cross_account_warnings
        ));
    }
    if !result.row_errors.is_empty() {
        output::warning(&format!("  {} rows could not be parsed", result.row_errors.len()));
    }
    if let Some(id) = &result.saved_format {
        println!("  Saved format: {}", id);
    }
}
