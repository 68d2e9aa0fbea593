//! Batch command - several files previewed and written together

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use ledger_import_core::services::{BatchEntry, ImportWorkflow};

use super::import::print_result;
use super::{build_request, get_context, log_command};
use crate::output::{self, format_amount};
use crate::SourceArgs;

pub fn run(files: &[PathBuf], source: &SourceArgs, yes: bool, dry_run: bool, json: bool) -> Result<()> {
    let ctx = get_context()?;
    log_command(&ctx, "batch");

    let mut workflow = ImportWorkflow::new(&ctx.import_service);
    for file in files {
        workflow.add_file(build_request(file, source)?)?;
    }

    let preview = workflow.preview()?;
    let failed = preview
        .entries
        .iter()
        .filter(|e| {
            e.preview()
                .map_or(true, |p| !p.is_complete() || p.resolution.needs_review())
        })
        .count();

    if json && (dry_run || failed > 0) {
        return output::print_json(preview);
    }

    if !json {
        let mut table = output::create_table();
        table.set_header(vec!["File", "Format", "Rows", "New", "Skipped", "Total"]);
        for entry in &preview.entries {
            match entry {
                BatchEntry::Previewed(p) => {
                    let format = if !p.is_complete() {
                        format!("unresolved: {}", p.resolution.missing().join(", "))
                            .red()
                            .to_string()
                    } else if p.resolution.needs_review() {
                        format!("review: {}", p.resolution.mapping.format_id)
                            .yellow()
                            .to_string()
                    } else {
                        p.resolution.mapping.format_id.clone()
                    };
                    let s = &p.summary;
                    table.add_row(vec![
                        p.filename.clone(),
                        format,
                        s.parsed_rows.to_string(),
                        s.will_write.to_string(),
                        (s.parsed_rows - s.will_write).to_string(),
                        format_amount(s.total_amount).to_string(),
                    ]);
                }
                BatchEntry::Failed { filename, message, .. } => {
                    table.add_row(vec![
                        filename.clone(),
                        message.red().to_string(),
                        "-".into(),
                        "-".into(),
                        "-".into(),
                        "-".into(),
                    ]);
                }
            }
        }
        println!("{}", table);
        if preview.cross_file_duplicates > 0 {
            output::info(&format!(
                "{} rows repeat a row from another file of this batch and will be skipped",
                preview.cross_file_duplicates
            ));
        }
    }

    if failed > 0 {
        workflow.abandon()?;
        anyhow::bail!(
            "{} of {} files are unresolved or need review (use --format or --mapping); nothing was written",
            failed,
            files.len()
        );
    }
    if dry_run {
        workflow.abandon()?;
        return Ok(());
    }

    if !yes && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!("Import {} files into '{}'?", files.len(), source.account))
            .default(true)
            .interact()?;
        if !confirmed {
            workflow.abandon()?;
            println!("Cancelled.");
            return Ok(());
        }
    }

    let confirmation = workflow.confirm()?;
    if json {
        return output::print_json(confirmation);
    }
    for result in &confirmation.results {
        print_result(result);
    }
    Ok(())
}
