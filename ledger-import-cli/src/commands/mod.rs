//! CLI command implementations

pub mod batch;
pub mod formats;
pub mod import;
pub mod logs;
pub mod preview;
pub mod sessions;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ledger_import_core::services::{EntryPoint, LogEvent};
use ledger_import_core::{FormatMapping, ImportContext, ImportRequest, RawFile};

use crate::SourceArgs;

/// Get the data directory from environment or default
pub fn get_data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("LEDGER_IMPORT_DIR") {
        return Ok(PathBuf::from(dir));
    }
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".ledger-import"))
}

/// Open the import store, event log and saved formats
pub fn get_context() -> Result<ImportContext> {
    let data_dir = get_data_dir()?;
    ImportContext::new(&data_dir, EntryPoint::Cli)
        .with_context(|| format!("Failed to open data directory {}", data_dir.display()))
}

/// Record a command in the event log, ignoring any errors
pub fn log_command(ctx: &ImportContext, command: &str) {
    let _ = ctx.logger.log(LogEvent::new("command_executed").with_command(command));
}

/// Build an import request for one file from the shared source options
pub fn build_request(path: &Path, source: &SourceArgs) -> Result<ImportRequest> {
    let file =
        RawFile::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let request = ImportRequest::new(file, source.account.clone());

    if let Some(mapping_path) = &source.mapping {
        let content = std::fs::read_to_string(mapping_path)
            .with_context(|| format!("Failed to read mapping {}", mapping_path.display()))?;
        let mapping: FormatMapping = serde_json::from_str(&content)
            .with_context(|| format!("Invalid mapping file {}", mapping_path.display()))?;
        return Ok(request.with_mapping(mapping));
    }

    Ok(match &source.format {
        Some(format_id) => request.with_format(format_id.clone()),
        None => request,
    })
}
