//! Ledger Import Core - statement import and duplicate detection
//!
//! This crate follows a hexagonal layout:
//!
//! - **domain**: value objects (RawFile, FormatMapping, TransactionDraft, ImportSession)
//! - **ports**: collaborator traits (persistence, merchant normalizer, saved formats)
//! - **services**: decoding, detection, inference, parsing, duplicate detection, import flow
//! - **adapters**: DuckDB store, in-memory store, settings.json saved formats

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use adapters::{DuckDbStore, SettingsFormatStore};
use config::Config;
use services::{EntryPoint, ImportService, LoggingService};

// Re-export commonly used types at crate root
pub use domain::result::{Error, OperationResult};
pub use domain::{
    DuplicateStatus, FormatMapping, ImportSession, RawFile, SignConvention, TransactionDraft,
};
pub use services::{ConfirmRequest, FormatHint, ImportRequest, PreviewResult};

/// Name of the import store inside the data directory
pub const STORE_FILENAME: &str = "ledger.duckdb";

/// Main context for import operations
///
/// Owns the DuckDB store, the event log and the settings-backed format store,
/// and wires them into an `ImportService`.
pub struct ImportContext {
    pub data_dir: PathBuf,
    pub config: Config,
    pub store: Arc<DuckDbStore>,
    pub logger: Arc<LoggingService>,
    pub formats: Arc<SettingsFormatStore>,
    pub import_service: ImportService,
}

impl ImportContext {
    /// Open the data directory, creating it and its databases if needed
    pub fn new(data_dir: &Path, entry_point: EntryPoint) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let config = Config::load(data_dir)?;

        let store = Arc::new(DuckDbStore::open(&data_dir.join(STORE_FILENAME))?);
        store.ensure_schema()?;

        let logger = Arc::new(LoggingService::new(
            data_dir,
            entry_point,
            env!("CARGO_PKG_VERSION"),
        )?);
        let formats = Arc::new(SettingsFormatStore::new(data_dir, config.clone()));

        let import_service = ImportService::new(store.clone(), store.clone())
            .with_settings(config.import.clone())
            .with_format_store(formats.clone())
            .with_logger(logger.clone());

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config,
            store,
            logger,
            formats,
            import_service,
        })
    }
}
