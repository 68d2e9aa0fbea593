//! Import service - preview and confirm for single files and batches
//!
//! Preview decodes, resolves, parses and classifies without writing
//! anything. Confirm repeats that work with the caller's decisions (mapping,
//! forced rows), checks that the result still matches what was reviewed,
//! and hands every draft that should be written to the persistence writer
//! in one atomic call.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::ImportSettings;
use crate::domain::result::{Error, Result};
use crate::domain::{
    DateRange, DuplicateStatus, FormatMapping, ImportSession, RawFile, RowError, SessionMetadata,
    SessionStatus, TransactionDraft,
};
use crate::ports::{
    IdentityNormalizer, ImportWrite, MerchantNormalizer, PersistenceReader, PersistenceWriter,
    SavedFormatStore,
};
use crate::services::detectors::builtin_detector;
use crate::services::duplicates::{DuplicateCounts, DuplicateDetector};
use crate::services::hashing::preview_digest;
use crate::services::logging::{LogEvent, LoggingService};
use crate::services::parser::{ParsedFile, RowParser};
use crate::services::registry::{FormatHint, FormatRegistry, KnownFormat, Resolution};
use crate::services::tabular::decode;

/// One file to import
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub file: RawFile,
    /// Label of the account the file belongs to; part of the content hash
    pub account_source: String,
    pub hint: Option<FormatHint>,
}

impl ImportRequest {
    pub fn new(file: RawFile, account_source: impl Into<String>) -> Self {
        Self {
            file,
            account_source: account_source.into(),
            hint: None,
        }
    }

    pub fn with_mapping(mut self, mapping: FormatMapping) -> Self {
        self.hint = Some(FormatHint::Explicit(mapping));
        self
    }

    pub fn with_format(mut self, format_id: impl Into<String>) -> Self {
        self.hint = Some(FormatHint::FormatId(format_id.into()));
        self
    }
}

/// Confirmation of one previewed file
#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub request: ImportRequest,
    /// Digest of the preview the caller reviewed; checked when present
    pub expected_digest: Option<String>,
    /// Row numbers to write even though they are classified as duplicates
    pub forced_rows: Vec<usize>,
    /// Save the mapping under this id before writing
    pub save_format: Option<String>,
}

impl ConfirmRequest {
    pub fn new(request: ImportRequest) -> Self {
        Self {
            request,
            expected_digest: None,
            forced_rows: Vec::new(),
            save_format: None,
        }
    }

    pub fn expecting(mut self, digest: impl Into<String>) -> Self {
        self.expected_digest = Some(digest.into());
        self
    }

    pub fn force_rows(mut self, rows: impl IntoIterator<Item = usize>) -> Self {
        self.forced_rows.extend(rows);
        self
    }

    pub fn save_format_as(mut self, format_id: impl Into<String>) -> Self {
        self.save_format = Some(format_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewSummary {
    pub parsed_rows: usize,
    pub error_rows: usize,
    pub duplicates: DuplicateCounts,
    /// Drafts Confirm would write without any forced rows
    pub will_write: usize,
    /// Sum of the drafts that would be written
    pub total_amount: Decimal,
    pub date_range: Option<DateRange>,
    pub needs_review: bool,
}

impl PreviewSummary {
    fn new(drafts: &[TransactionDraft], errors: &[RowError], resolution: &Resolution) -> Self {
        let writable: Vec<&TransactionDraft> = drafts.iter().filter(|d| d.will_write()).collect();
        Self {
            parsed_rows: drafts.len(),
            error_rows: errors.len(),
            duplicates: DuplicateCounts::tally(drafts),
            will_write: writable.len(),
            total_amount: writable.iter().map(|d| d.amount).sum(),
            date_range: DateRange::covering(drafts.iter().map(|d| d.date)),
            needs_review: resolution.needs_review(),
        }
    }
}

/// Everything a caller needs to review one file
#[derive(Debug, Clone, Serialize)]
pub struct PreviewResult {
    pub filename: String,
    pub account_source: String,
    pub resolution: Resolution,
    /// Empty when the resolution is incomplete
    pub drafts: Vec<TransactionDraft>,
    pub errors: Vec<RowError>,
    pub summary: PreviewSummary,
    /// Pass back to Confirm to detect a stale preview
    pub digest: String,
}

impl PreviewResult {
    pub fn is_complete(&self) -> bool {
        self.resolution.is_complete()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BatchEntry {
    Previewed(Box<PreviewResult>),
    Failed {
        filename: String,
        kind: String,
        message: String,
    },
}

impl BatchEntry {
    pub fn preview(&self) -> Option<&PreviewResult> {
        match self {
            BatchEntry::Previewed(preview) => Some(preview),
            BatchEntry::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchPreview {
    /// One entry per requested file, in request order
    pub entries: Vec<BatchEntry>,
    /// Drafts that repeat a row from an earlier file of the batch
    pub cross_file_duplicates: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmResult {
    pub session: ImportSession,
    pub written: usize,
    /// Duplicates left out
    pub skipped: usize,
    /// Written drafts that also exist under another account
    pub cross_account_warnings: usize,
    pub row_errors: Vec<RowError>,
    /// Id the mapping was saved under, once the write succeeded
    pub saved_format: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchConfirmation {
    pub results: Vec<ConfirmResult>,
    pub cross_file_duplicates: usize,
}

/// Decoded, resolved and parsed; not yet classified
struct Prepared {
    filename: String,
    account_source: String,
    resolution: Resolution,
    parsed: Option<ParsedFile>,
}

impl Prepared {
    fn take_drafts(&mut self) -> Vec<TransactionDraft> {
        self.parsed
            .as_mut()
            .map(|p| std::mem::take(&mut p.drafts))
            .unwrap_or_default()
    }

    fn into_preview(self, mut drafts: Vec<TransactionDraft>) -> Result<PreviewResult> {
        let errors = self.parsed.map(|p| p.errors).unwrap_or_default();
        drafts.sort_by_key(|d| d.row_number);
        Ok(PreviewResult {
            summary: PreviewSummary::new(&drafts, &errors, &self.resolution),
            digest: preview_digest(&self.resolution.mapping, &drafts)?,
            filename: self.filename,
            account_source: self.account_source,
            resolution: self.resolution,
            drafts,
            errors,
        })
    }
}

/// Entry point for previewing and confirming imports
pub struct ImportService {
    reader: Arc<dyn PersistenceReader>,
    writer: Arc<dyn PersistenceWriter>,
    normalizer: Arc<dyn MerchantNormalizer>,
    formats: Option<Arc<dyn SavedFormatStore>>,
    settings: ImportSettings,
    logger: Option<Arc<LoggingService>>,
}

impl ImportService {
    pub fn new(reader: Arc<dyn PersistenceReader>, writer: Arc<dyn PersistenceWriter>) -> Self {
        Self {
            reader,
            writer,
            normalizer: Arc::new(IdentityNormalizer),
            formats: None,
            settings: ImportSettings::default(),
            logger: None,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn MerchantNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_format_store(mut self, store: Arc<dyn SavedFormatStore>) -> Self {
        self.formats = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: ImportSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    fn registry(&self) -> FormatRegistry {
        let registry = FormatRegistry::new(self.settings.clone());
        match &self.formats {
            Some(store) => registry.with_saved_formats(Arc::clone(store)),
            None => registry,
        }
    }

    /// Built-in and saved formats
    pub fn known_formats(&self) -> Result<Vec<KnownFormat>> {
        self.registry().known_formats()
    }

    // ========================================================================
    // Single file
    // ========================================================================

    /// Preview one file; nothing is written
    pub fn preview(&self, request: &ImportRequest) -> Result<PreviewResult> {
        let mut prepared = self.prepare(&self.registry(), request)?;
        let mut drafts = prepared.take_drafts();
        DuplicateDetector::new(Arc::clone(&self.reader)).classify(&mut drafts)?;
        prepared.into_preview(drafts)
    }

    /// Write one previewed file
    pub fn confirm(&self, request: &ConfirmRequest) -> Result<ConfirmResult> {
        let result = self.confirm_inner(request);
        match &result {
            Ok(confirmed) => self.log(
                LogEvent::new("import_confirmed")
                    .with_format(&confirmed.session.format_id)
                    .with_session(confirmed.session.id)
                    .with_counts(1, confirmed.written),
            ),
            Err(e) => self.log(LogEvent::new("import_failed").with_error(e.kind(), e.to_string())),
        }
        result
    }

    fn confirm_inner(&self, request: &ConfirmRequest) -> Result<ConfirmResult> {
        let preview = self.preview(&request.request)?;
        let (write, outcome) = self.stage(request, preview)?;

        self.writer
            .write_import(&write.drafts, &write.session)
            .map_err(|e| as_write_error(e, write.drafts.len()))?;

        let saved = self.save_format(outcome.save_format.as_ref());
        Ok(outcome.finish(write.session, saved))
    }

    // ========================================================================
    // Batches
    // ========================================================================

    /// Preview several files, classifying their drafts as one pool
    ///
    /// A file that fails to decode or parse is reported in its entry; the
    /// other files are still previewed.
    pub fn preview_batch(&self, requests: &[ImportRequest]) -> Result<BatchPreview> {
        let registry = self.registry();
        let mut prepared = self.prepare_all(&registry, &requests.iter().collect::<Vec<_>>());

        let mut files: Vec<Vec<TransactionDraft>> = prepared
            .iter_mut()
            .map(|p| p.as_mut().map(Prepared::take_drafts).unwrap_or_default())
            .collect();
        let cross_file_duplicates =
            DuplicateDetector::new(Arc::clone(&self.reader)).classify_batches(&mut files)?;

        let entries = prepared
            .into_iter()
            .zip(files)
            .zip(requests)
            .map(|((prepared, drafts), request)| {
                match prepared.and_then(|p| p.into_preview(drafts)) {
                    Ok(preview) => BatchEntry::Previewed(Box::new(preview)),
                    Err(e) => BatchEntry::Failed {
                        filename: request.file.filename.clone(),
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    },
                }
            })
            .collect();

        Ok(BatchPreview {
            entries,
            cross_file_duplicates,
        })
    }

    /// Write several files in one atomic call
    ///
    /// Any file that fails, or any stale preview, aborts the whole batch
    /// before anything is written.
    pub fn confirm_batch(&self, requests: &[ConfirmRequest]) -> Result<BatchConfirmation> {
        let result = self.confirm_batch_inner(requests);
        match &result {
            Ok(batch) => self.log(LogEvent::new("batch_confirmed").with_counts(
                batch.results.len(),
                batch.results.iter().map(|r| r.written).sum(),
            )),
            Err(e) => self.log(
                LogEvent::new("batch_failed")
                    .with_counts(requests.len(), 0)
                    .with_error(e.kind(), e.to_string()),
            ),
        }
        result
    }

    fn confirm_batch_inner(&self, requests: &[ConfirmRequest]) -> Result<BatchConfirmation> {
        if requests.is_empty() {
            return Err(Error::validation("batch has no files"));
        }

        let registry = self.registry();
        let mut prepared = self
            .prepare_all(&registry, &requests.iter().map(|r| &r.request).collect::<Vec<_>>())
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let mut files: Vec<Vec<TransactionDraft>> =
            prepared.iter_mut().map(Prepared::take_drafts).collect();
        let cross_file_duplicates =
            DuplicateDetector::new(Arc::clone(&self.reader)).classify_batches(&mut files)?;

        let mut writes = Vec::with_capacity(requests.len());
        let mut pending = Vec::with_capacity(requests.len());
        for ((prepared, drafts), request) in prepared.into_iter().zip(files).zip(requests) {
            let (write, outcome) = self.stage(request, prepared.into_preview(drafts)?)?;
            writes.push(write);
            pending.push(outcome);
        }

        let affected = writes.iter().map(|w| w.drafts.len()).sum();
        self.writer
            .write_imports(&writes)
            .map_err(|e| as_write_error(e, affected))?;

        let results = writes
            .into_iter()
            .zip(pending)
            .map(|(write, outcome)| {
                let saved = self.save_format(outcome.save_format.as_ref());
                outcome.finish(write.session, saved)
            })
            .collect();
        Ok(BatchConfirmation {
            results,
            cross_file_duplicates,
        })
    }

    // ========================================================================
    // Shared steps
    // ========================================================================

    fn prepare(&self, registry: &FormatRegistry, request: &ImportRequest) -> Result<Prepared> {
        let table = decode(&request.file)?;
        if table.is_empty() {
            return Err(Error::EmptyFile);
        }

        let resolution = registry.resolve(&table, request.hint.as_ref())?;
        let parsed = if resolution.is_complete() {
            let parser = RowParser::new(Arc::clone(&self.normalizer));
            Some(parser.parse(
                &request.file.filename,
                &table,
                &resolution.mapping,
                &request.account_source,
            )?)
        } else {
            None
        };

        Ok(Prepared {
            filename: request.file.filename.clone(),
            account_source: request.account_source.trim().to_string(),
            resolution,
            parsed,
        })
    }

    /// Prepare every request, on scoped threads when enabled
    fn prepare_all(&self, registry: &FormatRegistry, requests: &[&ImportRequest]) -> Vec<Result<Prepared>> {
        if !self.settings.parallel_batch || requests.len() < 2 {
            return requests.iter().map(|r| self.prepare(registry, r)).collect();
        }

        std::thread::scope(|scope| {
            let handles: Vec<_> = requests
                .iter()
                .map(|request| scope.spawn(move || self.prepare(registry, request)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(Error::InvalidState("file worker panicked".into())))
                })
                .collect()
        })
    }

    /// Apply the caller's decisions to a fresh preview and build its write
    fn stage(&self, request: &ConfirmRequest, preview: PreviewResult) -> Result<(ImportWrite, Outcome)> {
        if !preview.is_complete() {
            return Err(Error::FormatDetectionIncomplete {
                missing: preview.resolution.missing(),
            });
        }
        // A weak detector match is only a suggestion until the caller passes it back
        if preview.resolution.needs_review() {
            return Err(Error::NeedsReview {
                format_id: preview.resolution.mapping.format_id.clone(),
            });
        }
        if let Some(expected) = &request.expected_digest {
            if *expected != preview.digest {
                return Err(Error::StaleMapping {
                    expected: expected.clone(),
                    actual: preview.digest,
                });
            }
        }

        let PreviewResult {
            filename,
            account_source,
            resolution,
            mut drafts,
            errors,
            ..
        } = preview;

        let forced: HashSet<usize> = request.forced_rows.iter().copied().collect();
        let mut unmatched = forced.clone();
        for draft in drafts.iter_mut() {
            if unmatched.remove(&draft.row_number) {
                draft.forced = draft.duplicate_status.blocks_write();
            }
        }
        if let Some(row) = unmatched.into_iter().min() {
            return Err(Error::validation(format!("{}: no draft at row {}", filename, row)));
        }

        let mut mapping = resolution.mapping;
        if let Some(name) = &request.save_format {
            self.check_save_target(name)?;
            mapping.format_id = name.trim().to_string();
        }

        let (to_write, skipped): (Vec<TransactionDraft>, Vec<TransactionDraft>) =
            drafts.into_iter().partition(|d| d.will_write());
        let cross_account_warnings = to_write
            .iter()
            .filter(|d| d.duplicate_status == DuplicateStatus::DuplicateCrossAccount)
            .count();

        let session = ImportSession::new(
            SessionMetadata {
                filename,
                format_id: mapping.format_id.clone(),
                account_source,
            },
            &to_write,
            skipped.len(),
        );

        Ok((
            ImportWrite {
                session,
                drafts: to_write,
            },
            Outcome {
                skipped: skipped.len(),
                cross_account_warnings,
                row_errors: errors,
                save_format: request.save_format.is_some().then_some(mapping),
            },
        ))
    }

    /// Reject a save before anything is written
    fn check_save_target(&self, name: &str) -> Result<()> {
        if self.formats.is_none() {
            return Err(Error::Config("no saved format store configured".into()));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("format id must not be empty"));
        }
        if builtin_detector(name).is_some() {
            return Err(Error::validation(format!(
                "format id '{}' is taken by a built-in format",
                name
            )));
        }
        Ok(())
    }

    /// Save a mapping after its import was written
    ///
    /// The import is already committed, so a failed save is logged and
    /// reported as `None` rather than failing the confirm.
    fn save_format(&self, mapping: Option<&FormatMapping>) -> Option<String> {
        let (mapping, store) = (mapping?, self.formats.as_ref()?);
        match store.save(mapping) {
            Ok(()) => Some(mapping.format_id.clone()),
            Err(e) => {
                self.log(
                    LogEvent::new("format_save_failed")
                        .with_format(&mapping.format_id)
                        .with_error(e.kind(), e.to_string()),
                );
                None
            }
        }
    }

    /// Logging never fails an import
    fn log(&self, event: LogEvent) {
        if let Some(logger) = &self.logger {
            let _ = logger.log(event);
        }
    }
}

/// Per-file result details known before the write
struct Outcome {
    skipped: usize,
    cross_account_warnings: usize,
    row_errors: Vec<RowError>,
    /// Mapping to save once the write has succeeded
    save_format: Option<FormatMapping>,
}

impl Outcome {
    fn finish(self, mut session: ImportSession, saved_format: Option<String>) -> ConfirmResult {
        session.status = SessionStatus::Completed;
        ConfirmResult {
            written: session.transaction_count,
            session,
            skipped: self.skipped,
            cross_account_warnings: self.cross_account_warnings,
            row_errors: self.row_errors,
            saved_format,
        }
    }
}

fn as_write_error(error: Error, affected: usize) -> Error {
    match error {
        Error::Write { .. } => error,
        other => Error::write(other.to_string(), affected),
    }
}

// ============================================================================
// Workflow
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Collecting,
    Previewed,
    Confirmed,
    Abandoned,
}

/// Collect files, preview them, then confirm or abandon
///
/// Adding or remapping a file after a preview returns to `Collecting`.
/// `Confirmed` and `Abandoned` are terminal.
pub struct ImportWorkflow<'s> {
    service: &'s ImportService,
    state: WorkflowState,
    requests: Vec<ImportRequest>,
    forced: Vec<Vec<usize>>,
    preview: Option<BatchPreview>,
    confirmation: Option<BatchConfirmation>,
}

impl<'s> ImportWorkflow<'s> {
    pub fn new(service: &'s ImportService) -> Self {
        Self {
            service,
            state: WorkflowState::Collecting,
            requests: Vec::new(),
            forced: Vec::new(),
            preview: None,
            confirmation: None,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    fn require_state(&self, allowed: &[WorkflowState], action: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "cannot {} while {:?}",
                action, self.state
            )))
        }
    }

    fn reopen(&mut self) {
        self.state = WorkflowState::Collecting;
        self.preview = None;
    }

    /// Add a file; returns its index
    pub fn add_file(&mut self, request: ImportRequest) -> Result<usize> {
        self.require_state(&[WorkflowState::Collecting, WorkflowState::Previewed], "add a file")?;
        self.requests.push(request);
        self.forced.push(Vec::new());
        self.reopen();
        Ok(self.requests.len() - 1)
    }

    /// Change the format hint of one file
    pub fn remap(&mut self, index: usize, hint: FormatHint) -> Result<()> {
        self.require_state(&[WorkflowState::Collecting, WorkflowState::Previewed], "remap a file")?;
        let request = self
            .requests
            .get_mut(index)
            .ok_or_else(|| Error::not_found(format!("file #{}", index)))?;
        request.hint = Some(hint);
        self.forced[index].clear();
        self.reopen();
        Ok(())
    }

    pub fn preview(&mut self) -> Result<&BatchPreview> {
        self.require_state(&[WorkflowState::Collecting, WorkflowState::Previewed], "preview")?;
        if self.requests.is_empty() {
            return Err(Error::InvalidState("no files to preview".into()));
        }
        let preview = self.service.preview_batch(&self.requests)?;
        self.state = WorkflowState::Previewed;
        Ok(&*self.preview.insert(preview))
    }

    /// Write row `row` of file `index` even if it is a duplicate
    pub fn force_row(&mut self, index: usize, row: usize) -> Result<()> {
        self.require_state(&[WorkflowState::Previewed], "force a row")?;
        let forced = self
            .forced
            .get_mut(index)
            .ok_or_else(|| Error::not_found(format!("file #{}", index)))?;
        forced.push(row);
        Ok(())
    }

    /// Confirm the previewed batch; on failure the workflow stays previewed
    pub fn confirm(&mut self) -> Result<&BatchConfirmation> {
        self.require_state(&[WorkflowState::Previewed], "confirm")?;
        let preview = self
            .preview
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no preview".into()))?;

        let requests: Vec<ConfirmRequest> = self
            .requests
            .iter()
            .zip(&preview.entries)
            .zip(&self.forced)
            .map(|((request, entry), forced)| {
                let confirm = ConfirmRequest::new(request.clone()).force_rows(forced.iter().copied());
                match entry.preview() {
                    Some(p) => confirm.expecting(p.digest.clone()),
                    None => confirm,
                }
            })
            .collect();

        let confirmation = self.service.confirm_batch(&requests)?;
        self.state = WorkflowState::Confirmed;
        Ok(&*self.confirmation.insert(confirmation))
    }

    pub fn abandon(&mut self) -> Result<()> {
        self.require_state(&[WorkflowState::Collecting, WorkflowState::Previewed], "abandon")?;
        self.state = WorkflowState::Abandoned;
        self.preview = None;
        Ok(())
    }
}
