//! Service layer - the import pipeline
//!
//! Decoding, detection, inference, parsing and duplicate classification are
//! separate services; `ImportService` composes them behind preview/confirm.

pub mod dates;
pub mod detectors;
pub mod duplicates;
pub mod hashing;
pub mod import;
pub mod inference;
pub mod logging;
pub mod migration;
pub mod parser;
pub mod registry;
pub mod tabular;

pub use detectors::{builtin_detector, builtin_detectors, FormatDetector};
pub use duplicates::{DuplicateCounts, DuplicateDetector};
pub use import::{
    BatchConfirmation, BatchEntry, BatchPreview, ConfirmRequest, ConfirmResult, ImportRequest,
    ImportService, ImportWorkflow, PreviewResult, PreviewSummary, WorkflowState,
};
pub use inference::{ColumnInference, Inference};
pub use logging::{now_ms, EntryPoint, LogEntry, LogEvent, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use parser::{ParsedFile, RowParser};
pub use registry::{
    DetectorScore, FormatHint, FormatRegistry, KnownFormat, MappingOrigin, Resolution,
    ResolutionTier,
};
pub use tabular::{decode, SourceKind, Table, TableRow};
