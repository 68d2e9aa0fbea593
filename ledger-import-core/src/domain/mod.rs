//! Core domain entities
//!
//! All import entities are defined here. These are pure data structures
//! with validation logic - no I/O or external dependencies.

pub mod amount;
mod column;
mod draft;
mod file;
mod mapping;
pub mod result;
mod session;

pub use amount::{parse_amount, Notation, ParsedAmount};
pub use column::{ColumnHint, ColumnRole};
pub use draft::{DuplicateStatus, RowError, TransactionDraft};
pub use file::RawFile;
pub use mapping::{FormatMapping, SignConvention};
pub use session::{DateRange, ImportSession, SessionMetadata, SessionStatus};
