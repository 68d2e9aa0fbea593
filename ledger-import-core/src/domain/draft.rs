//! Transaction drafts - normalized rows awaiting confirmation

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Duplicate classification of a draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStatus {
    Unique,
    /// Already stored for the same account
    DuplicateSameAccount,
    /// Stored for a different account (e.g. a transfer seen from both sides)
    DuplicateCrossAccount,
    /// An earlier draft in the same file or batch has the same content hash
    DuplicateWithinBatch,
}

impl DuplicateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateStatus::Unique => "unique",
            DuplicateStatus::DuplicateSameAccount => "duplicate_same_account",
            DuplicateStatus::DuplicateCrossAccount => "duplicate_cross_account",
            DuplicateStatus::DuplicateWithinBatch => "duplicate_within_batch",
        }
    }

    /// Statuses Confirm skips unless the row is forced
    pub fn blocks_write(&self) -> bool {
        matches!(
            self,
            DuplicateStatus::DuplicateSameAccount | DuplicateStatus::DuplicateWithinBatch
        )
    }
}

impl std::fmt::Display for DuplicateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed row in canonical shape
///
/// Drafts carry no ids or timestamps, so previewing the same file twice
/// produces identical drafts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDraft {
    /// 1-based line in the source file
    pub row_number: usize,
    pub date: NaiveDate,
    /// Negative = expense
    pub amount: Decimal,
    pub description: String,
    pub merchant: String,
    pub account_source: String,
    pub reference_id: Option<String>,
    pub category_hint: Option<String>,
    pub content_hash: String,
    pub content_hash_no_account: String,
    pub duplicate_status: DuplicateStatus,
    /// The caller overrode a duplicate classification for this row
    #[serde(default)]
    pub forced: bool,
}

impl TransactionDraft {
    /// Whether Confirm will write this draft
    pub fn will_write(&self) -> bool {
        self.forced || !self.duplicate_status.blocks_write()
    }
}

/// A row that failed to parse; the row is excluded from the drafts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    /// 1-based line in the source file
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub message: String,
    /// The offending cell, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl RowError {
    pub fn new(row: usize, message: impl Into<String>) -> Self {
        Self {
            row,
            column: None,
            message: message.into(),
            raw: None,
        }
    }

    pub fn in_column(mut self, column: impl Into<String>, raw: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self.raw = Some(raw.into());
        self
    }
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.column, &self.raw) {
            (Some(column), Some(raw)) => {
                write!(f, "row {}: {} ({} = {:?})", self.row, self.message, column, raw)
            }
            _ => write!(f, "row {}: {}", self.row, self.message),
        }
    }
}
