//! Import sessions - the audit record of one confirmed file

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::draft::TransactionDraft;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Completed,
    RolledBack,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Completed => "completed",
            SessionStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "completed" => Some(SessionStatus::Completed),
            "rolled_back" => Some(SessionStatus::RolledBack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Smallest range covering every date, `None` when there are none
    pub fn covering(dates: impl IntoIterator<Item = NaiveDate>) -> Option<Self> {
        dates.into_iter().fold(None, |range, date| match range {
            None => Some(DateRange {
                start: date,
                end: date,
            }),
            Some(r) => Some(DateRange {
                start: r.start.min(date),
                end: r.end.max(date),
            }),
        })
    }
}

/// What the caller knows about a file before it is written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub filename: String,
    pub format_id: String,
    pub account_source: String,
}

/// One confirmed import of one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSession {
    pub id: Uuid,
    pub filename: String,
    pub format_id: String,
    pub account_source: String,
    /// Drafts written
    pub transaction_count: usize,
    /// Drafts skipped as duplicates
    pub duplicate_count: usize,
    pub total_amount: Decimal,
    pub date_range: Option<DateRange>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl ImportSession {
    /// Summarize the drafts about to be written for one file
    pub fn new(metadata: SessionMetadata, written: &[TransactionDraft], skipped: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: metadata.filename,
            format_id: metadata.format_id,
            account_source: metadata.account_source,
            transaction_count: written.len(),
            duplicate_count: skipped,
            total_amount: written.iter().map(|d| d.amount).sum(),
            date_range: DateRange::covering(written.iter().map(|d| d.date)),
            status: SessionStatus::Pending,
            created_at: Utc::now(),
        }
    }
}
