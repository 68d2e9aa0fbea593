//! Result and error types for the core library

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::draft::RowError;

/// Core library error type
///
/// Duplicate classifications and per-row parse failures are data, not errors:
/// they travel inside preview results. Only conditions that stop an operation
/// end up here.
#[derive(Error, Debug)]
pub enum Error {
    /// Required roles could not be resolved for the file
    #[error("Format detection incomplete: unresolved {}", .missing.join(", "))]
    FormatDetectionIncomplete { missing: Vec<String> },

    /// A weak detector match was not confirmed by the caller
    #[error("Format '{format_id}' was only partially detected; review it and pass the mapping explicitly")]
    NeedsReview { format_id: String },

    /// The file had rows but none of them produced a draft
    #[error("Could not parse any rows of {filename} ({} row errors)", .row_errors.len())]
    FileParse {
        filename: String,
        row_errors: Vec<RowError>,
    },

    #[error("File contains no data rows")]
    EmptyFile,

    /// The preview the caller reviewed no longer matches what Confirm computed
    #[error("Preview is stale: expected digest {expected}, got {actual}")]
    StaleMapping { expected: String, actual: String },

    /// The persistence writer rejected the batch; nothing was written
    #[error("Write failed ({affected} drafts not written): {message}")]
    Write { message: String, affected: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a write error covering `affected` drafts
    pub fn write(msg: impl Into<String>, affected: usize) -> Self {
        Self::Write {
            message: msg.into(),
            affected,
        }
    }

    /// Short machine-readable kind, used for event logging
    pub fn kind(&self) -> &'static str {
        match self {
            Error::FormatDetectionIncomplete { .. } => "format_detection_incomplete",
            Error::NeedsReview { .. } => "needs_review",
            Error::FileParse { .. } => "file_parse",
            Error::EmptyFile => "empty_file",
            Error::StaleMapping { .. } => "stale_mapping",
            Error::Write { .. } => "write",
            Error::InvalidState(_) => "invalid_state",
            Error::Database(_) => "database",
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Operation result with optional context (for JSON output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl<T> OperationResult<T> {
    /// Create a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            context: None,
        }
    }

    /// Create a failed result
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: None,
        }
    }

    /// Create a failed result with context
    pub fn fail_with_context(
        error: impl Into<String>,
        context: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            context: Some(context),
        }
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => {
                let mut context = HashMap::new();
                context.insert("kind".to_string(), serde_json::json!(e.kind()));
                match &e {
                    Error::FormatDetectionIncomplete { missing } => {
                        context.insert("missing".to_string(), serde_json::json!(missing));
                    }
                    Error::NeedsReview { format_id } => {
                        context.insert("format_id".to_string(), serde_json::json!(format_id));
                    }
                    Error::FileParse { row_errors, .. } => {
                        context.insert(
                            "row_errors".to_string(),
                            serde_json::to_value(row_errors).unwrap_or_default(),
                        );
                    }
                    Error::Write { affected, .. } => {
                        context.insert("affected".to_string(), serde_json::json!(affected));
                    }
                    _ => {}
                }
                Self::fail_with_context(e.to_string(), context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_result_ok() {
        let result: OperationResult<i32> = OperationResult::ok(42);
        assert!(result.success);
        assert_eq!(result.data, Some(42));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_operation_result_fail() {
        let result: OperationResult<i32> = OperationResult::fail("Something went wrong");
        assert!(!result.success);
        assert!(result.data.is_none());
        assert_eq!(result.error, Some("Something went wrong".to_string()));
    }

    #[test]
    fn test_from_result_carries_error_kind() {
        let err: Result<i32> = Err(Error::write("disk full", 10));
        let result: OperationResult<i32> = err.into();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("10 drafts not written"));

        let context = result.context.unwrap();
        assert_eq!(context["kind"], serde_json::json!("write"));
        assert_eq!(context["affected"], serde_json::json!(10));
    }

    #[test]
    fn test_incomplete_lists_missing_roles() {
        let err = Error::FormatDetectionIncomplete {
            missing: vec!["date".to_string(), "amount".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Format detection incomplete: unresolved date, amount"
        );
    }
}
