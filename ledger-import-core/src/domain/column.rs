//! Column roles and per-column inference hints

use serde::{Deserialize, Serialize};

/// The semantic role a column plays in a statement export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Date,
    Amount,
    Debit,
    Credit,
    Description,
    Reference,
    Category,
    Unknown,
}

impl ColumnRole {
    /// Roles every mapping must resolve before drafts can be produced
    pub const REQUIRED: [ColumnRole; 3] =
        [ColumnRole::Date, ColumnRole::Amount, ColumnRole::Description];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnRole::Date => "date",
            ColumnRole::Amount => "amount",
            ColumnRole::Debit => "debit",
            ColumnRole::Credit => "credit",
            ColumnRole::Description => "description",
            ColumnRole::Reference => "reference",
            ColumnRole::Category => "category",
            ColumnRole::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What inference concluded about one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnHint {
    pub column_name: String,
    pub inferred_role: ColumnRole,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Finer detail, e.g. the date pattern or the sign notation of an amount column
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_subtype: Option<String>,
}

impl ColumnHint {
    pub fn unknown(column_name: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            inferred_role: ColumnRole::Unknown,
            confidence: 0.0,
            detected_subtype: None,
        }
    }
}
