//! Row parser - turns table rows into transaction drafts
//!
//! The cell parser for each mapped column is chosen once per mapping, then
//! applied to every row. A row that fails is reported as a [`RowError`] and
//! left out; the rest of the file still parses.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::amount::normalize_zero;
use crate::domain::result::{Error, Result};
use crate::domain::{DuplicateStatus, FormatMapping, RowError, SignConvention, TransactionDraft};
use crate::ports::{IdentityNormalizer, MerchantNormalizer};
use crate::services::dates::parse_date;
use crate::services::hashing::{content_hashes, normalize_description};
use crate::services::tabular::{Table, TableRow};

/// Descriptions of statement balance lines, which carry no amount
const BALANCE_LINE_PREFIXES: &[&str] = &["beginning balance", "opening balance", "ending balance"];

/// How one mapped column is read
#[derive(Debug, Clone, PartialEq)]
enum CellParser {
    Date { pattern: String },
    Amount { convention: SignConvention, invert: bool },
    Text,
}

impl CellParser {
    fn date(&self, raw: &str) -> Option<NaiveDate> {
        match self {
            CellParser::Date { pattern } => parse_date(raw, pattern),
            _ => None,
        }
    }

    fn amount(&self, raw: &str) -> Option<Decimal> {
        match self {
            CellParser::Amount { convention, invert } => {
                let value = convention.parse(raw)?;
                Some(if *invert { normalize_zero(-value) } else { value })
            }
            _ => None,
        }
    }

    fn text(&self, raw: &str) -> Option<String> {
        let text = normalize_description(raw);
        match self {
            CellParser::Text if !text.is_empty() => Some(text),
            _ => None,
        }
    }
}

/// A column bound to its position and parser
#[derive(Debug, Clone)]
struct Bound {
    name: String,
    index: usize,
    parser: CellParser,
}

impl Bound {
    fn raw<'r>(&self, row: &'r TableRow) -> &'r str {
        row.cell(self.index)
    }
}

#[derive(Debug, Clone)]
enum AmountColumns {
    Single(Bound),
    Pair {
        debit: Option<Bound>,
        credit: Option<Bound>,
        invert: bool,
    },
}

/// The mapping resolved against one table's headers
#[derive(Debug, Clone)]
struct Plan {
    date: Bound,
    amount: AmountColumns,
    description: Bound,
    reference: Option<Bound>,
    category: Option<Bound>,
}

impl Plan {
    fn new(table: &Table, mapping: &FormatMapping) -> Result<Self> {
        if !mapping.is_complete() {
            return Err(Error::FormatDetectionIncomplete {
                missing: mapping
                    .missing_roles()
                    .iter()
                    .map(|r| r.as_str().to_string())
                    .collect(),
            });
        }

        let bind = |column: &Option<String>, parser: CellParser| -> Result<Option<Bound>> {
            let Some(name) = column.as_deref() else {
                return Ok(None);
            };
            let index = table.column_index(name).ok_or_else(|| {
                Error::validation(format!(
                    "column '{}' not found; file has: {}",
                    name,
                    table.headers.join(", ")
                ))
            })?;
            Ok(Some(Bound {
                name: name.to_string(),
                index,
                parser,
            }))
        };
        let required = |bound: Option<Bound>, role: &str| {
            bound.ok_or_else(|| Error::FormatDetectionIncomplete {
                missing: vec![role.to_string()],
            })
        };

        let date = required(
            bind(
                &mapping.date_column,
                CellParser::Date {
                    pattern: mapping.date_format_pattern.clone(),
                },
            )?,
            "date",
        )?;

        let amount = if mapping.uses_debit_credit() {
            // Each cell is read as a magnitude; the pair decides the sign
            let magnitude = CellParser::Amount {
                convention: SignConvention::LeadingMinus,
                invert: false,
            };
            AmountColumns::Pair {
                debit: bind(&mapping.debit_column, magnitude.clone())?,
                credit: bind(&mapping.credit_column, magnitude)?,
                invert: mapping.invert_sign,
            }
        } else {
            AmountColumns::Single(required(
                bind(
                    &mapping.amount_column,
                    CellParser::Amount {
                        convention: mapping.amount_sign_convention,
                        invert: mapping.invert_sign,
                    },
                )?,
                "amount",
            )?)
        };

        let description = required(bind(&mapping.description_column, CellParser::Text)?, "description")?;

        Ok(Self {
            date,
            amount,
            description,
            reference: bind(&mapping.reference_column, CellParser::Text)?,
            category: bind(&mapping.category_column, CellParser::Text)?,
        })
    }

    /// A balance line such as "Beginning balance as of 01/01/2024" with no amount
    fn is_balance_line(&self, row: &TableRow) -> bool {
        let amount_empty = match &self.amount {
            AmountColumns::Single(bound) => bound.raw(row).is_empty(),
            AmountColumns::Pair { debit, credit, .. } => [debit, credit]
                .into_iter()
                .flatten()
                .all(|b| b.raw(row).is_empty()),
        };
        if !amount_empty {
            return false;
        }
        let description = self.description.raw(row).to_lowercase();
        BALANCE_LINE_PREFIXES
            .iter()
            .any(|prefix| description.starts_with(prefix))
    }

    fn amount(&self, row: &TableRow) -> std::result::Result<Decimal, RowError> {
        match &self.amount {
            AmountColumns::Single(bound) => {
                let raw = bound.raw(row);
                if raw.is_empty() {
                    return Err(RowError::new(row.line, "missing amount").in_column(&bound.name, raw));
                }
                bound
                    .parser
                    .amount(raw)
                    .ok_or_else(|| RowError::new(row.line, "invalid amount").in_column(&bound.name, raw))
            }
            AmountColumns::Pair { debit, credit, invert } => {
                let debit_raw = debit.as_ref().map(|b| b.raw(row)).filter(|s| !s.is_empty());
                let credit_raw = credit.as_ref().map(|b| b.raw(row)).filter(|s| !s.is_empty());

                for (bound, raw) in [(debit, debit_raw), (credit, credit_raw)] {
                    if let (Some(bound), Some(raw)) = (bound, raw) {
                        if bound.parser.amount(raw).is_none() {
                            return Err(RowError::new(row.line, "invalid amount").in_column(&bound.name, raw));
                        }
                    }
                }

                let value = SignConvention::parse_pair(debit_raw, credit_raw)
                    .ok_or_else(|| RowError::new(row.line, "missing debit and credit"))?;
                Ok(if *invert { normalize_zero(-value) } else { value })
            }
        }
    }
}

/// Drafts and row failures for one file
#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedFile {
    pub drafts: Vec<TransactionDraft>,
    pub errors: Vec<RowError>,
}

/// Parses table rows with a resolved mapping
pub struct RowParser {
    normalizer: Arc<dyn MerchantNormalizer>,
}

impl Default for RowParser {
    fn default() -> Self {
        Self::new(Arc::new(IdentityNormalizer))
    }
}

impl RowParser {
    pub fn new(normalizer: Arc<dyn MerchantNormalizer>) -> Self {
        Self { normalizer }
    }

    /// Parse every data row of `table`
    ///
    /// Fails when there are no data rows, when a mapped column is not in the
    /// headers, or when not a single row parses. Otherwise returns the drafts
    /// together with the rows that were skipped.
    pub fn parse(
        &self,
        filename: &str,
        table: &Table,
        mapping: &FormatMapping,
        account_source: &str,
    ) -> Result<ParsedFile> {
        let plan = Plan::new(table, mapping)?;

        let end = table.rows.len().saturating_sub(mapping.skip_footer_rows);
        let rows = table.rows.get(mapping.skip_header_rows..end).unwrap_or(&[]);
        if rows.is_empty() {
            return Err(Error::EmptyFile);
        }

        let mut parsed = ParsedFile::default();
        for row in rows.iter().filter(|row| !plan.is_balance_line(row)) {
            match self.parse_row(&plan, row, account_source) {
                Ok(draft) => parsed.drafts.push(draft),
                Err(error) => parsed.errors.push(error),
            }
        }

        if parsed.drafts.is_empty() {
            return Err(Error::FileParse {
                filename: filename.to_string(),
                row_errors: parsed.errors,
            });
        }
        Ok(parsed)
    }

    fn parse_row(
        &self,
        plan: &Plan,
        row: &TableRow,
        account_source: &str,
    ) -> std::result::Result<TransactionDraft, RowError> {
        let date_raw = plan.date.raw(row);
        if date_raw.is_empty() {
            return Err(RowError::new(row.line, "missing date").in_column(&plan.date.name, date_raw));
        }
        let date = plan
            .date
            .parser
            .date(date_raw)
            .ok_or_else(|| RowError::new(row.line, "invalid date").in_column(&plan.date.name, date_raw))?;

        let amount = plan.amount(row)?;

        let description_raw = plan.description.raw(row);
        let description = plan.description.parser.text(description_raw).ok_or_else(|| {
            RowError::new(row.line, "missing description").in_column(&plan.description.name, description_raw)
        })?;

        let optional = |bound: &Option<Bound>| {
            bound
                .as_ref()
                .and_then(|b| b.parser.text(b.raw(row)))
        };

        let (content_hash, content_hash_no_account) =
            content_hashes(date, amount, &description, account_source);

        Ok(TransactionDraft {
            row_number: row.line,
            date,
            amount,
            merchant: self.normalizer.normalize(&description),
            description,
            account_source: account_source.trim().to_string(),
            reference_id: optional(&plan.reference),
            category_hint: optional(&plan.category),
            content_hash,
            content_hash_no_account,
            duplicate_status: DuplicateStatus::Unique,
            forced: false,
        })
    }
}
