//! Column inference - role assignment for unknown exports
//!
//! Roles are inferred from what the cells contain, not from header text.
//! Every column gets a structural profile (date-likeness, amount-likeness,
//! free-text shape), then roles are assigned greedily:
//!
//! 1. date: the most date-like column, leftmost on ties
//! 2. amount: a dense signed column wins; otherwise a mutually exclusive pair
//!    of unsigned columns becomes debit/credit; otherwise the best unsigned
//!    column
//! 3. description: the longest free-text column
//! 4. reference and category, when a column fits
//!
//! A required role with no column at or above the minimum confidence is left
//! unassigned. Inference never invents a column.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::domain::{parse_amount, ColumnHint, ColumnRole, FormatMapping, Notation, SignConvention};
use crate::services::dates::{parse_date, DATE_PATTERNS};
use crate::services::tabular::TableRow;

/// Share of non-empty cells that must parse for a date or amount column
const PARSE_THRESHOLD: f64 = 0.8;

/// More integer digits than this is an account or card number, not money
const MAX_AMOUNT_INTEGER_DIGITS: usize = 9;

pub const INFERRED_FORMAT_ID: &str = "inferred";

const DEBIT_WORDS: &[&str] = &["debit", "withdrawal", "paid out", "spent", "charge"];
const CREDIT_WORDS: &[&str] = &["credit", "deposit", "paid in", "received"];

/// Structural profile of one column over the sample
#[derive(Debug, Clone, Default)]
struct ColumnProfile {
    index: usize,
    non_empty: usize,
    /// Non-empty cells / sampled rows
    fill: f64,
    date_pattern: Option<&'static str>,
    date_confidence: f64,
    amount_confidence: f64,
    amount_notation: Option<Notation>,
    has_negative: bool,
    text_share: f64,
    text_avg_len: f64,
    text_distinct: f64,
    reference_confidence: f64,
    category_confidence: f64,
}

impl ColumnProfile {
    fn description_confidence(&self) -> f64 {
        let length = (self.text_avg_len / 8.0).min(1.0);
        self.text_share * length * (0.6 + 0.4 * self.text_distinct)
    }

    fn is_signed(&self) -> bool {
        self.has_negative
    }

    fn amount_subtype(&self) -> &'static str {
        match self.amount_notation {
            Some(Notation::Parentheses) => "parentheses",
            Some(Notation::TrailingMinus) => "trailing_minus",
            Some(Notation::LeadingMinus) => "leading_minus",
            _ => "unsigned",
        }
    }

    fn sign_convention(&self) -> SignConvention {
        match self.amount_notation {
            Some(Notation::Parentheses) => SignConvention::Parentheses,
            Some(Notation::TrailingMinus) => SignConvention::TrailingMinus,
            _ => SignConvention::LeadingMinus,
        }
    }
}

fn profile_column(index: usize, sample: &[TableRow]) -> ColumnProfile {
    let cells: Vec<&str> = sample
        .iter()
        .map(|row| row.cell(index))
        .filter(|cell| !cell.is_empty())
        .collect();

    let mut profile = ColumnProfile {
        index,
        non_empty: cells.len(),
        ..Default::default()
    };
    if cells.is_empty() {
        return profile;
    }
    let n = cells.len() as f64;
    profile.fill = n / sample.len().max(1) as f64;

    // Dates: best pattern, earlier patterns win ties
    for pattern in DATE_PATTERNS {
        let parsed = cells.iter().filter(|c| parse_date(c, pattern).is_some()).count() as f64 / n;
        if parsed > profile.date_confidence {
            profile.date_confidence = parsed;
            profile.date_pattern = Some(*pattern);
        }
    }
    if profile.date_confidence < PARSE_THRESHOLD {
        profile.date_confidence = 0.0;
        profile.date_pattern = None;
    }

    // Amounts
    let amounts: Vec<_> = cells
        .iter()
        .filter_map(|c| parse_amount(c))
        .filter(|a| a.integer_digits <= MAX_AMOUNT_INTEGER_DIGITS)
        .collect();
    let amount_rate = amounts.len() as f64 / n;
    if amount_rate >= PARSE_THRESHOLD && profile.date_confidence == 0.0 {
        let money_shaped = amounts
            .iter()
            .filter(|a| a.decimals == 2 || a.currency_marker)
            .count() as f64
            / amounts.len() as f64;
        profile.amount_confidence = amount_rate * (0.6 + 0.4 * money_shaped);
        profile.has_negative = amounts.iter().any(|a| a.value.is_sign_negative());

        let mut notations: HashMap<Notation, usize> = HashMap::new();
        for a in &amounts {
            *notations.entry(a.notation).or_insert(0) += 1;
        }
        profile.amount_notation = [Notation::Parentheses, Notation::TrailingMinus, Notation::LeadingMinus]
            .into_iter()
            .find(|n| notations.contains_key(n))
            .or(Some(Notation::Unsigned));
    }

    // Free text
    let text: Vec<&str> = cells
        .iter()
        .copied()
        .filter(|c| parse_amount(c).is_none() && parse_date_any(c).is_none())
        .collect();
    if !text.is_empty() {
        profile.text_share = text.len() as f64 / n;
        profile.text_avg_len =
            text.iter().map(|c| c.chars().count()).sum::<usize>() as f64 / text.len() as f64;
        let distinct: HashSet<&str> = text.iter().copied().collect();
        profile.text_distinct = distinct.len() as f64 / text.len() as f64;
    }

    // References: distinct single tokens carrying digits
    if profile.date_confidence == 0.0 && profile.amount_confidence < 0.7 {
        let tokens = cells
            .iter()
            .filter(|c| {
                c.len() >= 3
                    && !c.chars().any(char::is_whitespace)
                    && c.chars().any(|ch| ch.is_ascii_digit())
            })
            .count() as f64
            / n;
        let distinct: HashSet<&&str> = cells.iter().collect();
        profile.reference_confidence = tokens * (distinct.len() as f64 / n);
    }

    // Categories: short repeated labels
    if cells.len() >= 4 && profile.text_avg_len <= 30.0 && profile.text_distinct <= 0.6 {
        profile.category_confidence = profile.text_share * (1.0 - profile.text_distinct);
    }

    profile
}

fn parse_date_any(cell: &str) -> Option<chrono::NaiveDate> {
    DATE_PATTERNS.iter().find_map(|p| parse_date(cell, p))
}

/// Result of inference over one table
#[derive(Debug, Clone, Serialize)]
pub struct Inference {
    /// One hint per column, in column order
    pub hints: Vec<ColumnHint>,
    /// Mapping built from the assigned roles; may be incomplete
    pub mapping: FormatMapping,
}

impl Inference {
    /// Confidence of the column assigned to `role`, 0 when unassigned
    pub fn role_confidence(&self, role: ColumnRole) -> f64 {
        self.hints
            .iter()
            .filter(|h| h.inferred_role == role)
            .map(|h| h.confidence)
            .fold(0.0, f64::max)
    }
}

/// Column role inference engine
#[derive(Debug, Clone)]
pub struct ColumnInference {
    sample_rows: usize,
    min_confidence: f64,
}

impl Default for ColumnInference {
    fn default() -> Self {
        Self {
            sample_rows: 50,
            min_confidence: 0.5,
        }
    }
}

impl ColumnInference {
    pub fn new(sample_rows: usize, min_confidence: f64) -> Self {
        Self {
            sample_rows: sample_rows.max(1),
            min_confidence,
        }
    }

    /// Infer roles for every column
    pub fn infer(&self, headers: &[String], rows: &[TableRow]) -> Inference {
        let sample = &rows[..rows.len().min(self.sample_rows)];
        let profiles: Vec<ColumnProfile> = (0..headers.len())
            .map(|i| profile_column(i, sample))
            .collect();

        let mut hints: Vec<ColumnHint> = headers.iter().map(ColumnHint::unknown).collect();
        let mut mapping = FormatMapping::new(INFERRED_FORMAT_ID);
        let mut taken: HashSet<usize> = HashSet::new();

        // Date
        if let Some(date) = best_by(&profiles, &taken, |p| p.date_confidence, self.min_confidence) {
            let pattern = date.date_pattern.unwrap_or("%Y-%m-%d");
            mapping = mapping.date(headers[date.index].clone(), pattern);
            hints[date.index] = hint(&headers[date.index], ColumnRole::Date, date.date_confidence, Some(pattern));
            taken.insert(date.index);
        }

        // Amount
        let candidates: Vec<&ColumnProfile> = profiles
            .iter()
            .filter(|p| !taken.contains(&p.index) && p.amount_confidence >= self.min_confidence)
            .collect();

        let dense_signed = candidates
            .iter()
            .copied()
            .filter(|p| p.is_signed() && p.fill >= 0.9)
            .fold(None, |best: Option<&ColumnProfile>, p| match best {
                Some(b) if b.amount_confidence >= p.amount_confidence => Some(b),
                _ => Some(p),
            });

        if let Some(amount) = dense_signed {
            self.assign_amount(amount, headers, &mut hints, &mut mapping, &mut taken);
        } else if let Some((debit, credit)) = exclusive_pair(&candidates, headers, sample) {
            mapping = mapping.debit_credit(headers[debit.index].clone(), headers[credit.index].clone());
            hints[debit.index] = hint(&headers[debit.index], ColumnRole::Debit, debit.amount_confidence, Some("unsigned"));
            hints[credit.index] = hint(&headers[credit.index], ColumnRole::Credit, credit.amount_confidence, Some("unsigned"));
            taken.insert(debit.index);
            taken.insert(credit.index);
        } else if let Some(amount) = candidates
            .iter()
            .copied()
            .fold(None, |best: Option<&ColumnProfile>, p| match best {
                Some(b) if (b.is_signed(), b.amount_confidence) >= (p.is_signed(), p.amount_confidence) => Some(b),
                _ => Some(p),
            })
        {
            self.assign_amount(amount, headers, &mut hints, &mut mapping, &mut taken);
        }

        // Description: longest free text
        let description = profiles
            .iter()
            .filter(|p| !taken.contains(&p.index) && p.description_confidence() >= self.min_confidence)
            .fold(None, |best: Option<&ColumnProfile>, p| match best {
                Some(b) if b.text_avg_len >= p.text_avg_len => Some(b),
                _ => Some(p),
            });
        if let Some(description) = description {
            mapping = mapping.description(headers[description.index].clone());
            hints[description.index] = hint(
                &headers[description.index],
                ColumnRole::Description,
                description.description_confidence(),
                None,
            );
            taken.insert(description.index);
        }

        // Optional roles
        if let Some(reference) = best_by(&profiles, &taken, |p| p.reference_confidence, self.min_confidence) {
            mapping = mapping.reference(headers[reference.index].clone());
            hints[reference.index] = hint(&headers[reference.index], ColumnRole::Reference, reference.reference_confidence, None);
            taken.insert(reference.index);
        }
        if let Some(category) = best_by(&profiles, &taken, |p| p.category_confidence, self.min_confidence) {
            mapping = mapping.category(headers[category.index].clone());
            hints[category.index] = hint(&headers[category.index], ColumnRole::Category, category.category_confidence, None);
            taken.insert(category.index);
        }

        Inference { hints, mapping }
    }

    fn assign_amount(
        &self,
        amount: &ColumnProfile,
        headers: &[String],
        hints: &mut [ColumnHint],
        mapping: &mut FormatMapping,
        taken: &mut HashSet<usize>,
    ) {
        *mapping = mapping
            .clone()
            .amount(headers[amount.index].clone(), amount.sign_convention());
        hints[amount.index] = hint(
            &headers[amount.index],
            ColumnRole::Amount,
            amount.amount_confidence,
            Some(amount.amount_subtype()),
        );
        taken.insert(amount.index);
    }
}

fn hint(column: &str, role: ColumnRole, confidence: f64, subtype: Option<&str>) -> ColumnHint {
    ColumnHint {
        column_name: column.to_string(),
        inferred_role: role,
        confidence: confidence.clamp(0.0, 1.0),
        detected_subtype: subtype.map(str::to_string),
    }
}

/// Highest-scoring untaken column at or above `min`; leftmost wins ties
fn best_by<'a>(
    profiles: &'a [ColumnProfile],
    taken: &HashSet<usize>,
    score: impl Fn(&ColumnProfile) -> f64,
    min: f64,
) -> Option<&'a ColumnProfile> {
    profiles
        .iter()
        .filter(|p| !taken.contains(&p.index) && score(p) >= min && p.non_empty > 0)
        .fold(None, |best: Option<&ColumnProfile>, p| match best {
            Some(b) if score(b) >= score(p) => Some(b),
            _ => Some(p),
        })
}

fn header_matches(header: &str, words: &[&str], short: &str) -> bool {
    let lower = header.trim().to_lowercase();
    lower == short || words.iter().any(|w| lower.contains(w))
}

/// Two unsigned, sparse columns that are never both filled on the same row
fn exclusive_pair<'a>(
    candidates: &[&'a ColumnProfile],
    headers: &[String],
    sample: &[TableRow],
) -> Option<(&'a ColumnProfile, &'a ColumnProfile)> {
    let unsigned: Vec<&ColumnProfile> = candidates
        .iter()
        .copied()
        .filter(|p| !p.is_signed() && p.fill < 0.95)
        .collect();

    for (i, left) in unsigned.iter().enumerate() {
        for right in &unsigned[i + 1..] {
            let mut both = 0usize;
            let mut either = 0usize;
            for row in sample {
                let l = filled(row.cell(left.index));
                let r = filled(row.cell(right.index));
                if l && r {
                    both += 1;
                }
                if l || r {
                    either += 1;
                }
            }
            let rows = sample.len().max(1) as f64;
            if (both as f64) / rows <= 0.1 && (either as f64) / rows >= 0.9 {
                let left_is_credit = header_matches(&headers[left.index], CREDIT_WORDS, "in");
                let right_is_debit = header_matches(&headers[right.index], DEBIT_WORDS, "out");
                return Some(if left_is_credit || right_is_debit {
                    (right, left)
                } else {
                    (left, right)
                });
            }
        }
    }
    None
}

/// A cell that carries a non-zero amount
fn filled(cell: &str) -> bool {
    parse_amount(cell).map_or(false, |a| !a.value.is_zero())
}
