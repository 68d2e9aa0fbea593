//! Format mappings - how the columns of one export map onto a draft

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::amount::{normalize_zero, parse_amount};
use super::column::ColumnRole;

static NO_COLUMN: Option<String> = None;

/// How the sign of an amount is encoded in the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignConvention {
    /// `-50.00` is an outflow
    LeadingMinus,
    /// `50.00-` is an outflow
    TrailingMinus,
    /// `(50.00)` is an outflow
    Parentheses,
    /// Outflows are printed as positive magnitudes; every value is negated
    NegativePrefix,
    /// Separate debit and credit columns
    DebitCredit,
}

impl SignConvention {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignConvention::LeadingMinus => "leading_minus",
            SignConvention::TrailingMinus => "trailing_minus",
            SignConvention::Parentheses => "parentheses",
            SignConvention::NegativePrefix => "negative_prefix",
            SignConvention::DebitCredit => "debit_credit",
        }
    }

    /// Convert a single amount cell into a signed value (negative = expense)
    ///
    /// Any sign notation in the cell is honoured; the convention only decides
    /// what an unsigned magnitude means. For `DebitCredit` use
    /// [`SignConvention::parse_pair`].
    pub fn parse(&self, raw: &str) -> Option<Decimal> {
        let parsed = parse_amount(raw)?;
        let value = match self {
            SignConvention::NegativePrefix => -parsed.value,
            _ => parsed.value,
        };
        Some(normalize_zero(value))
    }

    /// Combine a debit cell and a credit cell into one signed value
    ///
    /// Debits become `-|x|`, credits `+|x|`. When both cells carry a value
    /// the net is returned. Two empty cells yield `None`.
    pub fn parse_pair(debit: Option<&str>, credit: Option<&str>) -> Option<Decimal> {
        let debit = debit.and_then(parse_amount).map(|p| p.value.abs());
        let credit = credit.and_then(parse_amount).map(|p| p.value.abs());

        let value = match (debit, credit) {
            (Some(d), None) => -d,
            (None, Some(c)) => c,
            (Some(d), Some(c)) => c - d,
            (None, None) => return None,
        };
        Some(normalize_zero(value))
    }

    /// Write a signed value back in this convention's notation
    pub fn render(&self, value: Decimal) -> String {
        let magnitude = value.abs();
        let negative = value.is_sign_negative() && !value.is_zero();
        match self {
            SignConvention::LeadingMinus | SignConvention::DebitCredit => {
                if negative {
                    format!("-{:.2}", magnitude)
                } else {
                    format!("{:.2}", magnitude)
                }
            }
            SignConvention::TrailingMinus => {
                if negative {
                    format!("{:.2}-", magnitude)
                } else {
                    format!("{:.2}", magnitude)
                }
            }
            SignConvention::Parentheses => {
                if negative {
                    format!("({:.2})", magnitude)
                } else {
                    format!("{:.2}", magnitude)
                }
            }
            SignConvention::NegativePrefix => SignConvention::LeadingMinus.render(-value),
        }
    }

    /// Inverse of [`SignConvention::parse_pair`]: `(debit, credit)` cells
    pub fn render_pair(value: Decimal) -> (String, String) {
        if value.is_sign_negative() && !value.is_zero() {
            (format!("{:.2}", value.abs()), String::new())
        } else {
            (String::new(), format!("{:.2}", value))
        }
    }
}

impl std::fmt::Display for SignConvention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignConvention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "leading_minus" => Ok(SignConvention::LeadingMinus),
            "trailing_minus" => Ok(SignConvention::TrailingMinus),
            "parentheses" => Ok(SignConvention::Parentheses),
            "negative_prefix" => Ok(SignConvention::NegativePrefix),
            "debit_credit" => Ok(SignConvention::DebitCredit),
            other => Err(format!("unknown sign convention '{}'", other)),
        }
    }
}

/// Column-to-role mapping plus the parse rules for one export format
///
/// Required-role columns are optional so that a partially resolved mapping
/// can be returned to the caller for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatMapping {
    pub format_id: String,
    #[serde(default)]
    pub date_column: Option<String>,
    #[serde(default)]
    pub amount_column: Option<String>,
    #[serde(default)]
    pub debit_column: Option<String>,
    #[serde(default)]
    pub credit_column: Option<String>,
    #[serde(default)]
    pub description_column: Option<String>,
    #[serde(default)]
    pub reference_column: Option<String>,
    #[serde(default)]
    pub category_column: Option<String>,
    /// chrono `strftime` pattern, e.g. `%m/%d/%Y`
    pub date_format_pattern: String,
    pub amount_sign_convention: SignConvention,
    #[serde(default)]
    pub skip_header_rows: usize,
    #[serde(default)]
    pub skip_footer_rows: usize,
    #[serde(default)]
    pub invert_sign: bool,
}

impl FormatMapping {
    /// Create an empty mapping with ISO dates and leading-minus amounts
    pub fn new(format_id: impl Into<String>) -> Self {
        Self {
            format_id: format_id.into(),
            date_column: None,
            amount_column: None,
            debit_column: None,
            credit_column: None,
            description_column: None,
            reference_column: None,
            category_column: None,
            date_format_pattern: "%Y-%m-%d".to_string(),
            amount_sign_convention: SignConvention::LeadingMinus,
            skip_header_rows: 0,
            skip_footer_rows: 0,
            invert_sign: false,
        }
    }

    pub fn date(mut self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.date_column = Some(column.into());
        self.date_format_pattern = pattern.into();
        self
    }

    pub fn amount(mut self, column: impl Into<String>, convention: SignConvention) -> Self {
        self.amount_column = Some(column.into());
        self.amount_sign_convention = convention;
        self
    }

    pub fn debit_credit(mut self, debit: impl Into<String>, credit: impl Into<String>) -> Self {
        self.debit_column = Some(debit.into());
        self.credit_column = Some(credit.into());
        self.amount_sign_convention = SignConvention::DebitCredit;
        self
    }

    pub fn description(mut self, column: impl Into<String>) -> Self {
        self.description_column = Some(column.into());
        self
    }

    pub fn reference(mut self, column: impl Into<String>) -> Self {
        self.reference_column = Some(column.into());
        self
    }

    pub fn category(mut self, column: impl Into<String>) -> Self {
        self.category_column = Some(column.into());
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert_sign = true;
        self
    }

    /// Whether the amount comes from split debit/credit columns
    pub fn uses_debit_credit(&self) -> bool {
        self.amount_sign_convention == SignConvention::DebitCredit
    }

    fn amount_resolved(&self) -> bool {
        if self.uses_debit_credit() {
            self.debit_column.is_some() || self.credit_column.is_some()
        } else {
            self.amount_column.is_some()
        }
    }

    /// Required roles this mapping does not resolve yet
    pub fn missing_roles(&self) -> Vec<ColumnRole> {
        let mut missing = Vec::new();
        if self.date_column.is_none() {
            missing.push(ColumnRole::Date);
        }
        if !self.amount_resolved() {
            missing.push(ColumnRole::Amount);
        }
        if self.description_column.is_none() {
            missing.push(ColumnRole::Description);
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_roles().is_empty()
    }

    /// Fraction of required roles resolved, in `[0, 1]`
    pub fn completeness(&self) -> f64 {
        let total = ColumnRole::REQUIRED.len();
        (total - self.missing_roles().len()) as f64 / total as f64
    }

    /// Every column this mapping reads, paired with its role
    pub fn referenced_columns(&self) -> Vec<(ColumnRole, &str)> {
        let amount_slots = if self.uses_debit_credit() {
            [
                (ColumnRole::Debit, &self.debit_column),
                (ColumnRole::Credit, &self.credit_column),
            ]
        } else {
            [
                (ColumnRole::Amount, &self.amount_column),
                (ColumnRole::Amount, &NO_COLUMN),
            ]
        };

        std::iter::once((ColumnRole::Date, &self.date_column))
            .chain(amount_slots)
            .chain([
                (ColumnRole::Description, &self.description_column),
                (ColumnRole::Reference, &self.reference_column),
                (ColumnRole::Category, &self.category_column),
            ])
            .filter_map(|(role, column)| column.as_deref().map(|name| (role, name)))
            .collect()
    }

    /// Apply `invert_sign` to an already signed value
    pub fn orient(&self, value: Decimal) -> Decimal {
        if self.invert_sign {
            normalize_zero(-value)
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_negative_prefix_negates_unsigned_outflows() {
        let convention = SignConvention::NegativePrefix;
        assert_eq!(convention.parse("$50.00"), Some(dec("-50.00")));
        // Refunds printed with an explicit minus come back positive
        assert_eq!(convention.parse("-20.00"), Some(dec("20.00")));

        let inverted = FormatMapping::new("t")
            .amount("Amount", SignConvention::NegativePrefix)
            .inverted();
        let value = inverted.orient(convention.parse("$50.00").unwrap());
        assert_eq!(value, dec("50.00"));
    }

    #[test]
    fn test_render_then_parse_recovers_value() {
        let values = [dec("-50.00"), dec("12.34"), dec("0.00")];
        let conventions = [
            SignConvention::LeadingMinus,
            SignConvention::TrailingMinus,
            SignConvention::Parentheses,
            SignConvention::NegativePrefix,
        ];

        for convention in conventions {
            for value in values {
                let rendered = convention.render(value);
                assert_eq!(
                    convention.parse(&rendered),
                    Some(value),
                    "{} rendered {} as {}",
                    convention,
                    value,
                    rendered
                );
            }
        }

        for value in values {
            let (debit, credit) = SignConvention::render_pair(value);
            assert_eq!(
                SignConvention::parse_pair(Some(&debit), Some(&credit)),
                Some(value)
            );
        }
    }

    #[test]
    fn test_inverted_mapping_round_trips_through_file_notation() {
        for convention in [SignConvention::TrailingMinus, SignConvention::Parentheses] {
            let mapping = FormatMapping::new("card").amount("Amount", convention).inverted();
            for value in [dec("-50.00"), dec("12.34"), dec("0.00")] {
                // The cell a card export would print for a ledger value of `value`
                let cell = convention.render(mapping.orient(value));
                let back = mapping.orient(convention.parse(&cell).unwrap());
                assert_eq!(back, value, "{} via {:?}", convention, cell);
            }
        }

        let trailing = FormatMapping::new("card")
            .amount("Amount", SignConvention::TrailingMinus)
            .inverted();
        assert_eq!(SignConvention::TrailingMinus.render(trailing.orient(dec("20.00"))), "20.00-");
        assert_eq!(trailing.orient(SignConvention::TrailingMinus.parse("20.00-").unwrap()), dec("20.00"));

        let parens = FormatMapping::new("card")
            .amount("Amount", SignConvention::Parentheses)
            .inverted();
        assert_eq!(SignConvention::Parentheses.render(parens.orient(dec("100.00"))), "(100.00)");
        assert_eq!(parens.orient(SignConvention::Parentheses.parse("12.50").unwrap()), dec("-12.50"));
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            SignConvention::parse_pair(Some("25.00"), Some("")),
            Some(dec("-25.00"))
        );
        assert_eq!(
            SignConvention::parse_pair(Some(""), Some("100.00")),
            Some(dec("100.00"))
        );
        assert_eq!(
            SignConvention::parse_pair(Some("-25.00"), None),
            Some(dec("-25.00"))
        );
        assert_eq!(SignConvention::parse_pair(Some(""), Some("")), None);
    }

    #[test]
    fn test_missing_roles_and_completeness() {
        let mapping = FormatMapping::new("partial").date("Date", "%m/%d/%Y");
        assert_eq!(
            mapping.missing_roles(),
            vec![ColumnRole::Amount, ColumnRole::Description]
        );
        assert!((mapping.completeness() - 1.0 / 3.0).abs() < 1e-9);

        let full = mapping
            .debit_credit("Debit", "Credit")
            .description("Description");
        assert!(full.is_complete());
        assert_eq!(full.completeness(), 1.0);
    }

    #[test]
    fn test_mapping_json_uses_camel_case() {
        let mapping = FormatMapping::new("custom")
            .date("Posted", "%Y-%m-%d")
            .amount("Amt", SignConvention::Parentheses)
            .description("Memo");
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(json["dateColumn"], "Posted");
        assert_eq!(json["amountSignConvention"], "parentheses");

        let back: FormatMapping = serde_json::from_value(json).unwrap();
        assert_eq!(back, mapping);
    }
}
