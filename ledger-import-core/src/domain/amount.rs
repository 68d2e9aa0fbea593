//! Lenient amount parsing for bank export cells
//!
//! Bank exports print money in many shapes: `$1,234.56`, `(50.00)`, `50.00-`,
//! `-$12.00`, `USD 9.99`, and European `-3,20` or `1.234,56`. `parse_amount`
//! accepts all of them and reports which
//! notation carried the sign, so callers can both convert a cell and profile a
//! whole column.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How the sign of a parsed amount was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notation {
    /// No sign at all (or an explicit `+`)
    Unsigned,
    LeadingMinus,
    TrailingMinus,
    Parentheses,
}

/// A successfully parsed amount cell
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAmount {
    pub value: Decimal,
    pub notation: Notation,
    /// A currency symbol or ISO code was present
    pub currency_marker: bool,
    /// Digits after the decimal point
    pub decimals: u32,
    /// Digits before the decimal point
    pub integer_digits: usize,
}

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹'];
const CURRENCY_CODES: &[&str] = &["USD", "EUR", "GBP", "CAD", "AUD", "CHF", "JPY"];

/// Parse a raw cell into a signed decimal
///
/// Returns `None` for empty cells and anything that is not a number once
/// currency markers and thousands separators are removed (dates, free text,
/// alphanumeric identifiers).
pub fn parse_amount(raw: &str) -> Option<ParsedAmount> {
    let mut s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let mut currency_marker = false;
    for code in CURRENCY_CODES {
        if let Some(rest) = s.strip_prefix(*code) {
            s = rest.trim_start();
            currency_marker = true;
        } else if let Some(rest) = s.strip_suffix(*code) {
            s = rest.trim_end();
            currency_marker = true;
        }
    }

    let mut negative = false;
    let mut notation = Notation::Unsigned;

    if s.len() >= 2 && s.starts_with('(') && s.ends_with(')') {
        negative = true;
        notation = Notation::Parentheses;
        s = s[1..s.len() - 1].trim();
    } else if let Some(rest) = s.strip_suffix('-') {
        negative = true;
        notation = Notation::TrailingMinus;
        s = rest.trim_end();
    }

    let (point, group) = if uses_decimal_comma(s) {
        (',', '.')
    } else {
        ('.', ',')
    };

    let mut cleaned = String::with_capacity(s.len());
    let mut seen_digit = false;
    let mut seen_point = false;
    let mut decimals = 0u32;
    let mut integer_digits = 0usize;

    for c in s.chars() {
        match c {
            '0'..='9' => {
                cleaned.push(c);
                seen_digit = true;
                if seen_point {
                    decimals += 1;
                } else {
                    integer_digits += 1;
                }
            }
            c if c == point && !seen_point => {
                cleaned.push('.');
                seen_point = true;
            }
            // Thousands separators only make sense between digits
            c if (c == group || c == '\'' || c == '\u{a0}') && seen_digit && !seen_point => {}
            '-' if !seen_digit && !negative => {
                negative = true;
                notation = Notation::LeadingMinus;
            }
            '+' if !seen_digit && !negative => {}
            ' ' if !seen_digit => {}
            c if CURRENCY_SYMBOLS.contains(&c) && !seen_digit => currency_marker = true,
            _ => return None,
        }
    }

    if !seen_digit {
        return None;
    }

    let mut value = Decimal::from_str(&cleaned).ok()?;
    if negative {
        value = -value;
    }

    Some(ParsedAmount {
        value: normalize_zero(value),
        notation,
        currency_marker,
        decimals,
        integer_digits,
    })
}

/// Whether the comma is the decimal separator
///
/// True for `1.234,56` (a point before the last comma) and for `-3,20` or
/// `2500,5` (no point, one or two digits after the last comma). `1,234` keeps
/// the comma as a thousands separator.
fn uses_decimal_comma(s: &str) -> bool {
    let Some(comma) = s.rfind(',') else {
        return false;
    };
    match s.rfind('.') {
        Some(point) => point < comma,
        None => {
            let tail = &s[comma + 1..];
            (1..=2).contains(&tail.len()) && tail.chars().all(|c| c.is_ascii_digit())
        }
    }
}

/// Collapse negative zero so `-0.00` and `0.00` compare and print alike
pub fn normalize_zero(value: Decimal) -> Decimal {
    if value.is_zero() {
        Decimal::ZERO
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(raw: &str) -> Option<Decimal> {
        parse_amount(raw).map(|p| p.value)
    }

    #[test]
    fn test_plain_and_signed_values() {
        assert_eq!(value("12.34"), Some(Decimal::new(1234, 2)));
        assert_eq!(value("-12.34"), Some(Decimal::new(-1234, 2)));
        assert_eq!(value("+12.34"), Some(Decimal::new(1234, 2)));
        assert_eq!(value("12.34-"), Some(Decimal::new(-1234, 2)));
        assert_eq!(value("(12.34)"), Some(Decimal::new(-1234, 2)));
    }

    #[test]
    fn test_currency_and_thousands() {
        assert_eq!(value("$1,234.56"), Some(Decimal::new(123456, 2)));
        assert_eq!(value("-$50.00"), Some(Decimal::new(-5000, 2)));
        assert_eq!(value("($50.00)"), Some(Decimal::new(-5000, 2)));
        assert_eq!(value("USD 9.99"), Some(Decimal::new(999, 2)));
        assert_eq!(value("9.99 EUR"), Some(Decimal::new(999, 2)));

        let parsed = parse_amount("$5.00").unwrap();
        assert!(parsed.currency_marker);
        assert_eq!(parsed.decimals, 2);
    }

    #[test]
    fn test_comma_decimals() {
        assert_eq!(value("-3,20"), Some(Decimal::new(-320, 2)));
        assert_eq!(value("2500,00"), Some(Decimal::new(250000, 2)));
        assert_eq!(value("1.234,56"), Some(Decimal::new(123456, 2)));
        assert_eq!(value("€ 12,5"), Some(Decimal::new(125, 1)));
        assert_eq!(value("(1.000,00)"), Some(Decimal::new(-100000, 2)));
        assert_eq!(parse_amount("-3,20").unwrap().decimals, 2);

        // Three digits after a lone comma still group thousands
        assert_eq!(value("1,234"), Some(Decimal::new(1234, 0)));
        assert_eq!(value("1,234,567.89"), Some(Decimal::new(123456789, 2)));
    }

    #[test]
    fn test_notation_is_reported() {
        assert_eq!(parse_amount("5").unwrap().notation, Notation::Unsigned);
        assert_eq!(parse_amount("-5").unwrap().notation, Notation::LeadingMinus);
        assert_eq!(parse_amount("5-").unwrap().notation, Notation::TrailingMinus);
        assert_eq!(parse_amount("(5)").unwrap().notation, Notation::Parentheses);
    }

    #[test]
    fn test_rejects_non_amounts() {
        assert_eq!(value(""), None);
        assert_eq!(value("   "), None);
        assert_eq!(value("2024-01-15"), None);
        assert_eq!(value("01/15/2024"), None);
        assert_eq!(value("15.01.2024"), None);
        assert_eq!(value("STARBUCKS #123"), None);
        assert_eq!(value("TXN123"), None);
        assert_eq!(value("$"), None);
    }

    #[test]
    fn test_negative_zero_is_collapsed() {
        let zero = value("-0.00").unwrap();
        assert!(!zero.is_sign_negative());
        assert_eq!(format!("{:.2}", zero), "0.00");
    }

    #[test]
    fn test_integer_digit_count() {
        assert_eq!(parse_amount("1234567890.00").unwrap().integer_digits, 10);
    }
}
