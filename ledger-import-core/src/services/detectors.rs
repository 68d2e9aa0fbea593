//! Format detectors - header fingerprints for known bank exports
//!
//! Each detector scores how well a table matches one institution's export
//! and supplies that export's mapping. Scores are in `[0, 1]`:
//! - all fingerprint headers present: `0.7 + 0.3 * share of mapped headers present`
//! - some fingerprint headers present: below `0.6`
//! - none present: `0.0`
//!
//! A sample of rows is then checked against the mapping's date pattern; when
//! fewer than half of the sampled dates parse the score is scaled down, so a
//! lookalike header with foreign data does not auto-apply.
//!
//! Detectors never fail. The built-in set is created once per process.

use std::sync::OnceLock;

use crate::domain::{FormatMapping, SignConvention};
use crate::services::dates::parse_date;
use crate::services::tabular::{TableRow, OFX_HEADERS, QIF_HEADERS};

/// Scale applied when sampled dates disagree with the mapping's pattern
const DATE_DISAGREEMENT_PENALTY: f64 = 0.6;

/// Recognizes one export format
pub trait FormatDetector: Send + Sync {
    /// Stable identifier, also used as the mapping's `format_id`
    fn id(&self) -> &str;

    /// Human-readable institution / format name
    fn name(&self) -> &str;

    /// Confidence in `[0, 1]` that the table is this format
    fn detect(&self, headers: &[String], sample: &[TableRow]) -> f64;

    /// The mapping to apply when this format is recognized
    fn mapping(&self) -> FormatMapping;
}

/// Detector driven by a set of distinguishing header names
pub struct HeaderFingerprint {
    id: &'static str,
    name: &'static str,
    /// Lowercased headers that identify the format
    fingerprint: &'static [&'static str],
    /// Lowercased headers the mapping reads that are common to many formats
    supporting: &'static [&'static str],
    build: fn() -> FormatMapping,
}

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

fn header_present(headers: &[String], wanted: &str) -> bool {
    headers.iter().any(|h| normalize_header(h) == wanted)
}

fn share(hits: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        hits as f64 / total as f64
    }
}

/// Fraction of non-empty sampled dates that parse with the mapping's pattern
///
/// `None` when the date column is absent or the sample has no dates.
fn date_agreement(mapping: &FormatMapping, headers: &[String], sample: &[TableRow]) -> Option<f64> {
    let column = mapping.date_column.as_deref()?;
    let wanted = normalize_header(column);
    let index = headers.iter().position(|h| normalize_header(h) == wanted)?;

    let cells: Vec<&str> = sample
        .iter()
        .map(|row| row.cell(index))
        .filter(|cell| !cell.is_empty())
        .collect();
    if cells.is_empty() {
        return None;
    }

    let parsed = cells
        .iter()
        .filter(|cell| parse_date(cell, &mapping.date_format_pattern).is_some())
        .count();
    Some(share(parsed, cells.len()))
}

fn apply_sample_check(score: f64, mapping: &FormatMapping, headers: &[String], sample: &[TableRow]) -> f64 {
    match date_agreement(mapping, headers, sample) {
        Some(agreement) if agreement < 0.5 => score * DATE_DISAGREEMENT_PENALTY,
        _ => score,
    }
}

impl FormatDetector for HeaderFingerprint {
    fn id(&self) -> &str {
        self.id
    }

    fn name(&self) -> &str {
        self.name
    }

    fn detect(&self, headers: &[String], sample: &[TableRow]) -> f64 {
        let fingerprint_hits = self
            .fingerprint
            .iter()
            .filter(|h| header_present(headers, h))
            .count();
        if fingerprint_hits == 0 {
            return 0.0;
        }

        let supporting = share(
            self.supporting
                .iter()
                .filter(|h| header_present(headers, h))
                .count(),
            self.supporting.len(),
        );

        let score = if fingerprint_hits == self.fingerprint.len() {
            0.7 + 0.3 * supporting
        } else {
            0.6 * share(fingerprint_hits, self.fingerprint.len()) * (0.5 + 0.5 * supporting)
        };

        apply_sample_check(score, &self.mapping(), headers, sample)
    }

    fn mapping(&self) -> FormatMapping {
        (self.build)()
    }
}

/// Wells Fargo exports have no header row; the third column is always `*`
pub struct WellsFargoDetector;

impl WellsFargoDetector {
    const ID: &'static str = "wells_fargo";
}

impl FormatDetector for WellsFargoDetector {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "Wells Fargo"
    }

    fn detect(&self, headers: &[String], sample: &[TableRow]) -> f64 {
        let synthetic = headers.len() == 5 && headers[0] == "Column 1";
        if !synthetic || sample.is_empty() {
            return 0.0;
        }

        let starred = sample.iter().filter(|row| row.cell(2) == "*").count();
        let starred = share(starred, sample.len());
        if starred < 0.8 {
            return 0.0;
        }

        apply_sample_check(0.7 + 0.25 * starred, &self.mapping(), headers, sample)
    }

    fn mapping(&self) -> FormatMapping {
        FormatMapping::new(Self::ID)
            .date("Column 1", "%m/%d/%Y")
            .amount("Column 2", SignConvention::LeadingMinus)
            .reference("Column 4")
            .description("Column 5")
    }
}

static FINGERPRINTS: [HeaderFingerprint; 12] = [
    HeaderFingerprint {
        id: "bofa_checking",
        name: "Bank of America Checking",
        fingerprint: &["running bal."],
        supporting: &["date", "description", "amount"],
        // The "Beginning balance as of" line has no amount and is dropped by the parser
        build: || {
            FormatMapping::new("bofa_checking")
                .date("Date", "%m/%d/%Y")
                .amount("Amount", SignConvention::LeadingMinus)
                .description("Description")
        },
    },
    HeaderFingerprint {
        id: "bofa_credit_card",
        name: "Bank of America Credit Card",
        fingerprint: &["reference number", "payee", "address"],
        supporting: &["posted date", "amount"],
        build: || {
            FormatMapping::new("bofa_credit_card")
                .date("Posted Date", "%m/%d/%Y")
                .amount("Amount", SignConvention::LeadingMinus)
                .description("Payee")
                .reference("Reference Number")
        },
    },
    HeaderFingerprint {
        id: "chase_credit_card",
        name: "Chase Credit Card",
        fingerprint: &["transaction date", "post date", "type"],
        supporting: &["description", "category", "amount"],
        build: || {
            FormatMapping::new("chase_credit_card")
                .date("Transaction Date", "%m/%d/%Y")
                .amount("Amount", SignConvention::LeadingMinus)
                .description("Description")
                .category("Category")
        },
    },
    HeaderFingerprint {
        id: "chase_checking",
        name: "Chase Checking",
        fingerprint: &["details", "posting date", "check or slip #"],
        supporting: &["description", "amount", "type", "balance"],
        build: || {
            FormatMapping::new("chase_checking")
                .date("Posting Date", "%m/%d/%Y")
                .amount("Amount", SignConvention::LeadingMinus)
                .description("Description")
                .reference("Check or Slip #")
        },
    },
    HeaderFingerprint {
        id: "amex",
        name: "American Express",
        fingerprint: &["card member"],
        supporting: &["date", "description", "account #", "amount"],
        build: || {
            // Charges are printed positive, payments negative
            FormatMapping::new("amex")
                .date("Date", "%m/%d/%Y")
                .amount("Amount", SignConvention::NegativePrefix)
                .description("Description")
        },
    },
    HeaderFingerprint {
        id: "capital_one_card",
        name: "Capital One Credit Card",
        fingerprint: &["card no.", "posted date"],
        supporting: &["transaction date", "description", "category", "debit", "credit"],
        build: || {
            FormatMapping::new("capital_one_card")
                .date("Transaction Date", "%Y-%m-%d")
                .debit_credit("Debit", "Credit")
                .description("Description")
                .category("Category")
        },
    },
    HeaderFingerprint {
        id: "citi",
        name: "Citi",
        fingerprint: &["status", "debit", "credit"],
        supporting: &["date", "description"],
        build: || {
            FormatMapping::new("citi")
                .date("Date", "%m/%d/%Y")
                .debit_credit("Debit", "Credit")
                .description("Description")
        },
    },
    HeaderFingerprint {
        id: "discover",
        name: "Discover",
        fingerprint: &["trans. date", "post date"],
        supporting: &["description", "amount", "category"],
        build: || {
            FormatMapping::new("discover")
                .date("Trans. Date", "%m/%d/%Y")
                .amount("Amount", SignConvention::NegativePrefix)
                .description("Description")
                .category("Category")
        },
    },
    HeaderFingerprint {
        id: "venmo",
        name: "Venmo",
        fingerprint: &["datetime", "amount (total)", "from", "to"],
        supporting: &["id", "note", "type", "status"],
        build: || {
            FormatMapping::new("venmo")
                .date("Datetime", "%Y-%m-%dT%H:%M:%S")
                .amount("Amount (total)", SignConvention::LeadingMinus)
                .description("Note")
                .reference("ID")
        },
    },
    HeaderFingerprint {
        id: "healthequity_hsa",
        name: "HealthEquity HSA",
        fingerprint: &["transaction", "cash balance"],
        supporting: &["date", "amount"],
        build: || {
            FormatMapping::new("healthequity_hsa")
                .date("Date", "%m/%d/%Y")
                .amount("Amount", SignConvention::Parentheses)
                .description("Transaction")
        },
    },
    HeaderFingerprint {
        id: "qif",
        name: "Quicken Interchange Format",
        fingerprint: &["date", "amount", "payee", "memo", "number", "category"],
        supporting: &[],
        build: || {
            FormatMapping::new("qif")
                .date(QIF_HEADERS[0], "%Y-%m-%d")
                .amount(QIF_HEADERS[1], SignConvention::LeadingMinus)
                .description(QIF_HEADERS[2])
                .reference(QIF_HEADERS[4])
                .category(QIF_HEADERS[5])
        },
    },
    HeaderFingerprint {
        id: "ofx",
        name: "Open Financial Exchange",
        fingerprint: &["date", "amount", "name", "memo", "fitid", "type", "check number"],
        supporting: &[],
        build: || {
            FormatMapping::new("ofx")
                .date(OFX_HEADERS[0], "%Y-%m-%d")
                .amount(OFX_HEADERS[1], SignConvention::LeadingMinus)
                .description(OFX_HEADERS[2])
                .reference(OFX_HEADERS[4])
        },
    },
];

static WELLS_FARGO: WellsFargoDetector = WellsFargoDetector;

/// Every built-in detector, in evaluation order
pub fn builtin_detectors() -> &'static [&'static dyn FormatDetector] {
    static DETECTORS: OnceLock<Vec<&'static dyn FormatDetector>> = OnceLock::new();
    DETECTORS.get_or_init(|| {
        let mut detectors: Vec<&'static dyn FormatDetector> = FINGERPRINTS
            .iter()
            .map(|d| d as &'static dyn FormatDetector)
            .collect();
        detectors.push(&WELLS_FARGO);
        detectors
    })
}

/// Look up a built-in detector by id
pub fn builtin_detector(id: &str) -> Option<&'static dyn FormatDetector> {
    builtin_detectors().iter().copied().find(|d| d.id() == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn rows(cells: &[&[&str]]) -> Vec<TableRow> {
        cells
            .iter()
            .enumerate()
            .map(|(i, r)| TableRow {
                line: i + 2,
                cells: r.iter().map(|s| s.to_string()).collect(),
            })
            .collect()
    }

    #[test]
    fn test_running_balance_identifies_bofa_checking() {
        let h = headers(&["Date", "Description", "Amount", "Running Bal."]);
        let sample = rows(&[&["01/03/2024", "GROCERY", "-45.10", "954.90"]]);
        let detector = builtin_detector("bofa_checking").unwrap();
        let score = detector.detect(&h, &sample);
        assert!(score >= 0.7, "score was {}", score);
    }

    #[test]
    fn test_generic_headers_score_zero_for_fingerprinted_formats() {
        let h = headers(&["Date", "Description", "Amount"]);
        for detector in builtin_detectors() {
            if detector.id() == "qif" || detector.id() == "ofx" {
                continue;
            }
            assert_eq!(detector.detect(&h, &[]), 0.0, "{}", detector.id());
        }
    }

    #[test]
    fn test_partial_fingerprint_stays_below_auto_apply() {
        // Reference Number and Payee without Address
        let h = headers(&["Posted Date", "Reference Number", "Payee", "Amount"]);
        let detector = builtin_detector("bofa_credit_card").unwrap();
        let score = detector.detect(&h, &[]);
        assert!(score > 0.0 && score < 0.6, "score was {}", score);
    }

    #[test]
    fn test_date_disagreement_lowers_score() {
        let h = headers(&["Date", "Description", "Amount", "Running Bal."]);
        let iso = rows(&[
            &["2024-01-03", "GROCERY", "-45.10", "954.90"],
            &["2024-01-04", "FUEL", "-30.00", "924.90"],
        ]);
        let score = builtin_detector("bofa_checking").unwrap().detect(&h, &iso);
        assert!(score < 0.7, "score was {}", score);
    }

    #[test]
    fn test_amex_mapping_negates_charges() {
        let detector = builtin_detector("amex").unwrap();
        let mapping = detector.mapping();
        assert_eq!(mapping.amount_sign_convention, SignConvention::NegativePrefix);
        let h = headers(&["Date", "Description", "Card Member", "Account #", "Amount"]);
        assert!(detector.detect(&h, &[]) >= 0.99);
    }

    #[test]
    fn test_wells_fargo_headerless() {
        let h = headers(&["Column 1", "Column 2", "Column 3", "Column 4", "Column 5"]);
        let sample = rows(&[
            &["01/15/2024", "-25.00", "*", "", "GAS STATION"],
            &["01/16/2024", "100.00", "*", "", "DEPOSIT"],
        ]);
        let detector = builtin_detector("wells_fargo").unwrap();
        assert!(detector.detect(&h, &sample) >= 0.9);

        let unstarred = rows(&[&["01/15/2024", "-25.00", "x", "", "GAS STATION"]]);
        assert_eq!(detector.detect(&h, &unstarred), 0.0);
    }

    #[test]
    fn test_builtin_ids_are_unique() {
        let mut ids: Vec<&str> = builtin_detectors().iter().map(|d| d.id()).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_mapping_format_id_matches_detector_id() {
        for detector in builtin_detectors() {
            assert_eq!(detector.mapping().format_id, detector.id());
        }
    }
}
