//! Tabular decoding - turns a raw export into headers and rows
//!
//! Every supported source is flattened into the same [`Table`] shape so that
//! detection, inference and parsing never care where a row came from:
//! - delimited text (comma, semicolon, tab, pipe), with preamble lines and
//!   headerless exports handled
//! - Quicken QIF, one row per `^`-terminated record
//! - OFX/QFX (SGML or XML), one row per `<STMTTRN>` block
//!
//! QIF and OFX rows get fixed synthetic headers and ISO dates.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;

use crate::domain::result::{Error, Result};
use crate::domain::{parse_amount, RawFile};
use crate::services::dates::looks_like_date;

pub const QIF_HEADERS: [&str; 6] = ["Date", "Amount", "Payee", "Memo", "Number", "Category"];
pub const OFX_HEADERS: [&str; 7] = [
    "Date",
    "Amount",
    "Name",
    "Memo",
    "FITID",
    "Type",
    "Check Number",
];

/// Lines examined when looking for the header row
const HEADER_SCAN_LIMIT: usize = 30;
const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SourceKind {
    Csv { delimiter: char },
    Qif,
    Ofx,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    /// 1-based line in the source file
    pub line: usize,
    pub cells: Vec<String>,
}

impl TableRow {
    /// Cell at `index`, or `""` when the row is short
    pub fn cell(&self, index: usize) -> &str {
        self.cells.get(index).map(String::as_str).unwrap_or("")
    }
}

/// A decoded export
#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub kind: SourceKind,
    pub headers: Vec<String>,
    pub rows: Vec<TableRow>,
    /// No header row was found; headers are `Column 1`, `Column 2`, ...
    pub headerless: bool,
    /// Records skipped before the header row
    pub preamble_rows: usize,
}

impl Table {
    /// Index of a header, exact match first, then case-insensitive
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name).or_else(|| {
            let wanted = name.trim().to_lowercase();
            self.headers
                .iter()
                .position(|h| h.trim().to_lowercase() == wanted)
        })
    }

    /// The first `limit` rows
    pub fn sample(&self, limit: usize) -> &[TableRow] {
        &self.rows[..self.rows.len().min(limit)]
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Decode a raw file into a table
///
/// Fails with `EmptyFile` when the file holds no text at all; a header-only
/// file decodes into a table without rows.
pub fn decode(file: &RawFile) -> Result<Table> {
    let text = decode_text(&file.content);
    if text.trim().is_empty() {
        return Err(Error::EmptyFile);
    }

    match sniff_kind(file, &text) {
        SniffedKind::Ofx => Ok(decode_ofx(&text)),
        SniffedKind::Qif => Ok(decode_qif(&text)),
        SniffedKind::Csv => decode_csv(&text),
    }
}

/// UTF-8 with an optional BOM, falling back to Latin-1
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

enum SniffedKind {
    Csv,
    Qif,
    Ofx,
}

fn sniff_kind(file: &RawFile, text: &str) -> SniffedKind {
    let head: String = text.trim_start().chars().take(512).collect();
    let head_upper = head.to_ascii_uppercase();

    if head_upper.starts_with("OFXHEADER")
        || head_upper.contains("<OFX>")
        || (head_upper.starts_with("<?XML") && head_upper.contains("OFX"))
    {
        return SniffedKind::Ofx;
    }
    if head_upper.starts_with("!TYPE:") || head_upper.starts_with("!ACCOUNT") {
        return SniffedKind::Qif;
    }

    match file.extension().as_deref() {
        Some("ofx") | Some("qfx") => SniffedKind::Ofx,
        Some("qif") => SniffedKind::Qif,
        _ => SniffedKind::Csv,
    }
}

// ============================================================================
// Delimited text
// ============================================================================

fn decode_csv(text: &str) -> Result<Table> {
    let delimiter = sniff_delimiter(text);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| Error::validation(format!("Malformed CSV: {}", e)))?;
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(records.len() + 1);
        let cells: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
        if cells.iter().all(|c| c.is_empty()) {
            continue;
        }
        records.push(TableRow { line, cells });
    }

    let kind = SourceKind::Csv {
        delimiter: delimiter as char,
    };

    let Some(start) = locate_header(&records) else {
        // Nothing tabular found; treat the first record as the header
        let headers = records
            .first()
            .map(|r| unique_headers(&r.cells))
            .unwrap_or_default();
        let rows = records.into_iter().skip(1).collect();
        return Ok(Table {
            kind,
            headers,
            rows,
            headerless: false,
            preamble_rows: 0,
        });
    };

    match start {
        HeaderStart::Header(index) => {
            let headers = unique_headers(&records[index].cells);
            let rows = records.into_iter().skip(index + 1).collect();
            Ok(Table {
                kind,
                headers,
                rows,
                headerless: false,
                preamble_rows: index,
            })
        }
        HeaderStart::Headerless(index) => {
            let width = records[index].cells.len();
            let headers = (1..=width).map(|n| format!("Column {}", n)).collect();
            let rows = records.into_iter().skip(index).collect();
            Ok(Table {
                kind,
                headers,
                rows,
                headerless: true,
                preamble_rows: index,
            })
        }
    }
}

enum HeaderStart {
    /// Header row at this record index
    Header(usize),
    /// No header; data starts at this record index
    Headerless(usize),
}

fn populated(row: &TableRow) -> usize {
    row.cells.iter().filter(|c| !c.is_empty()).count()
}

fn has_date_cell(row: &TableRow) -> bool {
    row.cells.iter().any(|c| looks_like_date(c))
}

fn has_value_cell(row: &TableRow) -> bool {
    row.cells
        .iter()
        .any(|c| looks_like_date(c) || parse_amount(c).is_some())
}

/// Find where the table starts, skipping bank preambles
///
/// A header is a row of two or more labels (no dates or numbers) followed by
/// a row that carries a date. A row that itself carries a date, followed by a
/// row of the same width, starts a headerless table.
fn locate_header(records: &[TableRow]) -> Option<HeaderStart> {
    let limit = records.len().min(HEADER_SCAN_LIMIT);

    for i in 0..limit {
        let row = &records[i];
        if populated(row) < 2 {
            continue;
        }

        let next = records.get(i + 1);
        if !has_value_cell(row) {
            if next.map_or(false, |n| populated(n) >= 2 && has_date_cell(n)) {
                return Some(HeaderStart::Header(i));
            }
            continue;
        }

        if has_date_cell(row) && next.map_or(true, |n| n.cells.len() == row.cells.len()) {
            return Some(HeaderStart::Headerless(i));
        }
    }
    None
}

/// Blank header cells become `Column N`; repeated names get a ` (2)` suffix
fn unique_headers(cells: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let base = if cell.is_empty() {
                format!("Column {}", i + 1)
            } else {
                cell.clone()
            };
            let count = seen.entry(base.to_lowercase()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{} ({})", base, count)
            }
        })
        .collect()
}

/// Pick the delimiter that splits the first lines most consistently
fn sniff_delimiter(text: &str) -> u8 {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(HEADER_SCAN_LIMIT)
        .collect();

    DELIMITER_CANDIDATES
        .iter()
        .copied()
        .map(|delimiter| {
            let counts: Vec<usize> = lines
                .iter()
                .map(|line| count_unquoted(line, delimiter as char))
                .collect();
            let mut frequency: HashMap<usize, usize> = HashMap::new();
            for &count in counts.iter().filter(|&&c| c > 0) {
                *frequency.entry(count).or_insert(0) += 1;
            }
            // (lines agreeing on the modal field count, that count)
            let score = frequency
                .into_iter()
                .max_by_key(|&(count, lines)| (lines, count))
                .map(|(count, lines)| (lines, count))
                .unwrap_or((0, 0));
            (delimiter, score)
        })
        .max_by_key(|&(delimiter, score)| (score, delimiter == b','))
        .filter(|&(_, score)| score.0 > 0)
        .map(|(delimiter, _)| delimiter)
        .unwrap_or(b',')
}

fn count_unquoted(line: &str, delimiter: char) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for c in line.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

// ============================================================================
// QIF
// ============================================================================

#[derive(Default)]
struct QifRecord {
    line: Option<usize>,
    date: Option<String>,
    amount: Option<String>,
    payee: Option<String>,
    memo: Option<String>,
    number: Option<String>,
    category: Option<String>,
}

impl QifRecord {
    fn into_row(self) -> Option<TableRow> {
        let line = self.line?;
        let memo = self.memo.unwrap_or_default();
        let payee = self
            .payee
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| memo.clone());
        Some(TableRow {
            line,
            cells: vec![
                self.date.map(|d| normalize_qif_date(&d)).unwrap_or_default(),
                self.amount.unwrap_or_default(),
                payee,
                memo,
                self.number.unwrap_or_default(),
                self.category.unwrap_or_default(),
            ],
        })
    }
}

fn decode_qif(text: &str) -> Table {
    let mut rows = Vec::new();
    let mut record = QifRecord::default();
    // `!Account` blocks describe accounts, not transactions
    let mut in_account_block = false;

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        if let Some(directive) = line.strip_prefix('!') {
            let directive = directive.to_ascii_lowercase();
            if directive.starts_with("account") {
                in_account_block = true;
            } else if directive.starts_with("type:") {
                in_account_block = false;
            }
            continue;
        }

        if line.starts_with('^') {
            let finished = std::mem::take(&mut record);
            if !in_account_block {
                rows.extend(finished.into_row());
            }
            continue;
        }

        if in_account_block {
            continue;
        }

        record.line.get_or_insert(index + 1);
        let mut chars = line.chars();
        let code = chars.next();
        let value = chars.as_str().trim().to_string();
        match code {
            Some('D') => record.date = Some(value),
            Some('T') => record.amount = Some(value),
            Some('U') => {
                record.amount.get_or_insert(value);
            }
            Some('P') => record.payee = Some(value),
            Some('M') => record.memo = Some(value),
            Some('N') => record.number = Some(value),
            Some('L') => record.category = Some(value),
            // Splits, addresses and cleared flags are not imported
            _ => {}
        }
    }

    if !in_account_block {
        rows.extend(record.into_row());
    }

    Table {
        kind: SourceKind::Qif,
        headers: QIF_HEADERS.iter().map(|h| h.to_string()).collect(),
        rows,
        headerless: false,
        preamble_rows: 0,
    }
}

/// Quicken dates: `1/15/2024`, `01/15/24`, `1/15'24`, `1/15' 4`
///
/// An apostrophe marks a 2000s year. Unparseable dates are passed through so
/// the row parser can report them.
fn normalize_qif_date(raw: &str) -> String {
    let apostrophe = raw.contains('\'');
    let cleaned: String = raw
        .trim()
        .replace('\'', "/")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let parts: Vec<&str> = cleaned.split(['/', '-', '.']).collect();
    if parts.len() != 3 {
        return raw.trim().to_string();
    }

    let numbers: Option<Vec<i32>> = parts.iter().map(|p| p.parse::<i32>().ok()).collect();
    let Some(numbers) = numbers else {
        return raw.trim().to_string();
    };

    let (year, month, day) = if parts[0].len() == 4 {
        (numbers[0], numbers[1], numbers[2])
    } else {
        let year = match numbers[2] {
            y if y >= 100 => y,
            y if apostrophe || y < 70 => 2000 + y,
            y => 1900 + y,
        };
        (year, numbers[0], numbers[1])
    };

    match (u32::try_from(month), u32::try_from(day)) {
        (Ok(m), Ok(d)) => NaiveDate::from_ymd_opt(year, m, d)
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| raw.trim().to_string()),
        _ => raw.trim().to_string(),
    }
}

// ============================================================================
// OFX / QFX
// ============================================================================

fn ofx_tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"(?i)<(DTPOSTED|TRNAMT|NAME|MEMO|FITID|TRNTYPE|CHECKNUM)>([^<\r\n]*)")
            .expect("OFX tag pattern is valid")
    })
}

fn decode_ofx(text: &str) -> Table {
    // ASCII uppercasing keeps byte offsets aligned with `text`
    let upper = text.to_ascii_uppercase();
    let starts: Vec<usize> = upper.match_indices("<STMTTRN>").map(|(i, _)| i).collect();

    let mut rows = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).copied().unwrap_or(text.len());
        if let Some(close) = upper[start..end].find("</BANKTRANLIST>") {
            end = start + close;
        }
        let block = &text[start..end];

        let mut fields: HashMap<String, String> = HashMap::new();
        for caps in ofx_tag_regex().captures_iter(block) {
            let tag = caps[1].to_ascii_uppercase();
            let value = decode_entities(caps[2].trim());
            fields.entry(tag).or_insert(value);
        }

        let field = |tag: &str| fields.get(tag).cloned().unwrap_or_default();
        let memo = field("MEMO");
        let name = Some(field("NAME"))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| memo.clone());

        rows.push(TableRow {
            line: text[..start].matches('\n').count() + 1,
            cells: vec![
                normalize_ofx_date(&field("DTPOSTED")),
                normalize_ofx_amount(&field("TRNAMT")),
                name,
                memo,
                field("FITID"),
                field("TRNTYPE"),
                field("CHECKNUM"),
            ],
        });
    }

    Table {
        kind: SourceKind::Ofx,
        headers: OFX_HEADERS.iter().map(|h| h.to_string()).collect(),
        rows,
        headerless: false,
        preamble_rows: 0,
    }
}

/// `20240115120000.000[-5:EST]` -> `2024-01-15`
fn normalize_ofx_date(raw: &str) -> String {
    raw.get(..8)
        .and_then(|digits| NaiveDate::parse_from_str(digits, "%Y%m%d").ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Some institutions write `TRNAMT` with a decimal comma
fn normalize_ofx_amount(raw: &str) -> String {
    if raw.contains(',') && !raw.contains('.') {
        raw.replace(',', ".")
    } else {
        raw.to_string()
    }
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
