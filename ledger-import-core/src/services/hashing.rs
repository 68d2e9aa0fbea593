//! Content hashing for duplicate detection
//!
//! Two hashes identify a transaction's content:
//! - `content_hash`: date, amount, description and account source
//! - `content_hash_no_account`: the same without the account
//!
//! Inputs are normalized first so the same transaction hashes identically
//! across files: ISO date, amount rounded to cents, description trimmed with
//! internal whitespace collapsed. Case is preserved.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};

use crate::domain::amount::normalize_zero;
use crate::domain::result::Result;
use crate::domain::{FormatMapping, TransactionDraft};

/// ASCII unit separator; cannot appear in a normalized field
const FIELD_SEPARATOR: &str = "\u{1f}";

/// Collapse runs of whitespace to one space and trim the ends
pub fn normalize_description(description: &str) -> String {
    description.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Amount rounded half-away-from-zero to two places, never `-0.00`
pub fn normalize_amount(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{:.2}", normalize_zero(rounded))
}

/// SHA-256 content hash as 64 lowercase hex characters
///
/// With `account_source = None` this is the account-free hash used for
/// cross-account matching.
pub fn content_hash(
    date: NaiveDate,
    amount: Decimal,
    description: &str,
    account_source: Option<&str>,
) -> String {
    let date = date.format("%Y-%m-%d").to_string();
    let amount = normalize_amount(amount);
    let description = normalize_description(description);

    let mut fields = vec![date.as_str(), amount.as_str(), description.as_str()];
    if let Some(account) = account_source {
        fields.push(account.trim());
    }

    let mut hasher = Sha256::new();
    hasher.update(fields.join(FIELD_SEPARATOR).as_bytes());
    hex::encode(hasher.finalize())
}

/// Both hashes for one row: `(content_hash, content_hash_no_account)`
pub fn content_hashes(
    date: NaiveDate,
    amount: Decimal,
    description: &str,
    account_source: &str,
) -> (String, String) {
    (
        content_hash(date, amount, description, Some(account_source)),
        content_hash(date, amount, description, None),
    )
}

/// Fingerprint of a preview: the mapping plus every draft's hash and status
///
/// Confirm recomputes this and compares it with the digest the caller
/// reviewed; any difference means the preview is stale.
pub fn preview_digest(mapping: &FormatMapping, drafts: &[TransactionDraft]) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(mapping)?);
    for draft in drafts {
        hasher.update(FIELD_SEPARATOR.as_bytes());
        hasher.update(draft.row_number.to_string().as_bytes());
        hasher.update(FIELD_SEPARATOR.as_bytes());
        hasher.update(draft.content_hash.as_bytes());
        hasher.update(FIELD_SEPARATOR.as_bytes());
        hasher.update(draft.duplicate_status.as_str().as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[test]
    fn test_hash_is_deterministic_hex() {
        let a = content_hash(date(), Decimal::new(-1250, 2), "COFFEE SHOP", Some("checking"));
        let b = content_hash(date(), Decimal::new(-1250, 2), "COFFEE SHOP", Some("checking"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_whitespace_and_scale_are_normalized() {
        let a = content_hash(date(), Decimal::new(-125, 1), "  COFFEE   SHOP ", Some("checking"));
        let b = content_hash(date(), Decimal::new(-1250, 2), "COFFEE SHOP", Some("checking"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_case_is_preserved() {
        let upper = content_hash(date(), Decimal::ONE, "Coffee", None);
        let lower = content_hash(date(), Decimal::ONE, "coffee", None);
        assert_ne!(upper, lower);
    }

    #[test]
    fn test_account_changes_only_account_hash() {
        let (checking, checking_free) =
            content_hashes(date(), Decimal::new(-5000, 2), "TRANSFER", "checking");
        let (savings, savings_free) =
            content_hashes(date(), Decimal::new(-5000, 2), "TRANSFER", "savings");
        assert_ne!(checking, savings);
        assert_eq!(checking_free, savings_free);
    }

    #[test]
    fn test_negative_zero_hashes_like_zero() {
        let neg = content_hash(date(), -Decimal::ZERO, "FEE REVERSAL", None);
        let pos = content_hash(date(), Decimal::ZERO, "FEE REVERSAL", None);
        assert_eq!(neg, pos);
        assert_eq!(normalize_amount(Decimal::new(-1, 3)), "0.00");
    }

    #[test]
    fn test_preview_digest_tracks_mapping() {
        let mapping = FormatMapping::new("checking").description("Description");
        let first = preview_digest(&mapping, &[]).unwrap();
        assert_eq!(first, preview_digest(&mapping, &[]).unwrap());

        let renamed = FormatMapping::new("savings").description("Description");
        assert_ne!(first, preview_digest(&renamed, &[]).unwrap());
    }

    #[test]
    fn test_amount_rounding_to_cents() {
        assert_eq!(normalize_amount(Decimal::new(12345, 3)), "12.35");
        assert_eq!(normalize_amount(Decimal::new(-12345, 3)), "-12.35");
        assert_eq!(normalize_amount(Decimal::new(7, 0)), "7.00");
    }
}
