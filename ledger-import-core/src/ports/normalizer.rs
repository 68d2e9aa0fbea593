//! Merchant normalization hook

/// Turns a raw description into a merchant name
///
/// Alias rules and cleanup live behind this trait; the engine only calls it.
pub trait MerchantNormalizer: Send + Sync {
    fn normalize(&self, description: &str) -> String;
}

/// Uses the description unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityNormalizer;

impl MerchantNormalizer for IdentityNormalizer {
    fn normalize(&self, description: &str) -> String {
        description.to_string()
    }
}
