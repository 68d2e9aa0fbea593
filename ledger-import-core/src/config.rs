//! Configuration management
//!
//! Settings live in `settings.json` in the data directory:
//! ```json
//! {
//!   "import": { "autoApplyThreshold": 0.7, "partialThreshold": 0.4, ... },
//!   "savedFormats": { "my_credit_union": { "formatId": "my_credit_union", ... } }
//! }
//! ```
//! Fields this crate does not manage are kept when saving.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::FormatMapping;

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    import: ImportSettings,
    #[serde(default)]
    saved_formats: BTreeMap<String, FormatMapping>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Tunables for detection, inference and batch processing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportSettings {
    /// Detector score at or above which a known mapping is applied as-is
    pub auto_apply_threshold: f64,
    /// Detector score at or above which a known mapping is offered for review
    pub partial_threshold: f64,
    /// Minimum confidence for inference to assign a role
    pub role_min_confidence: f64,
    /// Rows examined by detectors and inference
    pub sample_rows: usize,
    /// Decode and parse batch files on separate threads
    pub parallel_batch: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            auto_apply_threshold: 0.7,
            partial_threshold: 0.4,
            role_min_confidence: 0.5,
            sample_rows: 50,
            parallel_batch: true,
        }
    }
}

/// Configuration (simplified view of settings)
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub import: ImportSettings,
    pub saved_formats: BTreeMap<String, FormatMapping>,
    // Keep the raw settings for preservation when saving
    _raw_settings: SettingsFile,
}

impl Config {
    /// Load config from the data directory
    ///
    /// Batch parallelism can be overridden with LEDGER_IMPORT_PARALLEL.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let settings_path = data_dir.join("settings.json");

        let raw: SettingsFile = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str(&content)?
        } else {
            SettingsFile::default()
        };

        let mut import = raw.import.clone();
        match std::env::var("LEDGER_IMPORT_PARALLEL").ok().as_deref() {
            Some("true" | "1" | "yes" | "TRUE" | "YES") => import.parallel_batch = true,
            Some("false" | "0" | "no" | "FALSE" | "NO") => import.parallel_batch = false,
            _ => {}
        }

        Ok(Self {
            import,
            saved_formats: raw.saved_formats.clone(),
            _raw_settings: raw,
        })
    }

    /// Save config to the data directory
    /// Preserves other settings this crate doesn't manage
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let settings_path = data_dir.join("settings.json");

        let mut settings = if settings_path.exists() {
            let content = std::fs::read_to_string(&settings_path)?;
            serde_json::from_str::<SettingsFile>(&content).unwrap_or_default()
        } else {
            self._raw_settings.clone()
        };

        settings.saved_formats = self.saved_formats.clone();

        std::fs::create_dir_all(data_dir)?;
        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SignConvention;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.import.auto_apply_threshold, 0.7);
        assert_eq!(config.import.partial_threshold, 0.4);
        assert!(config.saved_formats.is_empty());
    }

    #[test]
    fn test_partial_import_settings_fill_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"import": {"autoApplyThreshold": 0.8}}"#,
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.import.auto_apply_threshold, 0.8);
        assert_eq!(config.import.sample_rows, 50);
    }

    #[test]
    fn test_save_preserves_unmanaged_fields() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"theme": "dark", "import": {"sampleRows": 20}}"#,
        )
        .unwrap();

        let mut config = Config::load(dir.path()).unwrap();
        let mapping = FormatMapping::new("credit_union")
            .date("Posted", "%m/%d/%Y")
            .amount("Amt", SignConvention::Parentheses)
            .description("Memo");
        config
            .saved_formats
            .insert(mapping.format_id.clone(), mapping.clone());
        config.save(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["theme"], "dark");
        assert_eq!(json["import"]["sampleRows"], 20);

        let reloaded = Config::load(dir.path()).unwrap();
        assert_eq!(reloaded.saved_formats.get("credit_union"), Some(&mapping));
    }
}
