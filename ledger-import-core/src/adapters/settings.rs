//! Saved formats kept in settings.json

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::config::Config;
use crate::domain::result::{Error, Result};
use crate::domain::FormatMapping;
use crate::ports::SavedFormatStore;

/// `SavedFormatStore` over the `savedFormats` section of settings.json
pub struct SettingsFormatStore {
    data_dir: PathBuf,
    config: Mutex<Config>,
}

impl SettingsFormatStore {
    pub fn new(data_dir: &Path, config: Config) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            config: Mutex::new(config),
        }
    }

    /// Load settings.json from `data_dir`
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config = Config::load(data_dir).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self::new(data_dir, config))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Config>> {
        self.config
            .lock()
            .map_err(|e| Error::Config(format!("Lock poisoned: {}", e)))
    }
}

impl SavedFormatStore for SettingsFormatStore {
    fn lookup(&self, format_id: &str) -> Result<Option<FormatMapping>> {
        Ok(self.lock()?.saved_formats.get(format_id).cloned())
    }

    fn save(&self, mapping: &FormatMapping) -> Result<()> {
        if mapping.format_id.trim().is_empty() {
            return Err(Error::validation("saved format needs a non-empty id"));
        }
        let mut config = self.lock()?;
        config
            .saved_formats
            .insert(mapping.format_id.clone(), mapping.clone());
        config
            .save(&self.data_dir)
            .map_err(|e| Error::Config(e.to_string()))
    }

    fn list(&self) -> Result<Vec<FormatMapping>> {
        // BTreeMap keeps them ordered by id
        Ok(self.lock()?.saved_formats.values().cloned().collect())
    }
}
