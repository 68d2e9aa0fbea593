//! Saved format store - user-named mappings kept outside the built-in table

use crate::domain::result::Result;
use crate::domain::FormatMapping;

pub trait SavedFormatStore: Send + Sync {
    /// Look up a saved mapping by its `format_id`
    fn lookup(&self, format_id: &str) -> Result<Option<FormatMapping>>;

    /// Save (or replace) a mapping under its `format_id`
    fn save(&self, mapping: &FormatMapping) -> Result<()>;

    /// All saved mappings, ordered by id
    fn list(&self) -> Result<Vec<FormatMapping>>;
}
