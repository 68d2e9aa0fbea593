//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for PersistenceReader/PersistenceWriter
//! - An in-memory store with the same contract
//! - settings.json for SavedFormatStore

pub mod duckdb;
pub mod memory;
pub mod settings;

pub use self::duckdb::{DuckDbStore, StoredTransaction};
pub use memory::{MemoryStore, StoredDraft};
pub use settings::SettingsFormatStore;
