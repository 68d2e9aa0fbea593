//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external collaborators. The import engine
//! depends only on these traits, not on concrete implementations.

mod format_store;
mod normalizer;
mod persistence;

pub use format_store::SavedFormatStore;
pub use normalizer::{IdentityNormalizer, MerchantNormalizer};
pub use persistence::{ImportWrite, PersistenceReader, PersistenceWriter};
