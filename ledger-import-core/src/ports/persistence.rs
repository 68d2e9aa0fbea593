//! Persistence ports - hash lookups and atomic writes

use std::collections::HashSet;

use crate::domain::result::Result;
use crate::domain::{ImportSession, TransactionDraft};

/// Read side used by duplicate detection
///
/// Both lookups take the whole set of hashes at once and must answer with a
/// single round trip. Implementations return the subset that already exists.
pub trait PersistenceReader: Send + Sync {
    /// Which of these account-scoped content hashes are already stored
    fn batch_hash_exists(&self, hashes: &[String]) -> Result<HashSet<String>>;

    /// Which of these account-free content hashes are already stored, for any account
    fn batch_hash_exists_no_account(&self, hashes: &[String]) -> Result<HashSet<String>>;
}

/// One file's worth of drafts together with its session record
#[derive(Debug, Clone)]
pub struct ImportWrite {
    pub session: ImportSession,
    pub drafts: Vec<TransactionDraft>,
}

/// Write side used by Confirm
pub trait PersistenceWriter: Send + Sync {
    /// Persist every draft and session in `writes`, or none of them
    ///
    /// On error nothing may remain visible. Stored sessions are marked
    /// completed.
    fn write_imports(&self, writes: &[ImportWrite]) -> Result<()>;

    /// Persist one file's drafts and session atomically
    fn write_import(&self, drafts: &[TransactionDraft], session: &ImportSession) -> Result<()> {
        self.write_imports(&[ImportWrite {
            session: session.clone(),
            drafts: drafts.to_vec(),
        }])
    }
}
