//! In-memory import store
//!
//! Same contract as the DuckDB store, without a database: a write is staged
//! in full and only then swapped in. `fail_after` makes a write fail once a
//! given number of drafts has been staged, for exercising rollback paths.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::domain::result::{Error, Result};
use crate::domain::{ImportSession, SessionStatus, TransactionDraft};
use crate::ports::{ImportWrite, PersistenceReader, PersistenceWriter};

/// A stored draft with the ordinal it was written under
#[derive(Debug, Clone)]
pub struct StoredDraft {
    pub session_id: uuid::Uuid,
    pub draft: TransactionDraft,
    pub ordinal: u32,
}

#[derive(Default, Clone)]
struct State {
    rows: Vec<StoredDraft>,
    sessions: Vec<ImportSession>,
}

impl State {
    fn next_ordinal(&self, hash: &str) -> Option<u32> {
        self.rows
            .iter()
            .filter(|r| r.draft.content_hash == hash)
            .map(|r| r.ordinal + 1)
            .max()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_after: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every later write once `drafts` drafts of it have been staged
    pub fn fail_after(&self, drafts: usize) {
        if let Ok(mut limit) = self.fail_after.lock() {
            *limit = Some(drafts);
        }
    }

    pub fn clear_failure(&self) {
        if let Ok(mut limit) = self.fail_after.lock() {
            *limit = None;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }

    pub fn rows(&self) -> Result<Vec<StoredDraft>> {
        Ok(self.lock()?.rows.clone())
    }

    pub fn sessions(&self) -> Result<Vec<ImportSession>> {
        Ok(self.lock()?.sessions.clone())
    }

    fn limit(&self) -> Option<usize> {
        self.fail_after.lock().ok().and_then(|l| *l)
    }
}

impl PersistenceReader for MemoryStore {
    fn batch_hash_exists(&self, hashes: &[String]) -> Result<HashSet<String>> {
        let state = self.lock()?;
        let stored: HashSet<&str> = state.rows.iter().map(|r| r.draft.content_hash.as_str()).collect();
        Ok(hashes
            .iter()
            .filter(|h| stored.contains(h.as_str()))
            .cloned()
            .collect())
    }

    fn batch_hash_exists_no_account(&self, hashes: &[String]) -> Result<HashSet<String>> {
        let state = self.lock()?;
        let stored: HashSet<&str> = state
            .rows
            .iter()
            .map(|r| r.draft.content_hash_no_account.as_str())
            .collect();
        Ok(hashes
            .iter()
            .filter(|h| stored.contains(h.as_str()))
            .cloned()
            .collect())
    }
}

impl PersistenceWriter for MemoryStore {
    fn write_imports(&self, writes: &[ImportWrite]) -> Result<()> {
        let limit = self.limit();
        let mut state = self.lock()?;
        let mut staged = state.clone();
        let mut staged_count = 0;
        let total: usize = writes.iter().map(|w| w.drafts.len()).sum();

        for write in writes {
            let mut session = write.session.clone();
            session.status = SessionStatus::Completed;
            staged.sessions.push(session);

            for draft in &write.drafts {
                if limit.is_some_and(|n| staged_count >= n) {
                    return Err(Error::write("simulated storage failure", total));
                }
                let ordinal = if draft.forced {
                    staged.next_ordinal(&draft.content_hash).unwrap_or(0)
                } else {
                    if staged.next_ordinal(&draft.content_hash).is_some() {
                        return Err(Error::database(format!(
                            "content hash {} already stored",
                            draft.content_hash
                        )));
                    }
                    0
                };
                staged.rows.push(StoredDraft {
                    session_id: write.session.id,
                    draft: draft.clone(),
                    ordinal,
                });
                staged_count += 1;
            }
        }

        *state = staged;
        Ok(())
    }
}
