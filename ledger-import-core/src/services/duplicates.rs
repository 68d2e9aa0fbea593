//! Duplicate detection
//!
//! Classification runs in two passes over the whole set of drafts:
//! 1. within the batch: a draft whose `content_hash` was already seen earlier
//!    (in this file or an earlier file of the batch) is a batch duplicate
//! 2. against storage: one lookup for account-scoped hashes and one for
//!    account-free hashes, covering every remaining draft
//!
//! Pass 1 wins over pass 2. A cross-account match is only a warning.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::domain::result::Result;
use crate::domain::{DuplicateStatus, TransactionDraft};
use crate::ports::PersistenceReader;

/// Counts per classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateCounts {
    pub unique: usize,
    pub same_account: usize,
    pub cross_account: usize,
    pub within_batch: usize,
    /// Batch duplicates whose first occurrence is in a different file
    pub cross_file: usize,
}

impl DuplicateCounts {
    pub fn tally(drafts: &[TransactionDraft]) -> Self {
        let mut counts = Self::default();
        for draft in drafts {
            match draft.duplicate_status {
                DuplicateStatus::Unique => counts.unique += 1,
                DuplicateStatus::DuplicateSameAccount => counts.same_account += 1,
                DuplicateStatus::DuplicateCrossAccount => counts.cross_account += 1,
                DuplicateStatus::DuplicateWithinBatch => counts.within_batch += 1,
            }
        }
        counts
    }
}

pub struct DuplicateDetector {
    reader: Arc<dyn PersistenceReader>,
}

impl DuplicateDetector {
    pub fn new(reader: Arc<dyn PersistenceReader>) -> Self {
        Self { reader }
    }

    /// Classify the drafts of a single file in place
    pub fn classify(&self, drafts: &mut [TransactionDraft]) -> Result<()> {
        self.classify_groups(&mut [drafts]).map(|_| ())
    }

    /// Classify the drafts of several files as one pool
    ///
    /// Files are taken in order and rows in row order, so the first
    /// occurrence of a hash always stays unique. Returns how many batch
    /// duplicates were first seen in another file.
    pub fn classify_batches(&self, files: &mut [Vec<TransactionDraft>]) -> Result<usize> {
        let mut groups: Vec<&mut [TransactionDraft]> =
            files.iter_mut().map(|f| f.as_mut_slice()).collect();
        self.classify_groups(&mut groups)
    }

    fn classify_groups(&self, groups: &mut [&mut [TransactionDraft]]) -> Result<usize> {
        // Pass 1: first seen wins; remember which file it was seen in
        let mut first_seen: std::collections::HashMap<String, usize> = Default::default();
        let mut cross_file = 0;
        for (file_index, drafts) in groups.iter_mut().enumerate() {
            for draft in drafts.iter_mut() {
                match first_seen.get(&draft.content_hash) {
                    Some(&seen_in) => {
                        draft.duplicate_status = DuplicateStatus::DuplicateWithinBatch;
                        if seen_in != file_index {
                            cross_file += 1;
                        }
                    }
                    None => {
                        first_seen.insert(draft.content_hash.clone(), file_index);
                        draft.duplicate_status = DuplicateStatus::Unique;
                    }
                }
            }
        }

        // Pass 2: one round trip per hash kind for the whole pool
        let candidates = || {
            groups
                .iter()
                .flat_map(|drafts| drafts.iter())
                .filter(|d| d.duplicate_status == DuplicateStatus::Unique)
        };
        let hashes: Vec<String> = dedup(candidates().map(|d| d.content_hash.clone()));
        let hashes_no_account: Vec<String> =
            dedup(candidates().map(|d| d.content_hash_no_account.clone()));

        if hashes.is_empty() {
            return Ok(cross_file);
        }
        let existing = self.reader.batch_hash_exists(&hashes)?;
        let existing_no_account = self.reader.batch_hash_exists_no_account(&hashes_no_account)?;

        for drafts in groups.iter_mut() {
            for draft in drafts
                .iter_mut()
                .filter(|d| d.duplicate_status == DuplicateStatus::Unique)
            {
                if existing.contains(&draft.content_hash) {
                    draft.duplicate_status = DuplicateStatus::DuplicateSameAccount;
                } else if existing_no_account.contains(&draft.content_hash_no_account) {
                    draft.duplicate_status = DuplicateStatus::DuplicateCrossAccount;
                }
            }
        }

        Ok(cross_file)
    }
}

fn dedup(hashes: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    hashes.filter(|h| seen.insert(h.clone())).collect()
}
