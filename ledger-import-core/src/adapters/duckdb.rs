//! DuckDB import store
//!
//! Holds import sessions and imported transactions in a single DuckDB file.
//! Implements both persistence ports; every write runs inside one database
//! transaction so a failed batch leaves nothing behind.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::{params, params_from_iter, Connection};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{DateRange, ImportSession, SessionStatus, TransactionDraft};
use crate::ports::{ImportWrite, PersistenceReader, PersistenceWriter};
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

fn db_error(e: duckdb::Error) -> Error {
    Error::database(e.to_string())
}

const SESSION_COLUMNS: &str = "session_id, filename, format_id, account_source, \
     transaction_count, duplicate_count, total_amount::VARCHAR, date_start::VARCHAR, \
     date_end::VARCHAR, status, created_at::VARCHAR";

/// A transaction row as stored
#[derive(Debug, Clone, Serialize)]
pub struct StoredTransaction {
    pub id: Uuid,
    pub session_id: Uuid,
    pub source_row: usize,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub description: String,
    pub merchant: String,
    pub account_source: String,
    pub reference_id: Option<String>,
    pub category_hint: Option<String>,
    pub content_hash: String,
    pub duplicate_ordinal: i32,
    pub forced: bool,
}

/// DuckDB-backed import store
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbStore {
    /// Open (or create) the store at `db_path`
    ///
    /// Retries with exponential backoff while another process holds the file.
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        eprintln!(
                            "[ledger-import] Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow!("Failed to open database after {} retries", MAX_RETRIES)))
    }

    /// In-memory store, mostly for tests
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn try_open_connection(db_path: &Path) -> anyhow::Result<Connection> {
        // Extension autoloading stays off; nothing here needs an extension
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Lock poisoned: {}", e)))
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run database migrations using the MigrationService
    pub fn run_migrations(&self) -> anyhow::Result<MigrationResult> {
        let conn = self.lock()?;
        MigrationService::new(&conn).run_pending()
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> anyhow::Result<()> {
        self.run_migrations()?;
        Ok(())
    }

    // === Session queries ===

    /// All sessions, newest first
    pub fn list_sessions(&self) -> Result<Vec<ImportSession>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM import_sessions ORDER BY created_at DESC, session_id",
                SESSION_COLUMNS
            ))
            .map_err(db_error)?;
        let rows = stmt
            .query_map([], read_session_row)
            .map_err(db_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_error)?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    pub fn get_session(&self, id: &Uuid) -> Result<Option<ImportSession>> {
        let conn = self.lock()?;
        Self::find_session(&conn, id)
    }

    fn find_session(conn: &Connection, id: &Uuid) -> Result<Option<ImportSession>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM import_sessions WHERE session_id = ?",
                SESSION_COLUMNS
            ))
            .map_err(db_error)?;
        let mut rows = stmt
            .query_map([id.to_string()], read_session_row)
            .map_err(db_error)?;
        match rows.next() {
            Some(row) => row.map_err(db_error)?.into_session().map(Some),
            None => Ok(None),
        }
    }

    /// Stored transaction count, optionally for one session
    pub fn count_transactions(&self, session: Option<&Uuid>) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = match session {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM imported_transactions WHERE session_id = ?",
                [id.to_string()],
                |row| row.get(0),
            ),
            None => conn.query_row("SELECT COUNT(*) FROM imported_transactions", [], |row| {
                row.get(0)
            }),
        }
        .map_err(db_error)?;
        Ok(count as usize)
    }

    /// Transactions written by one session, in source row order
    pub fn session_transactions(&self, id: &Uuid) -> Result<Vec<StoredTransaction>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT transaction_id, session_id, source_row, transaction_date::VARCHAR,
                        amount::VARCHAR, description, merchant, account_source, reference_id,
                        category_hint, content_hash, duplicate_ordinal, forced
                 FROM imported_transactions WHERE session_id = ?
                 ORDER BY source_row, duplicate_ordinal",
            )
            .map_err(db_error)?;
        let rows = stmt
            .query_map([id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, i32>(11)?,
                    row.get::<_, bool>(12)?,
                ))
            })
            .map_err(db_error)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_error)?;

        rows.into_iter()
            .map(|r| {
                Ok(StoredTransaction {
                    id: parse_uuid(&r.0)?,
                    session_id: parse_uuid(&r.1)?,
                    source_row: r.2 as usize,
                    date: parse_date(&r.3)?,
                    amount: parse_decimal(&r.4)?,
                    description: r.5,
                    merchant: r.6,
                    account_source: r.7,
                    reference_id: r.8,
                    category_hint: r.9,
                    content_hash: r.10,
                    duplicate_ordinal: r.11,
                    forced: r.12,
                })
            })
            .collect()
    }

    /// Undo a confirmed import
    ///
    /// Deletes the session's transactions and marks the session rolled back.
    /// The session row is kept as an audit record.
    pub fn rollback_session(&self, id: &Uuid) -> Result<ImportSession> {
        let mut conn = self.lock()?;
        let session = Self::find_session(&conn, id)?
            .ok_or_else(|| Error::not_found(format!("import session {}", id)))?;
        if session.status == SessionStatus::RolledBack {
            return Err(Error::InvalidState(format!(
                "import session {} is already rolled back",
                id
            )));
        }

        let tx = conn.transaction().map_err(db_error)?;
        tx.execute(
            "DELETE FROM imported_transactions WHERE session_id = ?",
            [id.to_string()],
        )
        .map_err(db_error)?;
        tx.execute(
            "UPDATE import_sessions SET status = ?, rolled_back_at = CAST(? AS TIMESTAMP)
             WHERE session_id = ?",
            params![
                SessionStatus::RolledBack.as_str(),
                format_timestamp(&Utc::now()),
                id.to_string()
            ],
        )
        .map_err(db_error)?;
        tx.commit().map_err(db_error)?;

        Ok(ImportSession {
            status: SessionStatus::RolledBack,
            ..session
        })
    }

    fn hashes_in(&self, column: &str, hashes: &[String]) -> Result<HashSet<String>> {
        if hashes.is_empty() {
            return Ok(HashSet::new());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; hashes.len()].join(", ");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT DISTINCT {col} FROM imported_transactions WHERE {col} IN ({})",
                placeholders,
                col = column
            ))
            .map_err(db_error)?;
        let found = stmt
            .query_map(params_from_iter(hashes.iter()), |row| row.get::<_, String>(0))
            .map_err(db_error)?
            .collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(db_error)?;
        Ok(found)
    }
}

impl PersistenceReader for DuckDbStore {
    fn batch_hash_exists(&self, hashes: &[String]) -> Result<HashSet<String>> {
        self.hashes_in("content_hash", hashes)
    }

    fn batch_hash_exists_no_account(&self, hashes: &[String]) -> Result<HashSet<String>> {
        self.hashes_in("content_hash_no_account", hashes)
    }
}

impl PersistenceWriter for DuckDbStore {
    fn write_imports(&self, writes: &[ImportWrite]) -> Result<()> {
        let mut conn = self.lock()?;
        // Dropping the transaction without commit rolls everything back
        let tx = conn.transaction().map_err(db_error)?;
        for write in writes {
            insert_session(&tx, &write.session)?;
            for draft in &write.drafts {
                insert_draft(&tx, &write.session.id, draft)?;
            }
        }
        tx.commit().map_err(db_error)?;
        Ok(())
    }
}

fn insert_session(conn: &Connection, session: &ImportSession) -> Result<()> {
    conn.execute(
        "INSERT INTO import_sessions (session_id, filename, format_id, account_source,
            transaction_count, duplicate_count, total_amount, date_start, date_end, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, CAST(? AS DECIMAL(18, 2)), CAST(? AS DATE), CAST(? AS DATE), ?,
                 CAST(? AS TIMESTAMP))",
        params![
            session.id.to_string(),
            &session.filename,
            &session.format_id,
            &session.account_source,
            session.transaction_count as i64,
            session.duplicate_count as i64,
            session.total_amount.to_string(),
            session.date_range.map(|r| r.start.to_string()),
            session.date_range.map(|r| r.end.to_string()),
            SessionStatus::Completed.as_str(),
            format_timestamp(&session.created_at),
        ],
    )
    .map_err(db_error)?;
    Ok(())
}

/// Forced drafts take the next free ordinal for their hash, counting rows
/// inserted earlier in the same transaction. Everything else takes 0, so an
/// unforced second copy violates the unique constraint.
fn insert_draft(conn: &Connection, session_id: &Uuid, draft: &TransactionDraft) -> Result<()> {
    let ordinal: i32 = if draft.forced {
        let max: Option<i32> = conn
            .query_row(
                "SELECT MAX(duplicate_ordinal) FROM imported_transactions WHERE content_hash = ?",
                [&draft.content_hash],
                |row| row.get(0),
            )
            .map_err(db_error)?;
        max.map_or(0, |m| m + 1)
    } else {
        0
    };

    conn.execute(
        "INSERT INTO imported_transactions (transaction_id, session_id, source_row,
            transaction_date, amount, description, merchant, account_source, reference_id,
            category_hint, content_hash, content_hash_no_account, duplicate_ordinal, forced, created_at)
         VALUES (?, ?, ?, CAST(? AS DATE), CAST(? AS DECIMAL(18, 2)), ?, ?, ?, ?, ?, ?, ?, ?, ?,
                 CAST(? AS TIMESTAMP))",
        params![
            Uuid::new_v4().to_string(),
            session_id.to_string(),
            draft.row_number as i64,
            draft.date.to_string(),
            draft.amount.to_string(),
            &draft.description,
            &draft.merchant,
            &draft.account_source,
            &draft.reference_id,
            &draft.category_hint,
            &draft.content_hash,
            &draft.content_hash_no_account,
            ordinal,
            draft.forced,
            format_timestamp(&Utc::now()),
        ],
    )
    .map_err(db_error)?;
    Ok(())
}

/// Raw column values of an import_sessions row
struct SessionRow {
    id: String,
    filename: String,
    format_id: String,
    account_source: String,
    transaction_count: i64,
    duplicate_count: i64,
    total_amount: String,
    date_start: Option<String>,
    date_end: Option<String>,
    status: String,
    created_at: String,
}

fn read_session_row(row: &duckdb::Row<'_>) -> duckdb::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        filename: row.get(1)?,
        format_id: row.get(2)?,
        account_source: row.get(3)?,
        transaction_count: row.get(4)?,
        duplicate_count: row.get(5)?,
        total_amount: row.get(6)?,
        date_start: row.get(7)?,
        date_end: row.get(8)?,
        status: row.get(9)?,
        created_at: row.get(10)?,
    })
}

impl SessionRow {
    fn into_session(self) -> Result<ImportSession> {
        let date_range = match (self.date_start, self.date_end) {
            (Some(start), Some(end)) => Some(DateRange {
                start: parse_date(&start)?,
                end: parse_date(&end)?,
            }),
            _ => None,
        };
        Ok(ImportSession {
            id: parse_uuid(&self.id)?,
            filename: self.filename,
            format_id: self.format_id,
            account_source: self.account_source,
            transaction_count: self.transaction_count as usize,
            duplicate_count: self.duplicate_count as usize,
            total_amount: parse_decimal(&self.total_amount)?,
            date_range,
            status: SessionStatus::parse(&self.status)
                .ok_or_else(|| Error::database(format!("unknown session status {}", self.status)))?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

// Helper functions

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map(|dt| dt.and_utc())
        .map_err(|e| Error::database(format!("bad timestamp {:?}: {}", s, e)))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::database(format!("bad date {:?}: {}", s, e)))
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str_exact(s)
        .or_else(|_| Decimal::from_str(s))
        .map_err(|e| Error::database(format!("bad decimal {:?}: {}", s, e)))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::database(format!("bad uuid {:?}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DuplicateStatus, SessionMetadata};
    use crate::services::hashing::content_hashes;

    fn store() -> DuckDbStore {
        let store = DuckDbStore::open_in_memory().unwrap();
        store.ensure_schema().unwrap();
        store
    }

    fn draft(row: usize, day: u32, cents: i64, description: &str) -> TransactionDraft {
        let date = NaiveDate::from_ymd_opt(2024, 2, day).unwrap();
        let amount = Decimal::new(cents, 2);
        let (content_hash, content_hash_no_account) =
            content_hashes(date, amount, description, "checking");
        TransactionDraft {
            row_number: row,
            date,
            amount,
            description: description.to_string(),
            merchant: description.to_string(),
            account_source: "checking".to_string(),
            reference_id: None,
            category_hint: None,
            content_hash,
            content_hash_no_account,
            duplicate_status: DuplicateStatus::Unique,
            forced: false,
        }
    }

    fn session(drafts: &[TransactionDraft]) -> ImportSession {
        ImportSession::new(
            SessionMetadata {
                filename: "feb.csv".to_string(),
                format_id: "chase_checking".to_string(),
                account_source: "checking".to_string(),
            },
            drafts,
            0,
        )
    }

    #[test]
    fn test_write_and_lookup_hashes() {
        let store = store();
        let drafts = vec![draft(2, 1, -1250, "COFFEE"), draft(3, 2, 250000, "PAYROLL")];
        store.write_import(&drafts, &session(&drafts)).unwrap();

        let hashes = vec![drafts[0].content_hash.clone(), "missing".to_string()];
        let found = store.batch_hash_exists(&hashes).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains(&drafts[0].content_hash));

        let found = store
            .batch_hash_exists_no_account(&[drafts[1].content_hash_no_account.clone()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(store.batch_hash_exists(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_session_round_trip() {
        let store = store();
        let drafts = vec![draft(2, 3, -1999, "STREAMING"), draft(3, 9, -501, "SNACK")];
        let written = session(&drafts);
        store.write_import(&drafts, &written).unwrap();

        let stored = store.get_session(&written.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.transaction_count, 2);
        assert_eq!(stored.total_amount, Decimal::new(-2500, 2));
        let range = stored.date_range.unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 2, 3).unwrap());
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 2, 9).unwrap());

        let rows = store.session_transactions(&written.id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].amount, Decimal::new(-1999, 2));
        assert_eq!(rows[1].source_row, 3);
    }

    #[test]
    fn test_unforced_copy_rolls_back_whole_write() {
        let store = store();
        let first = vec![draft(2, 4, -800, "LUNCH")];
        store.write_import(&first, &session(&first)).unwrap();

        let second = vec![draft(2, 5, -100, "NEW"), draft(3, 4, -800, "LUNCH")];
        let result = store.write_import(&second, &session(&second));
        assert!(matches!(result, Err(Error::Database(_))));

        assert_eq!(store.count_transactions(None).unwrap(), 1);
        assert_eq!(store.list_sessions().unwrap().len(), 1);
    }

    #[test]
    fn test_forced_copies_take_next_ordinal() {
        let store = store();
        let mut drafts = vec![draft(2, 6, -300, "PARKING"), draft(3, 6, -300, "PARKING")];
        drafts[1].duplicate_status = DuplicateStatus::DuplicateWithinBatch;
        drafts[1].forced = true;
        store.write_import(&drafts, &session(&drafts)).unwrap();

        let mut again = vec![draft(2, 6, -300, "PARKING")];
        again[0].duplicate_status = DuplicateStatus::DuplicateSameAccount;
        again[0].forced = true;
        let later = session(&again);
        store.write_import(&again, &later).unwrap();

        let rows = store.session_transactions(&later.id).unwrap();
        assert_eq!(rows[0].duplicate_ordinal, 2);
        assert!(rows[0].forced);
        assert_eq!(store.count_transactions(None).unwrap(), 3);
    }

    #[test]
    fn test_rollback_session() {
        let store = store();
        let drafts = vec![draft(2, 7, -4200, "GROCERY")];
        let written = session(&drafts);
        store.write_import(&drafts, &written).unwrap();

        let rolled = store.rollback_session(&written.id).unwrap();
        assert_eq!(rolled.status, SessionStatus::RolledBack);
        assert_eq!(store.count_transactions(Some(&written.id)).unwrap(), 0);
        assert!(store
            .batch_hash_exists(&[drafts[0].content_hash.clone()])
            .unwrap()
            .is_empty());

        let again = store.rollback_session(&written.id);
        assert!(matches!(again, Err(Error::InvalidState(_))));
        assert!(matches!(
            store.rollback_session(&Uuid::new_v4()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_open_file_store_twice() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.duckdb");
        {
            let store = DuckDbStore::open(&path).unwrap();
            store.ensure_schema().unwrap();
            let drafts = vec![draft(2, 8, -100, "TOLL")];
            store.write_import(&drafts, &session(&drafts)).unwrap();
        }
        let store = DuckDbStore::open(&path).unwrap();
        let result = store.run_migrations().unwrap();
        assert!(result.applied.is_empty());
        assert_eq!(store.count_transactions(None).unwrap(), 1);
    }
}
