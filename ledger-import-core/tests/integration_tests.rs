//! Integration tests for the import flow
//!
//! These tests drive `ImportService` end to end against a real DuckDB file
//! (and the in-memory store where a write failure has to be simulated).
//!
//! Run with: cargo test --test integration_tests -- --nocapture

use std::sync::Arc;
use tempfile::TempDir;

use rust_decimal::Decimal;

use ledger_import_core::adapters::{DuckDbStore, MemoryStore, SettingsFormatStore};
use ledger_import_core::domain::{DuplicateStatus, FormatMapping, RawFile, SignConvention};
use ledger_import_core::ports::SavedFormatStore;
use ledger_import_core::services::{
    BatchEntry, ConfirmRequest, FormatHint, ImportRequest, ImportService, ImportWorkflow,
    MappingOrigin, ResolutionTier, WorkflowState,
};
use ledger_import_core::Error;

// ============================================================================
// Test Helpers
// ============================================================================

/// Create a store with schema initialized
fn create_test_store(temp_dir: &TempDir) -> Arc<DuckDbStore> {
    let db_path = temp_dir.path().join("test.duckdb");
    let store = DuckDbStore::open(&db_path).expect("Failed to open store");
    store.ensure_schema().expect("Failed to initialize schema");
    Arc::new(store)
}

fn create_service(store: &Arc<DuckDbStore>) -> ImportService {
    ImportService::new(store.clone(), store.clone())
}

fn request(filename: &str, body: &str, account: &str) -> ImportRequest {
    ImportRequest::new(RawFile::new(filename, body.as_bytes().to_vec()), account)
}

const GENERIC_CSV: &str = "\
Date,Description,Amount
2024-01-02,COFFEE SHOP,-4.50
2024-01-03,PAYROLL ACME,2500.00
2024-01-05,GROCERY MART,-82.17
";

// ============================================================================
// Re-import Tests
// ============================================================================

/// Importing the same file twice writes every row exactly once
#[test]
fn test_reimport_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let req = request("jan.csv", GENERIC_CSV, "checking");
    let first = service.confirm(&ConfirmRequest::new(req.clone())).unwrap();
    assert_eq!(first.written, 3);
    assert_eq!(first.session.format_id, "inferred");

    let preview = service.preview(&req).unwrap();
    assert!(preview
        .drafts
        .iter()
        .all(|d| d.duplicate_status == DuplicateStatus::DuplicateSameAccount));
    assert_eq!(preview.summary.will_write, 0);

    let second = service.confirm(&ConfirmRequest::new(req)).unwrap();
    assert_eq!(second.written, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(store.count_transactions(None).unwrap(), 3);
    assert_eq!(store.list_sessions().unwrap().len(), 2);
}

/// Preview twice gives identical drafts and digests and writes nothing
#[test]
fn test_preview_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let req = request("jan.csv", GENERIC_CSV, "checking");
    let a = service.preview(&req).unwrap();
    let b = service.preview(&req).unwrap();

    assert_eq!(a.drafts, b.drafts);
    assert_eq!(a.digest, b.digest);
    assert_eq!(store.count_transactions(None).unwrap(), 0);
    assert!(store.list_sessions().unwrap().is_empty());
}

/// Overlapping statements only add the rows that are new
#[test]
fn test_overlapping_statement_adds_only_new_rows() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    service
        .confirm(&ConfirmRequest::new(request("jan.csv", GENERIC_CSV, "checking")))
        .unwrap();

    let overlapping = "\
Date,Description,Amount
2024-01-05,GROCERY MART,-82.17
2024-01-09,PHARMACY,-12.00
";
    let result = service
        .confirm(&ConfirmRequest::new(request("jan-b.csv", overlapping, "checking")))
        .unwrap();
    assert_eq!(result.written, 1);
    assert_eq!(result.skipped, 1);
    assert_eq!(store.count_transactions(None).unwrap(), 4);
}

// ============================================================================
// Within-file and cross-account Tests
// ============================================================================

/// Two identical rows in one file: the second is skipped unless forced
#[test]
fn test_identical_rows_within_file() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let body = "\
Date,Description,Amount
2024-02-01,PARKING GARAGE,-10.00
2024-02-01,PARKING GARAGE,-10.00
";
    let req = request("feb.csv", body, "checking");
    let preview = service.preview(&req).unwrap();
    assert_eq!(preview.drafts[0].duplicate_status, DuplicateStatus::Unique);
    assert_eq!(
        preview.drafts[1].duplicate_status,
        DuplicateStatus::DuplicateWithinBatch
    );
    assert_eq!(preview.summary.will_write, 1);

    let forced_row = preview.drafts[1].row_number;
    let result = service
        .confirm(
            &ConfirmRequest::new(req)
                .expecting(preview.digest)
                .force_rows([forced_row]),
        )
        .unwrap();
    assert_eq!(result.written, 2);

    let rows = store.session_transactions(&result.session.id).unwrap();
    let mut ordinals: Vec<i32> = rows.iter().map(|r| r.duplicate_ordinal).collect();
    ordinals.sort();
    assert_eq!(ordinals, vec![0, 1]);
}

/// The same purchase seen on a card statement and an Amex export
#[test]
fn test_cross_account_match_is_written_with_warning() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let chase = "\
Transaction Date,Post Date,Description,Category,Type,Amount
01/05/2024,01/06/2024,STARBUCKS,Food & Drink,Sale,-4.50
";
    let first = service
        .confirm(&ConfirmRequest::new(request("chase.csv", chase, "chase-card")))
        .unwrap();
    assert_eq!(first.session.format_id, "chase_credit_card");

    // Amex prints charges as positive magnitudes
    let amex = "\
Date,Description,Card Member,Account #,Amount
01/05/2024,STARBUCKS,J SMITH,XXXX-12345,4.50
";
    let req = request("amex.csv", amex, "amex");
    let preview = service.preview(&req).unwrap();
    assert_eq!(preview.drafts[0].amount, Decimal::new(-450, 2));
    assert_eq!(
        preview.drafts[0].duplicate_status,
        DuplicateStatus::DuplicateCrossAccount
    );

    let result = service.confirm(&ConfirmRequest::new(req)).unwrap();
    assert_eq!(result.written, 1);
    assert_eq!(result.cross_account_warnings, 1);
    assert_eq!(store.count_transactions(None).unwrap(), 2);
}

// ============================================================================
// Confirm Safety Tests
// ============================================================================

/// A failed write leaves no drafts and no session behind
#[test]
fn test_write_failure_is_atomic() {
    let store = Arc::new(MemoryStore::new());
    let service = ImportService::new(store.clone(), store.clone());
    store.fail_after(2);

    let err = service
        .confirm(&ConfirmRequest::new(request("jan.csv", GENERIC_CSV, "checking")))
        .unwrap_err();
    assert!(matches!(err, Error::Write { affected: 3, .. }));
    assert!(store.rows().unwrap().is_empty());
    assert!(store.sessions().unwrap().is_empty());
}

/// A unique violation in the middle of a DuckDB batch rolls back every file
#[test]
fn test_storage_conflict_rolls_back_batch() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    service
        .confirm(&ConfirmRequest::new(request("jan.csv", GENERIC_CSV, "checking")))
        .unwrap();

    // Written behind the service's back, so classification cannot see it
    let conflicting = "\
Date,Description,Amount
2024-03-01,RENT,-1500.00
";
    let raw_store = DuckDbStore::open_in_memory().unwrap();
    raw_store.ensure_schema().unwrap();
    let other_service = ImportService::new(Arc::new(raw_store), store.clone());

    let batch = [
        ConfirmRequest::new(request("new.csv", conflicting, "checking")),
        ConfirmRequest::new(request("jan.csv", GENERIC_CSV, "checking")),
    ];
    let err = other_service.confirm_batch(&batch).unwrap_err();
    assert!(matches!(err, Error::Write { affected: 4, .. }));

    assert_eq!(store.count_transactions(None).unwrap(), 3);
    assert_eq!(store.list_sessions().unwrap().len(), 1);
}

/// Confirm refuses a preview that no longer matches the stored data
#[test]
fn test_stale_preview_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let req = request("jan.csv", GENERIC_CSV, "checking");
    let preview = service.preview(&req).unwrap();

    // Another import lands between preview and confirm
    service
        .confirm(&ConfirmRequest::new(request("copy.csv", GENERIC_CSV, "checking")))
        .unwrap();

    let err = service
        .confirm(&ConfirmRequest::new(req).expecting(preview.digest))
        .unwrap_err();
    assert!(matches!(err, Error::StaleMapping { .. }));
    assert_eq!(store.count_transactions(None).unwrap(), 3);
}

/// Two confirms racing on the same file still store each row once
#[test]
fn test_concurrent_confirms_store_rows_once() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = Arc::new(create_service(&store));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                service.confirm(&ConfirmRequest::new(request("jan.csv", GENERIC_CSV, "checking")))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.iter().any(|r| r.is_ok()));
    for result in &results {
        if let Err(e) = result {
            assert!(matches!(e, Error::Write { .. }), "unexpected error: {}", e);
        }
    }
    assert_eq!(store.count_transactions(None).unwrap(), 3);
}

// ============================================================================
// Format Resolution Tests
// ============================================================================

/// The Running Bal. header selects the BofA mapping, not the balance column
#[test]
fn test_known_format_overrides_inference() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let body = "\
Date,Description,Amount,Running Bal.
01/01/2024,Beginning balance as of 01/01/2024,,1000.00
01/03/2024,GROCERY,-45.10,954.90
01/04/2024,PAYCHECK,1200.00,2154.90
";
    let preview = service.preview(&request("stmt.csv", body, "bofa")).unwrap();
    assert_eq!(preview.resolution.tier, ResolutionTier::AutoApplied);
    assert!(matches!(
        preview.resolution.origin,
        MappingOrigin::Detected { ref id, .. } if id == "bofa_checking"
    ));
    assert_eq!(preview.resolution.mapping.amount_column.as_deref(), Some("Amount"));
    assert_eq!(preview.drafts.len(), 2);
    assert!(preview.errors.is_empty());
    assert_eq!(preview.drafts[0].amount, Decimal::new(-4510, 2));
}

/// A BofA export that starts straight with transactions keeps its first row
#[test]
fn test_bofa_export_without_opening_row() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let body = "\
Date,Description,Amount,Running Bal.
01/02/2024,COFFEE,-4.50,995.50
01/03/2024,PAYROLL,2000.00,2995.50
01/04/2024,GROCERY,-60.25,2935.25
";
    let result = service
        .confirm(&ConfirmRequest::new(request("stmt.csv", body, "bofa")))
        .unwrap();
    assert_eq!(result.session.format_id, "bofa_checking");
    assert_eq!(result.written, 3);
    assert!(result.row_errors.is_empty());

    let stored = store.session_transactions(&result.session.id).unwrap();
    assert!(stored.iter().any(|tx| tx.description == "COFFEE"));
}

/// Semicolon exports with decimal commas keep their cents
#[test]
fn test_comma_decimal_amounts() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let body = "\
Datum;Omschrijving;Bedrag
15-01-2024;Bakker;-3,20
16-01-2024;Salaris;2500,00
17-01-2024;Huur;-1.234,56
";
    let mapping = FormatMapping::new("nl_bank")
        .date("Datum", "%d-%m-%Y")
        .amount("Bedrag", SignConvention::LeadingMinus)
        .description("Omschrijving");
    let preview = service
        .preview(&request("rekening.csv", body, "betaal").with_mapping(mapping))
        .unwrap();

    let amounts: Vec<Decimal> = preview.drafts.iter().map(|d| d.amount).collect();
    assert_eq!(
        amounts,
        vec![
            Decimal::new(-320, 2),
            Decimal::new(250000, 2),
            Decimal::new(-123456, 2)
        ]
    );
    assert_eq!(preview.summary.total_amount, Decimal::new(126224, 2));
}

/// A card export printing charges unsigned and payments in parentheses
#[test]
fn test_inverted_parentheses_card_export() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let body = "\
Date,Description,Amount
2024-02-01,BOOKSTORE,12.50
2024-02-03,PAYMENT THANK YOU,(100.00)
";
    let mapping = FormatMapping::new("card")
        .date("Date", "%Y-%m-%d")
        .amount("Amount", SignConvention::Parentheses)
        .description("Description")
        .inverted();
    let preview = service
        .preview(&request("card.csv", body, "visa").with_mapping(mapping))
        .unwrap();
    assert_eq!(preview.drafts[0].amount, Decimal::new(-1250, 2));
    assert_eq!(preview.drafts[1].amount, Decimal::new(10000, 2));
}

/// A weak detector match must be passed back explicitly before it is written
#[test]
fn test_partial_detection_requires_review() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    // Venmo export missing its "From" column
    let body = "\
ID,Datetime,Type,Status,Note,To,Amount (total)
3001,2024-01-05T10:00:00,Payment,Complete,Pizza night,Sam,- $12.00
3002,2024-01-06T18:30:00,Payment,Complete,Rent share,Alex,+ $450.00
";
    let req = request("venmo.csv", body, "venmo");
    let preview = service.preview(&req).unwrap();
    assert_eq!(preview.resolution.tier, ResolutionTier::Partial);
    assert!(preview.resolution.needs_review());
    assert!(preview.is_complete());
    assert_eq!(preview.drafts.len(), 2);

    let err = service
        .confirm(&ConfirmRequest::new(req.clone()).expecting(preview.digest.clone()))
        .unwrap_err();
    assert!(matches!(err, Error::NeedsReview { ref format_id } if format_id == "venmo"));
    assert_eq!(store.count_transactions(None).unwrap(), 0);

    // Reviewed: the suggested mapping comes back as the caller's own
    let reviewed = req.with_mapping(preview.resolution.mapping.clone());
    let result = service
        .confirm(&ConfirmRequest::new(reviewed).expecting(preview.digest))
        .unwrap();
    assert_eq!(result.written, 2);
    assert_eq!(store.count_transactions(None).unwrap(), 2);
}

/// Unlabeled columns are still recognized from their contents
#[test]
fn test_unlabeled_columns_are_inferred() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let body = "\
Col1,Col2,Col3
01/15/2024,(50.00),AMAZON MARKETPLACE
01/16/2024,1200.00,DIRECT DEPOSIT PAYROLL
01/17/2024,(12.34),CITY PARKING METER
01/18/2024,(3.99),APP STORE PURCHASE
";
    let preview = service.preview(&request("export.csv", body, "checking")).unwrap();
    assert_eq!(preview.resolution.tier, ResolutionTier::Inferred);
    assert!(preview.resolution.role_confidence["date"] >= 0.9);
    assert!(preview.resolution.role_confidence["amount"] >= 0.9);
    assert_eq!(preview.drafts[0].amount, Decimal::new(-5000, 2));
    assert_eq!(preview.drafts[1].amount, Decimal::new(120000, 2));
}

/// An unresolvable file previews with no drafts and refuses to confirm
#[test]
fn test_incomplete_detection_blocks_confirm() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let body = "\
Name,Notes
alpha,first
beta,second
";
    let req = request("notes.csv", body, "checking");
    let preview = service.preview(&req).unwrap();
    assert!(!preview.is_complete());
    assert!(preview.drafts.is_empty());
    assert!(preview.resolution.missing().contains(&"date".to_string()));

    let err = service.confirm(&ConfirmRequest::new(req)).unwrap_err();
    assert!(matches!(err, Error::FormatDetectionIncomplete { .. }));
}

/// A mapping saved on confirm is offered by id afterwards
#[test]
fn test_saved_format_is_reused() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let formats = Arc::new(SettingsFormatStore::load(temp_dir.path()).unwrap());
    let service = create_service(&store).with_format_store(formats);

    let body = "\
Posted,Memo,Value
15.01.2024,BAKERY,12.50-
16.01.2024,REFUND,3.00
";
    let mapping = FormatMapping::new("draft")
        .date("Posted", "%d.%m.%Y")
        .amount("Value", SignConvention::TrailingMinus)
        .description("Memo");
    let req = request("cu.csv", body, "credit-union").with_mapping(mapping);
    let result = service
        .confirm(&ConfirmRequest::new(req).save_format_as("credit_union"))
        .unwrap();
    assert_eq!(result.session.format_id, "credit_union");

    let later = "\
Posted,Memo,Value
17.01.2024,BOOKSHOP,20.00-
";
    let preview = service
        .preview(&request("cu-2.csv", later, "credit-union").with_format("credit_union"))
        .unwrap();
    assert!(matches!(preview.resolution.origin, MappingOrigin::Saved { .. }));
    assert_eq!(preview.drafts[0].amount, Decimal::new(-2000, 2));

    let reloaded = SettingsFormatStore::load(temp_dir.path()).unwrap();
    assert!(reloaded.lookup("credit_union").unwrap().is_some());
}

fn credit_union_request() -> ImportRequest {
    let body = "\
Posted,Memo,Value
15.01.2024,BAKERY,12.50-
16.01.2024,REFUND,3.00
";
    let mapping = FormatMapping::new("draft")
        .date("Posted", "%d.%m.%Y")
        .amount("Value", SignConvention::TrailingMinus)
        .description("Memo");
    request("cu.csv", body, "credit-union").with_mapping(mapping)
}

/// A format is only saved once its import has been written
#[test]
fn test_failed_write_does_not_save_format() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let formats = Arc::new(SettingsFormatStore::load(temp_dir.path()).unwrap());
    let service = ImportService::new(store.clone(), store.clone()).with_format_store(formats.clone());
    store.fail_after(1);

    let err = service
        .confirm(&ConfirmRequest::new(credit_union_request()).save_format_as("credit_union"))
        .unwrap_err();
    assert!(matches!(err, Error::Write { .. }));
    assert!(formats.lookup("credit_union").unwrap().is_none());
    let reloaded = SettingsFormatStore::load(temp_dir.path()).unwrap();
    assert!(reloaded.lookup("credit_union").unwrap().is_none());

    store.clear_failure();
    let result = service
        .confirm(&ConfirmRequest::new(credit_union_request()).save_format_as("credit_union"))
        .unwrap();
    assert_eq!(result.saved_format.as_deref(), Some("credit_union"));
    assert!(formats.lookup("credit_union").unwrap().is_some());
}

/// Built-in ids cannot be reused for saved formats
#[test]
fn test_save_format_rejects_builtin_id() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let formats = Arc::new(SettingsFormatStore::load(temp_dir.path()).unwrap());
    let service = create_service(&store).with_format_store(formats.clone());

    let err = service
        .confirm(&ConfirmRequest::new(credit_union_request()).save_format_as("amex"))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(formats.lookup("amex").unwrap().is_none());
    assert_eq!(store.count_transactions(None).unwrap(), 0);
}

// ============================================================================
// Batch Tests
// ============================================================================

/// A row repeated in a second file of the batch is counted once as cross-file
#[test]
fn test_batch_cross_file_duplicate() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let second = "\
Date,Description,Amount
2024-01-05,GROCERY MART,-82.17
2024-01-20,HARDWARE STORE,-19.99
";
    let requests = vec![
        request("a.csv", GENERIC_CSV, "checking"),
        request("b.csv", second, "checking"),
    ];
    let preview = service.preview_batch(&requests).unwrap();
    assert_eq!(preview.cross_file_duplicates, 1);
    let b = preview.entries[1].preview().unwrap();
    assert_eq!(b.drafts[0].duplicate_status, DuplicateStatus::DuplicateWithinBatch);

    let confirm: Vec<ConfirmRequest> = requests.into_iter().map(ConfirmRequest::new).collect();
    let batch = service.confirm_batch(&confirm).unwrap();
    assert_eq!(batch.results.len(), 2);
    assert_eq!(batch.results[0].written, 3);
    assert_eq!(batch.results[1].written, 1);
    assert_eq!(store.count_transactions(None).unwrap(), 4);
}

/// The same rows in one batch under two accounts are not batch duplicates
#[test]
fn test_batch_same_rows_for_two_accounts() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let requests = vec![
        request("checking.csv", GENERIC_CSV, "checking"),
        request("savings.csv", GENERIC_CSV, "savings"),
    ];
    let preview = service.preview_batch(&requests).unwrap();
    assert_eq!(preview.cross_file_duplicates, 0);
    let savings = preview.entries[1].preview().unwrap();
    assert!(savings
        .drafts
        .iter()
        .all(|d| d.duplicate_status == DuplicateStatus::Unique));

    let confirm: Vec<ConfirmRequest> = requests.into_iter().map(ConfirmRequest::new).collect();
    let batch = service.confirm_batch(&confirm).unwrap();
    assert_eq!(batch.results[0].written, 3);
    assert_eq!(batch.results[1].written, 3);
    assert_eq!(store.count_transactions(None).unwrap(), 6);
}

/// One unreadable file is reported without hiding its siblings
#[test]
fn test_batch_preview_reports_failed_file() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let requests = vec![
        request("a.csv", GENERIC_CSV, "checking"),
        request("empty.csv", "   \n", "checking"),
    ];
    let preview = service.preview_batch(&requests).unwrap();
    assert!(preview.entries[0].preview().is_some());
    assert!(matches!(
        &preview.entries[1],
        BatchEntry::Failed { kind, .. } if kind == "empty_file"
    ));

    let confirm: Vec<ConfirmRequest> = requests.into_iter().map(ConfirmRequest::new).collect();
    assert!(matches!(
        service.confirm_batch(&confirm),
        Err(Error::EmptyFile)
    ));
    assert_eq!(store.count_transactions(None).unwrap(), 0);
}

// ============================================================================
// Workflow and Session Tests
// ============================================================================

#[test]
fn test_workflow_states() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let mut workflow = ImportWorkflow::new(&service);
    assert_eq!(workflow.state(), WorkflowState::Collecting);
    assert!(matches!(workflow.confirm(), Err(Error::InvalidState(_))));

    workflow.add_file(request("jan.csv", GENERIC_CSV, "checking")).unwrap();
    workflow.preview().unwrap();
    assert_eq!(workflow.state(), WorkflowState::Previewed);

    // Remapping goes back to collecting
    workflow
        .remap(0, FormatHint::FormatId("bofa_checking".to_string()))
        .unwrap();
    assert_eq!(workflow.state(), WorkflowState::Collecting);
    workflow
        .remap(
            0,
            FormatHint::Explicit(
                FormatMapping::new("manual")
                    .date("Date", "%Y-%m-%d")
                    .amount("Amount", SignConvention::LeadingMinus)
                    .description("Description"),
            ),
        )
        .unwrap();
    workflow.preview().unwrap();

    let confirmation = workflow.confirm().unwrap();
    assert_eq!(confirmation.results[0].written, 3);
    assert_eq!(confirmation.results[0].session.format_id, "manual");
    assert_eq!(workflow.state(), WorkflowState::Confirmed);

    assert!(matches!(workflow.abandon(), Err(Error::InvalidState(_))));
    assert!(matches!(
        workflow.add_file(request("feb.csv", GENERIC_CSV, "checking")),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn test_abandoned_workflow_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let mut workflow = ImportWorkflow::new(&service);
    workflow.add_file(request("jan.csv", GENERIC_CSV, "checking")).unwrap();
    workflow.preview().unwrap();
    workflow.abandon().unwrap();

    assert_eq!(workflow.state(), WorkflowState::Abandoned);
    assert!(matches!(workflow.preview(), Err(Error::InvalidState(_))));
    assert_eq!(store.count_transactions(None).unwrap(), 0);
}

/// Rolling back a session makes its rows importable again
#[test]
fn test_rollback_allows_reimport() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let service = create_service(&store);

    let req = request("jan.csv", GENERIC_CSV, "checking");
    let first = service.confirm(&ConfirmRequest::new(req.clone())).unwrap();
    store.rollback_session(&first.session.id).unwrap();
    assert_eq!(store.count_transactions(None).unwrap(), 0);

    let again = service.confirm(&ConfirmRequest::new(req)).unwrap();
    assert_eq!(again.written, 3);
}
