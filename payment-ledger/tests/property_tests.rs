//! Property-based tests for ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Determinism: same payload → same hash
//! - Chain linkage: every entry points at its predecessor
//! - Uniqueness: one entry per invoice
//! - Tamper evidence: editing a billed amount breaks verification

use chrono::{DateTime, TimeZone, Utc};
use payment_ledger::{
    crypto::{canonical_amount, is_transaction_hash},
    compute_transaction_hash, ChainEngine, Config, EntrySelector, IntegrityViolation, Invoice,
    InvoiceStore, Ledger, LedgerStore, Storage, GENESIS_HASH,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Strategy for generating billed amounts (positive, cent precision)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000_00i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Strategy for generating microsecond-precision UTC timestamps
fn timestamp_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (1_600_000_000i64..1_900_000_000i64, 0u32..1_000_000u32)
        .prop_map(|(secs, micros)| Utc.timestamp_opt(secs, micros * 1_000).unwrap())
}

/// Create test engine with temp directory
fn create_test_engine() -> (ChainEngine<Storage>, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.rocksdb.sync_writes = false;

    let storage = Arc::new(Storage::open(&config).unwrap());
    (ChainEngine::new(storage), temp_dir)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: hashing is deterministic and well-formed
    #[test]
    fn prop_hash_deterministic(
        invoice_id in any::<u64>(),
        tenant_id in any::<u64>(),
        amount in amount_strategy(),
        timestamp in timestamp_strategy(),
    ) {
        let h1 = compute_transaction_hash(invoice_id, tenant_id, &amount, &timestamp);
        let h2 = compute_transaction_hash(invoice_id, tenant_id, &amount, &timestamp);
        prop_assert_eq!(&h1, &h2);
        prop_assert!(is_transaction_hash(&h1));
    }

    /// Property: cent-precision amounts render exactly
    #[test]
    fn prop_amount_renders_cents(cents in 0i64..100_000_000_000i64) {
        let rendered = canonical_amount(&Decimal::new(cents, 2));
        prop_assert_eq!(rendered, format!("{}.{:02}", cents / 100, cents % 100));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: appended entries form a single linked chain
    #[test]
    fn prop_chain_linkage(amounts in prop::collection::vec(amount_strategy(), 1..20)) {
        let (engine, _temp) = create_test_engine();

        let mut entries = Vec::new();
        for (i, amount) in amounts.iter().enumerate() {
            let invoice_id = i as u64 + 1;
            engine.store().put_invoice(&Invoice::new(invoice_id, invoice_id % 3, *amount)).unwrap();
            let confirmation = engine.confirm_payment(invoice_id, *amount, None).unwrap();
            prop_assert!(confirmation.is_new());
            entries.push(engine.store().find_by_invoice(invoice_id).unwrap().unwrap());
        }

        prop_assert_eq!(entries[0].previous_hash.as_str(), GENESIS_HASH);
        for pair in entries.windows(2) {
            prop_assert_eq!(&pair[1].previous_hash, &pair[0].transaction_hash);
            prop_assert!(pair[1].id > pair[0].id);
        }

        let report = engine.verify_full_chain().unwrap();
        prop_assert!(report.valid, "{}", report.reason);
        prop_assert_eq!(report.entries_checked, amounts.len() as u64);
    }

    /// Property: a second append for the same invoice never creates a row
    #[test]
    fn prop_duplicate_rejected(amount in amount_strategy(), retries in 1usize..5) {
        let (engine, _temp) = create_test_engine();

        let first = engine.append_payment_record(9, 4, amount, None).unwrap();
        for _ in 0..retries {
            let err = engine.append_payment_record(9, 4, amount, None).unwrap_err();
            prop_assert!(err.is_duplicate());
        }

        let entries = engine.store().list_ordered().unwrap();
        prop_assert_eq!(entries.len(), 1);
        prop_assert_eq!(&entries[0].transaction_hash, &first.transaction_hash);
    }

    /// Property: editing any paid amount is caught at exactly that entry
    #[test]
    fn prop_tamper_detected(
        amounts in prop::collection::vec(amount_strategy(), 2..12),
        victim_seed in any::<usize>(),
        delta_cents in 1i64..10_000i64,
    ) {
        let (engine, _temp) = create_test_engine();

        for (i, amount) in amounts.iter().enumerate() {
            let invoice_id = i as u64 + 1;
            engine.store().put_invoice(&Invoice::new(invoice_id, 1, *amount)).unwrap();
            engine.confirm_payment(invoice_id, *amount, None).unwrap();
        }

        let victim = victim_seed % amounts.len();
        let victim_invoice = victim as u64 + 1;
        let mut invoice = engine.store().get_invoice(victim_invoice).unwrap().unwrap();
        invoice.amount += Decimal::new(delta_cents, 2);
        engine.store().put_invoice(&invoice).unwrap();

        let entry_report = engine
            .verify_ledger_entry(EntrySelector::InvoiceId(victim_invoice))
            .unwrap();
        prop_assert!(!entry_report.valid);
        let is_hash_mismatch = matches!(
            entry_report.violation,
            Some(IntegrityViolation::HashMismatch { .. })
        );
        prop_assert!(is_hash_mismatch);

        let chain_report = engine.verify_full_chain().unwrap();
        prop_assert!(!chain_report.valid);
        prop_assert_eq!(chain_report.entries_checked, victim as u64);
    }

    /// Property: confirmations through the async writer keep the chain valid
    #[test]
    fn prop_async_confirmations_valid(amounts in prop::collection::vec(amount_strategy(), 1..10)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let temp_dir = tempfile::tempdir().unwrap();
            let mut config = Config::default();
            config.data_dir = temp_dir.path().to_path_buf();
            config.rocksdb.sync_writes = false;
            let ledger = Ledger::open(config).await.unwrap();

            for (i, amount) in amounts.iter().enumerate() {
                let invoice_id = i as u64 + 100;
                ledger.put_invoice(&Invoice::new(invoice_id, 2, *amount)).unwrap();
                ledger.confirm_payment(invoice_id, *amount, None).await.unwrap();
            }

            let report = ledger.verify_full_chain().unwrap();
            prop_assert!(report.valid);
            prop_assert_eq!(report.entries_checked, amounts.len() as u64);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}
