//! Payment Ledger
//!
//! Append-only, hash-chained record of confirmed invoice payments.
//!
//! # Architecture
//!
//! - **Ledger Store**: RocksDB table of entries with uniqueness indices on
//!   invoice and transaction hash
//! - **Chain Engine**: canonical hashing, serialized append, verification
//! - **Single Writer**: one actor task owns the write path
//!
//! # Invariants
//!
//! - Chain linkage: every entry's `previous_hash` is its predecessor's hash
//! - One entry per invoice, one entry per transaction hash
//! - Append-only: entries never modified or deleted
//! - Linearizable: at most one append extends any given tail

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use chain::ChainEngine;
pub use config::Config;
pub use crypto::{compute_transaction_hash, GENESIS_HASH};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use storage::{InvoiceStore, LedgerStore, Storage};
pub use types::{
    ChainVerification, EntrySelector, EntryVerification, IntegrityViolation, Invoice,
    InvoiceId, InvoiceStatus, LedgerEntry, LedgerId, PaymentConfirmation, TenantId,
};
