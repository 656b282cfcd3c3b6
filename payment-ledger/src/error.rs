//! Error types for the payment ledger

use crate::types::{InvoiceId, InvoiceStatus};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Integrity violations found during verification are not errors; they are
/// reported through [`crate::types::IntegrityViolation`].
#[derive(Error, Debug)]
pub enum Error {
    /// The invoice already has a ledger entry
    #[error("Ledger entry already exists for invoice_id={invoice_id}")]
    DuplicateLedgerEntry {
        /// Invoice that was already recorded
        invoice_id: InvoiceId,
    },

    /// The chain tail changed between the tail read and the insert
    #[error("Chain tail moved: expected previous_hash {expected}, current tail is {actual}")]
    TailMoved {
        /// previous_hash the insert was computed against
        expected: String,
        /// Tail hash found at commit time
        actual: String,
    },

    /// Two different payloads produced the same transaction hash
    #[error("Transaction hash already recorded: {0}")]
    DuplicateTransactionHash(String),

    /// Entry rejected before reaching storage
    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    /// Invoice not found
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(InvoiceId),

    /// Confirmed amount differs from the billed amount
    #[error("Amount mismatch: invoice amount is {expected}, received {received}")]
    AmountMismatch {
        /// Billed amount
        expected: Decimal,
        /// Amount reported by the payment workflow
        received: Decimal,
    },

    /// Invoice status transition not supported by the ledger
    #[error("Invalid invoice status transition for invoice {invoice_id}: {from} -> {to}")]
    InvalidTransition {
        /// Invoice being updated
        invoice_id: InvoiceId,
        /// Stored status
        from: InvoiceStatus,
        /// Requested status
        to: InvoiceStatus,
    },

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the error means "this invoice is already recorded".
    ///
    /// Payment workflows treat this as an idempotent success.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateLedgerEntry { .. })
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
