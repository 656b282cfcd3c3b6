//! Core types for the payment ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact storage of billed amounts (Decimal)
//! - UTC timestamps at microsecond precision

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned ledger sequence number (first entry is 1)
pub type LedgerId = u64;

/// Invoice identifier from the billing layer
pub type InvoiceId = u64;

/// Tenant identifier from the billing layer
pub type TenantId = u64;

/// Immutable record of one confirmed payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Sequence number, defines chain order
    pub id: LedgerId,

    /// Invoice this payment settles (unique across the ledger)
    pub invoice_id: InvoiceId,

    /// SHA-256 hex of the canonical payload
    pub transaction_hash: String,

    /// Hash of the preceding entry, or the genesis sentinel
    pub previous_hash: String,

    /// Creation instant, part of the hashed payload
    pub timestamp: DateTime<Utc>,
}

impl LedgerEntry {
    /// Whether this entry opened the chain
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == crate::crypto::GENESIS_HASH
    }
}

/// Entry computed by the chain engine, not yet assigned an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Invoice this payment settles
    pub invoice_id: InvoiceId,
    /// Precomputed transaction hash
    pub transaction_hash: String,
    /// Tail hash observed when the entry was built
    pub previous_hash: String,
    /// Hashed timestamp
    pub timestamp: DateTime<Utc>,
}

impl PendingEntry {
    /// Attach the id assigned by the store
    pub fn into_entry(self, id: LedgerId) -> LedgerEntry {
        LedgerEntry {
            id,
            invoice_id: self.invoice_id,
            transaction_hash: self.transaction_hash,
            previous_hash: self.previous_hash,
            timestamp: self.timestamp,
        }
    }
}

/// Invoice payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvoiceStatus {
    /// Billed, not yet paid
    Pending,
    /// Paid; a ledger entry exists
    Paid,
    /// Past due and unpaid
    Overdue,
}

impl InvoiceStatus {
    /// Wire/database spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice as seen by the ledger (billing fields only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice ID
    pub id: InvoiceId,
    /// Billed tenant
    pub tenant_id: TenantId,
    /// Billed amount
    pub amount: Decimal,
    /// Payment status
    pub status: InvoiceStatus,
}

impl Invoice {
    /// New pending invoice
    pub fn new(id: InvoiceId, tenant_id: TenantId, amount: Decimal) -> Self {
        Self {
            id,
            tenant_id,
            amount,
            status: InvoiceStatus::Pending,
        }
    }

    /// Mark the invoice as paid
    pub fn mark_as_paid(&mut self) {
        self.status = InvoiceStatus::Paid;
    }

    /// Check if invoice is paid
    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }
}

/// How to locate a single ledger entry for verification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySelector {
    /// By ledger sequence number
    LedgerId(LedgerId),
    /// By the invoice it records
    InvoiceId(InvoiceId),
}

impl fmt::Display for EntrySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntrySelector::LedgerId(id) => write!(f, "ledger_id={}", id),
            EntrySelector::InvoiceId(id) => write!(f, "invoice_id={}", id),
        }
    }
}

/// Integrity problem detected during verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    /// No entry matches the selector
    EntryNotFound(EntrySelector),

    /// The entry's invoice no longer resolves
    MissingInvoiceReference {
        /// Offending entry
        ledger_id: LedgerId,
        /// Dangling invoice reference
        invoice_id: InvoiceId,
    },

    /// Recomputed hash differs from the stored one
    HashMismatch {
        /// Offending entry
        ledger_id: LedgerId,
        /// Stored transaction_hash
        stored: String,
        /// Hash recomputed from the invoice
        computed: String,
    },

    /// Non-genesis entry has no predecessor
    PreviousLinkNotFound {
        /// Offending entry
        ledger_id: LedgerId,
    },

    /// previous_hash does not match the predecessor's hash
    ChainBreak {
        /// Offending entry
        ledger_id: LedgerId,
        /// Hash the link should carry
        expected: String,
        /// Hash the entry carries
        found: String,
    },
}

impl IntegrityViolation {
    /// Ledger id the violation was found at, if an entry was located
    pub fn ledger_id(&self) -> Option<LedgerId> {
        match self {
            IntegrityViolation::EntryNotFound(_) => None,
            IntegrityViolation::MissingInvoiceReference { ledger_id, .. }
            | IntegrityViolation::HashMismatch { ledger_id, .. }
            | IntegrityViolation::PreviousLinkNotFound { ledger_id }
            | IntegrityViolation::ChainBreak { ledger_id, .. } => Some(*ledger_id),
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityViolation::EntryNotFound(selector) => {
                write!(f, "entry not found ({})", selector)
            }
            IntegrityViolation::MissingInvoiceReference {
                ledger_id,
                invoice_id,
            } => write!(
                f,
                "invoice not found for ledger id={} (invoice_id={})",
                ledger_id, invoice_id
            ),
            IntegrityViolation::HashMismatch {
                ledger_id,
                stored,
                computed,
            } => write!(
                f,
                "hash mismatch at ledger id={}: stored={}..., computed={}...",
                ledger_id,
                short(stored),
                short(computed)
            ),
            IntegrityViolation::PreviousLinkNotFound { ledger_id } => {
                write!(f, "previous chain link not found for ledger id={}", ledger_id)
            }
            IntegrityViolation::ChainBreak {
                ledger_id,
                expected,
                found,
            } => write!(
                f,
                "chain broken at id={}: previous_hash={}..., expected {}...",
                ledger_id,
                short(found),
                short(expected)
            ),
        }
    }
}

/// Outcome of verifying one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryVerification {
    /// Entry passed every check
    pub valid: bool,
    /// Human-readable reason
    pub reason: String,
    /// Violation, when invalid
    pub violation: Option<IntegrityViolation>,
}

impl EntryVerification {
    pub(crate) fn passed() -> Self {
        Self {
            valid: true,
            reason: "verification passed".to_string(),
            violation: None,
        }
    }

    pub(crate) fn failed(violation: IntegrityViolation) -> Self {
        Self {
            valid: false,
            reason: violation.to_string(),
            violation: Some(violation),
        }
    }
}

/// Outcome of verifying the whole chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    /// Whole chain passed
    pub valid: bool,
    /// Human-readable reason
    pub reason: String,
    /// Entries fully validated before the scan stopped
    pub entries_checked: u64,
    /// First violation found
    pub violation: Option<IntegrityViolation>,
}

impl ChainVerification {
    pub(crate) fn empty() -> Self {
        Self {
            valid: true,
            reason: "chain is empty".to_string(),
            entries_checked: 0,
            violation: None,
        }
    }

    pub(crate) fn passed(entries_checked: u64) -> Self {
        Self {
            valid: true,
            reason: "full chain verification passed".to_string(),
            entries_checked,
            violation: None,
        }
    }

    pub(crate) fn failed(violation: IntegrityViolation, entries_checked: u64) -> Self {
        Self {
            valid: false,
            reason: violation.to_string(),
            entries_checked,
            violation: Some(violation),
        }
    }
}

/// Result of confirming an invoice payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentConfirmation {
    /// A new ledger entry was written and the invoice marked paid
    Recorded(LedgerEntry),
    /// The invoice was already recorded; nothing was written
    AlreadyRecorded {
        /// Invoice ID
        invoice_id: InvoiceId,
        /// Hash of the existing entry
        transaction_hash: String,
    },
}

impl PaymentConfirmation {
    /// Transaction hash to hand back to the payer
    pub fn transaction_hash(&self) -> &str {
        match self {
            PaymentConfirmation::Recorded(entry) => &entry.transaction_hash,
            PaymentConfirmation::AlreadyRecorded {
                transaction_hash, ..
            } => transaction_hash,
        }
    }

    /// Whether this call wrote a new entry
    pub fn is_new(&self) -> bool {
        matches!(self, PaymentConfirmation::Recorded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_mark_as_paid() {
        let mut invoice = Invoice::new(1, 7, Decimal::new(150000, 2));
        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert!(!invoice.is_paid());

        invoice.mark_as_paid();
        assert!(invoice.is_paid());
    }

    #[test]
    fn test_invoice_status_spelling() {
        assert_eq!(InvoiceStatus::Paid.to_string(), "PAID");
        assert_eq!(InvoiceStatus::Overdue.as_str(), "OVERDUE");
    }

    #[test]
    fn test_violation_reasons() {
        let v = IntegrityViolation::EntryNotFound(EntrySelector::InvoiceId(9));
        assert!(v.to_string().starts_with("entry not found"));
        assert_eq!(v.ledger_id(), None);

        let v = IntegrityViolation::HashMismatch {
            ledger_id: 3,
            stored: "a".repeat(64),
            computed: "b".repeat(64),
        };
        assert!(v.to_string().starts_with("hash mismatch at ledger id=3"));
        assert_eq!(v.ledger_id(), Some(3));

        let v = IntegrityViolation::ChainBreak {
            ledger_id: 2,
            expected: "0".to_string(),
            found: "c".repeat(64),
        };
        assert!(v.to_string().starts_with("chain broken at id=2"));
    }

    #[test]
    fn test_pending_into_entry() {
        let pending = PendingEntry {
            invoice_id: 5,
            transaction_hash: "f".repeat(64),
            previous_hash: "0".to_string(),
            timestamp: Utc::now(),
        };
        let entry = pending.clone().into_entry(1);
        assert_eq!(entry.id, 1);
        assert_eq!(entry.invoice_id, pending.invoice_id);
        assert!(entry.is_genesis());
    }
}
