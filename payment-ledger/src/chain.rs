//! Chain engine: append and verification over an injected store
//!
//! The engine is the only writer of ledger entries. Appends hold the engine's
//! append lock across the tail read, hash computation and insert, and the
//! store re-checks the tail inside its atomic write, so two appends can never
//! extend the same tail. Verification takes no lock.

use crate::{
    crypto::{compute_transaction_hash, normalize_timestamp, GENESIS_HASH},
    metrics::Metrics,
    storage::{InvoiceStore, LedgerStore},
    types::{
        ChainVerification, EntrySelector, EntryVerification, IntegrityViolation, Invoice,
        InvoiceId, LedgerEntry, PaymentConfirmation, PendingEntry, TenantId,
    },
    Error, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;

/// Hash-chain engine
pub struct ChainEngine<S> {
    store: Arc<S>,
    append_lock: Mutex<()>,
    metrics: Option<Metrics>,
}

impl<S> std::fmt::Debug for ChainEngine<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEngine")
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: LedgerStore + InvoiceStore> ChainEngine<S> {
    /// Create engine over a store
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            append_lock: Mutex::new(()),
            metrics: None,
        }
    }

    /// Record metrics for appends and verifications
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Hash of the current tail, or the genesis sentinel
    pub fn get_previous_hash(&self) -> Result<String> {
        Ok(self
            .store
            .get_tail()?
            .map(|tail| tail.transaction_hash)
            .unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    /// Append a payment record for an invoice
    ///
    /// Fails with [`Error::DuplicateLedgerEntry`] when the invoice is already
    /// recorded. `timestamp` defaults to now and is truncated to microseconds.
    pub fn append_payment_record(
        &self,
        invoice_id: InvoiceId,
        tenant_id: TenantId,
        amount: Decimal,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<LedgerEntry> {
        let _guard = self.append_lock.lock();
        self.append_locked(invoice_id, tenant_id, &amount, timestamp, None)
    }

    /// Mark an invoice paid and record it, as one atomic write
    ///
    /// Retried confirmations return [`PaymentConfirmation::AlreadyRecorded`]
    /// with the existing hash, marking the invoice paid if an earlier bare
    /// append left it unpaid. A paid invoice without an entry is backfilled.
    pub fn confirm_payment(
        &self,
        invoice_id: InvoiceId,
        paid_amount: Decimal,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<PaymentConfirmation> {
        let _guard = self.append_lock.lock();

        let invoice = self
            .store
            .get_invoice(invoice_id)?
            .ok_or(Error::InvoiceNotFound(invoice_id))?;

        if let Some(existing) = self.store.find_by_invoice(invoice_id)? {
            self.record_duplicate(invoice_id);
            if !invoice.is_paid() {
                self.store.mark_invoice_paid(invoice_id)?;
            }
            return Ok(PaymentConfirmation::AlreadyRecorded {
                invoice_id,
                transaction_hash: existing.transaction_hash,
            });
        }

        if paid_amount != invoice.amount {
            return Err(Error::AmountMismatch {
                expected: invoice.amount,
                received: paid_amount,
            });
        }

        if invoice.is_paid() {
            tracing::warn!(invoice_id, "Paid invoice has no ledger entry, backfilling");
        }

        let tenant_id = invoice.tenant_id;
        let amount = invoice.amount;
        match self.append_locked(invoice_id, tenant_id, &amount, timestamp, Some(&invoice)) {
            Ok(entry) => Ok(PaymentConfirmation::Recorded(entry)),
            // Another writer handle recorded it between our check and commit
            Err(Error::DuplicateLedgerEntry { .. }) => {
                let existing = self
                    .store
                    .find_by_invoice(invoice_id)?
                    .ok_or(Error::DuplicateLedgerEntry { invoice_id })?;
                self.store.mark_invoice_paid(invoice_id)?;
                Ok(PaymentConfirmation::AlreadyRecorded {
                    invoice_id,
                    transaction_hash: existing.transaction_hash,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn append_locked(
        &self,
        invoice_id: InvoiceId,
        tenant_id: TenantId,
        amount: &Decimal,
        timestamp: Option<DateTime<Utc>>,
        settled_invoice: Option<&Invoice>,
    ) -> Result<LedgerEntry> {
        let started = Instant::now();

        if self.store.find_by_invoice(invoice_id)?.is_some() {
            self.record_duplicate(invoice_id);
            return Err(Error::DuplicateLedgerEntry { invoice_id });
        }

        let timestamp = normalize_timestamp(timestamp.unwrap_or_else(Utc::now));
        let previous_hash = self.get_previous_hash()?;
        let transaction_hash = compute_transaction_hash(invoice_id, tenant_id, amount, &timestamp);

        let pending = PendingEntry {
            invoice_id,
            transaction_hash,
            previous_hash,
            timestamp,
        };

        let entry = match self.store.insert(pending, settled_invoice) {
            Ok(entry) => entry,
            Err(e) => {
                if e.is_duplicate() {
                    self.record_duplicate(invoice_id);
                }
                return Err(e);
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_append(started.elapsed().as_secs_f64(), entry.id);
        }

        tracing::info!(
            ledger_id = entry.id,
            invoice_id = entry.invoice_id,
            transaction_hash = %entry.transaction_hash,
            genesis = entry.is_genesis(),
            "Payment recorded in ledger"
        );

        Ok(entry)
    }

    /// Verify one entry: its hash against the invoice and its link backwards
    pub fn verify_ledger_entry(&self, selector: EntrySelector) -> Result<EntryVerification> {
        let entry = match selector {
            EntrySelector::LedgerId(id) => self.store.get_entry(id)?,
            EntrySelector::InvoiceId(id) => self.store.find_by_invoice(id)?,
        };

        let Some(entry) = entry else {
            return Ok(self.entry_failed(IntegrityViolation::EntryNotFound(selector)));
        };

        if let Some(violation) = self.check_entry_hash(&entry)? {
            return Ok(self.entry_failed(violation));
        }

        if !entry.is_genesis() {
            match self.store.get_predecessor(entry.id)? {
                None => {
                    return Ok(self.entry_failed(IntegrityViolation::PreviousLinkNotFound {
                        ledger_id: entry.id,
                    }));
                }
                Some(prev) if prev.transaction_hash != entry.previous_hash => {
                    return Ok(self.entry_failed(IntegrityViolation::ChainBreak {
                        ledger_id: entry.id,
                        expected: prev.transaction_hash,
                        found: entry.previous_hash,
                    }));
                }
                Some(_) => {}
            }
        }

        tracing::debug!(ledger_id = entry.id, %selector, "Ledger entry verified");
        Ok(EntryVerification::passed())
    }

    /// Verify every entry in id order
    ///
    /// Stops at the first violation; `entries_checked` counts the entries that
    /// fully passed before it.
    pub fn verify_full_chain(&self) -> Result<ChainVerification> {
        let entries = self.store.list_ordered()?;
        if entries.is_empty() {
            return Ok(ChainVerification::empty());
        }

        let mut expected_previous = GENESIS_HASH.to_string();
        let mut checked = 0u64;

        for entry in entries {
            if entry.previous_hash != expected_previous {
                return Ok(self.chain_failed(
                    IntegrityViolation::ChainBreak {
                        ledger_id: entry.id,
                        expected: expected_previous,
                        found: entry.previous_hash,
                    },
                    checked,
                ));
            }

            if let Some(violation) = self.check_entry_hash(&entry)? {
                return Ok(self.chain_failed(violation, checked));
            }

            expected_previous = entry.transaction_hash;
            checked += 1;
        }

        tracing::info!(entries_checked = checked, "Full chain verification passed");
        Ok(ChainVerification::passed(checked))
    }

    /// Recompute the entry hash from the invoice's current billing fields
    fn check_entry_hash(&self, entry: &LedgerEntry) -> Result<Option<IntegrityViolation>> {
        let Some(invoice) = self.store.get_invoice(entry.invoice_id)? else {
            return Ok(Some(IntegrityViolation::MissingInvoiceReference {
                ledger_id: entry.id,
                invoice_id: entry.invoice_id,
            }));
        };

        let computed = compute_transaction_hash(
            entry.invoice_id,
            invoice.tenant_id,
            &invoice.amount,
            &entry.timestamp,
        );

        if computed != entry.transaction_hash {
            return Ok(Some(IntegrityViolation::HashMismatch {
                ledger_id: entry.id,
                stored: entry.transaction_hash.clone(),
                computed,
            }));
        }

        Ok(None)
    }

    fn record_duplicate(&self, invoice_id: InvoiceId) {
        tracing::warn!(invoice_id, "Ledger entry already exists for invoice");
        if let Some(metrics) = &self.metrics {
            metrics.record_duplicate();
        }
    }

    fn record_violation(&self, violation: &IntegrityViolation) {
        tracing::warn!(
            ledger_id = ?violation.ledger_id(),
            reason = %violation,
            "Ledger integrity violation"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_verification_failure();
        }
    }

    fn entry_failed(&self, violation: IntegrityViolation) -> EntryVerification {
        self.record_violation(&violation);
        EntryVerification::failed(violation)
    }

    fn chain_failed(&self, violation: IntegrityViolation, checked: u64) -> ChainVerification {
        self.record_violation(&violation);
        ChainVerification::failed(violation, checked)
    }
}
