//! Main ledger orchestration layer
//!
//! This module ties together storage, the chain engine and the writer actor
//! into the API the payment workflow and audit tooling call.
//!
//! # Example
//!
//! ```no_run
//! use payment_ledger::{Config, Ledger};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> payment_ledger::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let confirmation = ledger.confirm_payment(42, Decimal::new(150000, 2), None).await?;
//!     println!("recorded {}", confirmation.transaction_hash());
//!
//!     let report = ledger.verify_full_chain()?;
//!     assert!(report.valid);
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    chain::ChainEngine,
    metrics::Metrics,
    storage::{InvoiceStore, LedgerStore, Storage},
    types::{
        ChainVerification, EntrySelector, EntryVerification, Invoice, InvoiceId, LedgerEntry,
        LedgerId, PaymentConfirmation, TenantId,
    },
    Config, Error, Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Actor handle for writes
    handle: LedgerHandle,

    /// Engine for lock-free reads and verification
    engine: Arc<ChainEngine<Storage>>,

    /// Metrics shared with the engine
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);

        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;
        metrics.set_chain_length(storage.get_stats()?.chain_length);

        let engine = Arc::new(ChainEngine::new(storage).with_metrics(metrics.clone()));
        let handle = spawn_ledger_actor(engine.clone(), config.writer.mailbox_capacity);

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            "Payment ledger opened"
        );

        Ok(Self {
            handle,
            engine,
            metrics,
            config,
        })
    }

    /// Append a payment record
    ///
    /// Callers confirming a payment should prefer [`Ledger::confirm_payment`],
    /// which also marks the invoice paid in the same write.
    pub async fn append_payment_record(
        &self,
        invoice_id: InvoiceId,
        tenant_id: TenantId,
        amount: Decimal,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<LedgerEntry> {
        self.handle
            .append_payment_record(invoice_id, tenant_id, amount, timestamp)
            .await
    }

    /// Confirm an invoice payment
    pub async fn confirm_payment(
        &self,
        invoice_id: InvoiceId,
        paid_amount: Decimal,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<PaymentConfirmation> {
        self.handle
            .confirm_payment(invoice_id, paid_amount, timestamp)
            .await
    }

    /// Verify one entry
    pub fn verify_ledger_entry(&self, selector: EntrySelector) -> Result<EntryVerification> {
        self.engine.verify_ledger_entry(selector)
    }

    /// Verify the whole chain
    pub fn verify_full_chain(&self) -> Result<ChainVerification> {
        self.engine.verify_full_chain()
    }

    /// Hash the next append will link to
    pub fn get_previous_hash(&self) -> Result<String> {
        self.engine.get_previous_hash()
    }

    /// Entry by ledger id
    pub fn get_entry(&self, id: LedgerId) -> Result<Option<LedgerEntry>> {
        self.engine.store().get_entry(id)
    }

    /// Entry recording an invoice
    pub fn find_by_invoice(&self, invoice_id: InvoiceId) -> Result<Option<LedgerEntry>> {
        self.engine.store().find_by_invoice(invoice_id)
    }

    /// All entries in chain order
    pub fn list_entries(&self) -> Result<Vec<LedgerEntry>> {
        self.engine.store().list_ordered()
    }

    /// Number of entries in the chain
    pub fn chain_length(&self) -> Result<u64> {
        Ok(self.engine.store().get_stats()?.chain_length)
    }

    /// Store an invoice on behalf of the billing layer
    pub fn put_invoice(&self, invoice: &Invoice) -> Result<()> {
        self.engine.store().put_invoice(invoice)
    }

    /// Invoice by ID
    pub fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        self.engine.store().get_invoice(id)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        tracing::info!("Payment ledger shut down");
        Ok(())
    }
}
