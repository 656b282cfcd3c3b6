//! Single-writer actor for the ledger write path
//!
//! Every append and payment confirmation issued through a [`LedgerHandle`]
//! is executed by one task, in mailbox order. Reads do not go through the
//! actor.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │          Payment workflow (webhooks, manual)          │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │   ChainEngine::append_payment_record / confirm_payment│
//! │                       │                               │
//! │                       ▼                               │
//! │        Storage::insert (atomic WriteBatch)            │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::chain::ChainEngine;
use crate::storage::{InvoiceStore, LedgerStore};
use crate::types::{InvoiceId, LedgerEntry, PaymentConfirmation, TenantId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Append a payment record
    AppendPayment {
        invoice_id: InvoiceId,
        tenant_id: TenantId,
        amount: Decimal,
        timestamp: Option<DateTime<Utc>>,
        response: oneshot::Sender<Result<LedgerEntry>>,
    },

    /// Mark an invoice paid and record it
    ConfirmPayment {
        invoice_id: InvoiceId,
        paid_amount: Decimal,
        timestamp: Option<DateTime<Utc>>,
        response: oneshot::Sender<Result<PaymentConfirmation>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns the write path
pub struct LedgerActor<S> {
    engine: Arc<ChainEngine<S>>,
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl<S: LedgerStore + InvoiceStore> LedgerActor<S> {
    /// Create new actor
    pub fn new(engine: Arc<ChainEngine<S>>, mailbox: mpsc::Receiver<LedgerMessage>) -> Self {
        Self { engine, mailbox }
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown => break,
                msg => self.handle_message(msg),
            }
        }
        tracing::debug!("Ledger writer stopped");
    }

    fn handle_message(&self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::AppendPayment {
                invoice_id,
                tenant_id,
                amount,
                timestamp,
                response,
            } => {
                let result = self
                    .engine
                    .append_payment_record(invoice_id, tenant_id, amount, timestamp);
                let _ = response.send(result);
            }

            LedgerMessage::ConfirmPayment {
                invoice_id,
                paid_amount,
                timestamp,
                response,
            } => {
                let result = self
                    .engine
                    .confirm_payment(invoice_id, paid_amount, timestamp);
                let _ = response.send(result);
            }

            LedgerMessage::Shutdown => {
                // Handled in run loop
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Clone, Debug)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Append a payment record
    pub async fn append_payment_record(
        &self,
        invoice_id: InvoiceId,
        tenant_id: TenantId,
        amount: Decimal,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<LedgerEntry> {
        self.request(|response| LedgerMessage::AppendPayment {
            invoice_id,
            tenant_id,
            amount,
            timestamp,
            response,
        })
        .await
    }

    /// Confirm an invoice payment
    pub async fn confirm_payment(
        &self,
        invoice_id: InvoiceId,
        paid_amount: Decimal,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<PaymentConfirmation> {
        self.request(|response| LedgerMessage::ConfirmPayment {
            invoice_id,
            paid_amount,
            timestamp,
            response,
        })
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the ledger actor
pub fn spawn_ledger_actor<S>(engine: Arc<ChainEngine<S>>, mailbox_capacity: usize) -> LedgerHandle
where
    S: LedgerStore + InvoiceStore + 'static,
{
    let (tx, rx) = mpsc::channel(mailbox_capacity); // Bounded channel for backpressure
    let actor = LedgerActor::new(engine, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    LedgerHandle::new(tx)
}
