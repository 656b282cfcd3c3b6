//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `payment_ledger_entries_appended_total` - Entries written
//! - `payment_ledger_duplicate_appends_total` - Appends refused as already recorded
//! - `payment_ledger_append_duration_seconds` - Histogram of append latencies
//! - `payment_ledger_verification_failures_total` - Integrity violations reported
//! - `payment_ledger_chain_length` - Id of the current tail

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Entries appended
    pub entries_appended: IntCounter,

    /// Duplicate appends
    pub duplicate_appends: IntCounter,

    /// Append duration histogram
    pub append_duration: Histogram,

    /// Verification failures
    pub verification_failures: IntCounter,

    /// Current chain length
    pub chain_length: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("entries_appended", &self.entries_appended.get())
            .field("chain_length", &self.chain_length.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector on a private registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_appended = IntCounter::new(
            "payment_ledger_entries_appended_total",
            "Total number of ledger entries appended",
        )?;
        registry.register(Box::new(entries_appended.clone()))?;

        let duplicate_appends = IntCounter::new(
            "payment_ledger_duplicate_appends_total",
            "Appends refused because the invoice was already recorded",
        )?;
        registry.register(Box::new(duplicate_appends.clone()))?;

        let append_duration = Histogram::with_opts(
            HistogramOpts::new(
                "payment_ledger_append_duration_seconds",
                "Histogram of append latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        let verification_failures = IntCounter::new(
            "payment_ledger_verification_failures_total",
            "Integrity violations reported by verification",
        )?;
        registry.register(Box::new(verification_failures.clone()))?;

        let chain_length = IntGauge::new(
            "payment_ledger_chain_length",
            "Number of entries in the payment ledger",
        )?;
        registry.register(Box::new(chain_length.clone()))?;

        Ok(Self {
            entries_appended,
            duplicate_appends,
            append_duration,
            verification_failures,
            chain_length,
            registry,
        })
    }

    /// Record a committed append
    pub fn record_append(&self, duration_seconds: f64, tail_id: u64) {
        self.entries_appended.inc();
        self.append_duration.observe(duration_seconds);
        self.chain_length.set(tail_id as i64);
    }

    /// Record an append refused as duplicate
    pub fn record_duplicate(&self) {
        self.duplicate_appends.inc();
    }

    /// Record an integrity violation
    pub fn record_verification_failure(&self) {
        self.verification_failures.inc();
    }

    /// Set chain length (e.g. on startup)
    pub fn set_chain_length(&self, length: u64) {
        self.chain_length.set(length as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
