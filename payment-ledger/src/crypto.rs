//! Canonical hashing for ledger entries
//!
//! The payload hashed for every entry is
//!
//! ```text
//! invoice_id|tenant_id|amount|timestamp
//! ```
//!
//! - `amount` goes through binary floating point and is printed with two
//!   fractional digits. This is lossy, and historical hashes depend on it.
//! - `timestamp` is the UTC wall clock, `YYYY-MM-DDTHH:MM:SS`, with a
//!   `.ffffff` suffix only when the microsecond part is non-zero.
//!
//! The digest is SHA-256, emitted as 64 lowercase hex characters.

use crate::types::{InvoiceId, TenantId};
use chrono::{DateTime, SubsecRound, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// previous_hash of the first entry ever appended
pub const GENESIS_HASH: &str = "0";

/// Length of a hex-encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Field separator in the canonical payload
const SEPARATOR: &str = "|";

/// Render an amount with two fractional digits via f64
pub fn canonical_amount(amount: &Decimal) -> String {
    match amount.to_f64() {
        Some(value) => format!("{:.2}", value),
        None => format!("{:.2}", amount.round_dp(2)),
    }
}

/// Drop sub-microsecond precision so the stored and hashed values agree
pub fn normalize_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// Render a timestamp in the canonical ISO-8601 form
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    let seconds = ts.format("%Y-%m-%dT%H:%M:%S");
    match ts.timestamp_subsec_micros() {
        0 => seconds.to_string(),
        micros => format!("{}.{:06}", seconds, micros),
    }
}

/// Build the canonical payload string
pub fn canonical_payload(
    invoice_id: InvoiceId,
    tenant_id: TenantId,
    amount: &Decimal,
    timestamp: &DateTime<Utc>,
) -> String {
    [
        invoice_id.to_string(),
        tenant_id.to_string(),
        canonical_amount(amount),
        canonical_timestamp(timestamp),
    ]
    .join(SEPARATOR)
}

/// Compute the transaction hash for a payment record
pub fn compute_transaction_hash(
    invoice_id: InvoiceId,
    tenant_id: TenantId,
    amount: &Decimal,
    timestamp: &DateTime<Utc>,
) -> String {
    let payload = canonical_payload(invoice_id, tenant_id, amount, timestamp);
    hash_hex(payload.as_bytes())
}

/// SHA-256 of arbitrary bytes, lowercase hex
pub fn hash_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Whether `s` looks like a transaction hash (64 lowercase hex chars)
pub fn is_transaction_hash(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
