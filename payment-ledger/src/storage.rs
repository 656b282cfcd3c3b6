//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `entries` - Append-only ledger entries (key: ledger id, big-endian)
//! - `invoices` - Invoice billing records (key: invoice id, big-endian)
//! - `indices` - Uniqueness indices (`i` || invoice id, `h` || hash) -> ledger id
//!
//! Entries are never updated or deleted through this API. Every insert
//! commits the entry, both indices and the optional invoice update in one
//! `WriteBatch`.

use crate::{
    crypto::GENESIS_HASH,
    error::{Error, Result},
    types::{Invoice, InvoiceId, InvoiceStatus, LedgerEntry, LedgerId, PendingEntry},
    Config,
};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::sync::Arc;

/// Column family names
const CF_ENTRIES: &str = "entries";
const CF_INVOICES: &str = "invoices";
const CF_INDICES: &str = "indices";

/// Index key prefixes
const IDX_INVOICE: u8 = b'i';
const IDX_HASH: u8 = b'h';

/// Append-only ledger table
///
/// Implementations must assign ids strictly greater than every existing id
/// and must refuse an insert whose `previous_hash` is not the current tail.
pub trait LedgerStore: Send + Sync {
    /// Entry with the greatest id
    fn get_tail(&self) -> Result<Option<LedgerEntry>>;

    /// Commit a new entry, optionally marking the invoice it settles paid
    ///
    /// `settled_invoice` carries the billing fields the hash was computed
    /// from. The stored invoice is re-read at commit time and must still
    /// match them.
    fn insert(&self, entry: PendingEntry, settled_invoice: Option<&Invoice>) -> Result<LedgerEntry>;

    /// Mark an invoice paid that an existing entry already records
    ///
    /// Returns `false` when the invoice was already paid.
    fn mark_invoice_paid(&self, invoice_id: InvoiceId) -> Result<bool>;

    /// All entries in ascending id order
    fn list_ordered(&self) -> Result<Vec<LedgerEntry>>;

    /// Entry by ledger id
    fn get_entry(&self, id: LedgerId) -> Result<Option<LedgerEntry>>;

    /// Entry recording an invoice
    fn find_by_invoice(&self, invoice_id: InvoiceId) -> Result<Option<LedgerEntry>>;

    /// Entry with the next-lower id
    fn get_predecessor(&self, id: LedgerId) -> Result<Option<LedgerEntry>>;
}

/// Read access to invoices
pub trait InvoiceStore: Send + Sync {
    /// Invoice by ID
    fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>>;
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    /// Serializes tail check and commit across every writer in this process
    write_lock: Mutex<()>,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_entries()),
            ColumnFamilyDescriptor::new(CF_INVOICES, Options::default()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened payment ledger store");

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_entries() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Point lookups only
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    // Key helpers

    fn index_key(prefix: u8, body: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + body.len());
        key.push(prefix);
        key.extend_from_slice(body);
        key
    }

    fn decode_id(bytes: &[u8]) -> Result<u64> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::Storage(format!("Malformed id key of length {}", bytes.len())))?;
        Ok(u64::from_be_bytes(raw))
    }

    fn lookup_index(&self, prefix: u8, body: &[u8]) -> Result<Option<LedgerId>> {
        let cf = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(cf, Self::index_key(prefix, body))? {
            Some(value) => Ok(Some(Self::decode_id(&value)?)),
            None => Ok(None),
        }
    }

    // Invoice operations

    /// Store an invoice on behalf of the billing layer
    ///
    /// A paid invoice cannot move back to another status, and an invoice only
    /// becomes paid through a ledger entry: use
    /// [`crate::ChainEngine::confirm_payment`] to settle it.
    pub fn put_invoice(&self, invoice: &Invoice) -> Result<()> {
        let _guard = self.write_lock.lock();

        let from = self
            .get_invoice(invoice.id)?
            .map(|existing| existing.status)
            .unwrap_or(InvoiceStatus::Pending);

        let reverts = from == InvoiceStatus::Paid && !invoice.is_paid();
        let settles_unrecorded = from != InvoiceStatus::Paid
            && invoice.is_paid()
            && self.find_by_invoice(invoice.id)?.is_none();
        if reverts || settles_unrecorded {
            return Err(Error::InvalidTransition {
                invoice_id: invoice.id,
                from,
                to: invoice.status,
            });
        }

        let cf = self.cf_handle(CF_INVOICES)?;
        let value = bincode::serialize(invoice)?;
        self.db
            .put_cf_opt(cf, invoice.id.to_be_bytes(), &value, &self.write_options())?;

        tracing::debug!(invoice_id = invoice.id, status = %invoice.status, "Invoice stored");
        Ok(())
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let chain_length = self.get_tail()?.map(|e| e.id).unwrap_or(0);
        let cf_invoices = self.cf_handle(CF_INVOICES)?;
        let approximate_invoices = self
            .db
            .property_int_value_cf(cf_invoices, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(StorageStats {
            chain_length,
            approximate_invoices,
        })
    }

    #[cfg(test)]
    pub(crate) fn put_entry_raw(&self, entry: &LedgerEntry) -> Result<()> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        self.db
            .put_cf(cf, entry.id.to_be_bytes(), bincode::serialize(entry)?)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn put_invoice_raw(&self, invoice: &Invoice) -> Result<()> {
        let cf = self.cf_handle(CF_INVOICES)?;
        self.db
            .put_cf(cf, invoice.id.to_be_bytes(), bincode::serialize(invoice)?)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn delete_invoice_raw(&self, id: InvoiceId) -> Result<()> {
        let cf = self.cf_handle(CF_INVOICES)?;
        self.db.delete_cf(cf, id.to_be_bytes())?;
        Ok(())
    }
}

impl LedgerStore for Storage {
    fn get_tail(&self) -> Result<Option<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(bincode::deserialize(&value)?))
            }
            None => Ok(None),
        }
    }

    fn insert(&self, entry: PendingEntry, settled_invoice: Option<&Invoice>) -> Result<LedgerEntry> {
        if let Some(invoice) = settled_invoice {
            if invoice.id != entry.invoice_id {
                return Err(Error::InvalidEntry(format!(
                    "Settled invoice {} does not match paid entry for invoice {}",
                    invoice.id, entry.invoice_id
                )));
            }
        }

        let _guard = self.write_lock.lock();

        // Uniqueness: invoice_id
        if self
            .lookup_index(IDX_INVOICE, &entry.invoice_id.to_be_bytes())?
            .is_some()
        {
            return Err(Error::DuplicateLedgerEntry {
                invoice_id: entry.invoice_id,
            });
        }

        // Uniqueness: transaction_hash
        if self
            .lookup_index(IDX_HASH, entry.transaction_hash.as_bytes())?
            .is_some()
        {
            return Err(Error::DuplicateTransactionHash(entry.transaction_hash));
        }

        // Compare-and-swap on the tail
        let tail = self.get_tail()?;
        let tail_hash = tail
            .as_ref()
            .map(|t| t.transaction_hash.as_str())
            .unwrap_or(GENESIS_HASH);
        if entry.previous_hash != tail_hash {
            return Err(Error::TailMoved {
                expected: entry.previous_hash,
                actual: tail_hash.to_string(),
            });
        }

        // Billing fields must not have moved since the hash was computed
        let settled = match settled_invoice {
            Some(snapshot) => {
                let mut current = self
                    .get_invoice(snapshot.id)?
                    .ok_or(Error::InvoiceNotFound(snapshot.id))?;
                if current.tenant_id != snapshot.tenant_id || current.amount != snapshot.amount {
                    return Err(Error::InvalidEntry(format!(
                        "Invoice {} billing fields changed during confirmation",
                        snapshot.id
                    )));
                }
                current.mark_as_paid();
                Some(current)
            }
            None => None,
        };

        let id = tail.map(|t| t.id + 1).unwrap_or(1);
        let entry = entry.into_entry(id);
        let id_key = id.to_be_bytes();

        let mut batch = WriteBatch::default();

        // 1. Entry
        let cf_entries = self.cf_handle(CF_ENTRIES)?;
        batch.put_cf(cf_entries, id_key, bincode::serialize(&entry)?);

        // 2. Indices
        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.put_cf(
            cf_indices,
            Self::index_key(IDX_INVOICE, &entry.invoice_id.to_be_bytes()),
            id_key,
        );
        batch.put_cf(
            cf_indices,
            Self::index_key(IDX_HASH, entry.transaction_hash.as_bytes()),
            id_key,
        );

        // 3. Invoice status
        if let Some(invoice) = &settled {
            let cf_invoices = self.cf_handle(CF_INVOICES)?;
            batch.put_cf(
                cf_invoices,
                invoice.id.to_be_bytes(),
                bincode::serialize(invoice)?,
            );
        }

        // Atomic commit
        self.db.write_opt(batch, &self.write_options())?;

        tracing::debug!(
            ledger_id = entry.id,
            invoice_id = entry.invoice_id,
            "Ledger entry committed"
        );

        Ok(entry)
    }

    fn mark_invoice_paid(&self, invoice_id: InvoiceId) -> Result<bool> {
        let _guard = self.write_lock.lock();

        if self
            .lookup_index(IDX_INVOICE, &invoice_id.to_be_bytes())?
            .is_none()
        {
            return Err(Error::InvalidEntry(format!(
                "No ledger entry records invoice {}",
                invoice_id
            )));
        }

        let mut invoice = self
            .get_invoice(invoice_id)?
            .ok_or(Error::InvoiceNotFound(invoice_id))?;
        if invoice.is_paid() {
            return Ok(false);
        }
        invoice.mark_as_paid();

        let cf = self.cf_handle(CF_INVOICES)?;
        self.db.put_cf_opt(
            cf,
            invoice_id.to_be_bytes(),
            bincode::serialize(&invoice)?,
            &self.write_options(),
        )?;

        tracing::debug!(invoice_id, "Invoice marked paid for recorded entry");
        Ok(true)
    }

    fn list_ordered(&self) -> Result<Vec<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        let snapshot = self.db.snapshot();

        let mut entries = Vec::new();
        for item in snapshot.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(entries)
    }

    fn get_entry(&self, id: LedgerId) -> Result<Option<LedgerEntry>> {
        let cf = self.cf_handle(CF_ENTRIES)?;
        match self.db.get_cf(cf, id.to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn find_by_invoice(&self, invoice_id: InvoiceId) -> Result<Option<LedgerEntry>> {
        match self.lookup_index(IDX_INVOICE, &invoice_id.to_be_bytes())? {
            Some(id) => self.get_entry(id),
            None => Ok(None),
        }
    }

    fn get_predecessor(&self, id: LedgerId) -> Result<Option<LedgerEntry>> {
        if id <= 1 {
            return Ok(None);
        }

        let cf = self.cf_handle(CF_ENTRIES)?;
        let start = (id - 1).to_be_bytes();
        let mut iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Reverse));

        match iter.next() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(bincode::deserialize(&value)?))
            }
            None => Ok(None),
        }
    }
}

impl InvoiceStore for Storage {
    fn get_invoice(&self, id: InvoiceId) -> Result<Option<Invoice>> {
        let cf = self.cf_handle(CF_INVOICES)?;
        match self.db.get_cf(cf, id.to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Number of ledger entries (ids are contiguous from 1)
    pub chain_length: u64,
    /// RocksDB key estimate for the invoice table
    pub approximate_invoices: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::compute_transaction_hash;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn pending(invoice_id: InvoiceId, previous_hash: &str) -> PendingEntry {
        let timestamp = crate::crypto::normalize_timestamp(Utc::now());
        PendingEntry {
            invoice_id,
            transaction_hash: compute_transaction_hash(
                invoice_id,
                1,
                &Decimal::new(100000, 2),
                &timestamp,
            ),
            previous_hash: previous_hash.to_string(),
            timestamp,
        }
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        assert!(storage.db.cf_handle(CF_ENTRIES).is_some());
        assert!(storage.db.cf_handle(CF_INVOICES).is_some());
        assert!(storage.db.cf_handle(CF_INDICES).is_some());
        assert!(storage.get_tail().unwrap().is_none());
    }

    #[test]
    fn test_insert_assigns_sequential_ids() {
        let (storage, _temp) = test_storage();

        let first = storage.insert(pending(10, GENESIS_HASH), None).unwrap();
        assert_eq!(first.id, 1);

        let second = storage
            .insert(pending(11, &first.transaction_hash), None)
            .unwrap();
        assert_eq!(second.id, 2);

        assert_eq!(storage.get_tail().unwrap(), Some(second.clone()));
        assert_eq!(storage.get_predecessor(2).unwrap(), Some(first.clone()));
        assert_eq!(storage.get_predecessor(1).unwrap(), None);
        assert_eq!(storage.find_by_invoice(11).unwrap(), Some(second));
        assert_eq!(storage.list_ordered().unwrap().len(), 2);
    }

    #[test]
    fn test_insert_rejects_duplicate_invoice() {
        let (storage, _temp) = test_storage();

        let first = storage.insert(pending(10, GENESIS_HASH), None).unwrap();
        let err = storage
            .insert(pending(10, &first.transaction_hash), None)
            .unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(storage.list_ordered().unwrap().len(), 1);
    }

    #[test]
    fn test_insert_rejects_stale_tail() {
        let (storage, _temp) = test_storage();

        storage.insert(pending(10, GENESIS_HASH), None).unwrap();

        // Built against the empty chain, committed after another append
        let err = storage.insert(pending(11, GENESIS_HASH), None).unwrap_err();
        assert!(matches!(err, Error::TailMoved { .. }));
        assert_eq!(storage.list_ordered().unwrap().len(), 1);
    }

    #[test]
    fn test_insert_with_settled_invoice_is_atomic() {
        let (storage, _temp) = test_storage();

        let invoice = Invoice::new(10, 1, Decimal::new(100000, 2));
        storage.put_invoice(&invoice).unwrap();

        storage
            .insert(pending(10, GENESIS_HASH), Some(&invoice))
            .unwrap();

        assert!(storage.get_invoice(10).unwrap().unwrap().is_paid());
    }

    #[test]
    fn test_insert_rejects_mismatched_settled_invoice() {
        let (storage, _temp) = test_storage();

        let invoice = Invoice::new(11, 1, Decimal::new(100000, 2));
        storage.put_invoice(&invoice).unwrap();
        let err = storage
            .insert(pending(10, GENESIS_HASH), Some(&invoice))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEntry(_)));
        assert!(storage.get_tail().unwrap().is_none());
    }

    #[test]
    fn test_insert_rereads_invoice_edited_after_hashing() {
        let (storage, _temp) = test_storage();

        let snapshot = Invoice::new(10, 1, Decimal::new(100000, 2));
        storage.put_invoice(&snapshot).unwrap();

        // Billing layer edits the amount between the hash and the commit
        let mut edited = snapshot.clone();
        edited.amount = Decimal::new(90000, 2);
        storage.put_invoice(&edited).unwrap();

        let err = storage
            .insert(pending(10, GENESIS_HASH), Some(&snapshot))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEntry(_)));

        // The edit survives and nothing was recorded
        assert!(storage.get_tail().unwrap().is_none());
        assert_eq!(storage.get_invoice(10).unwrap(), Some(edited));
    }

    #[test]
    fn test_paid_invoice_cannot_revert() {
        let (storage, _temp) = test_storage();

        let invoice = Invoice::new(3, 1, Decimal::new(5000, 0));
        storage.put_invoice(&invoice).unwrap();
        storage
            .insert(pending(3, GENESIS_HASH), Some(&invoice))
            .unwrap();

        let mut stored = storage.get_invoice(3).unwrap().unwrap();
        assert!(stored.is_paid());
        stored.status = InvoiceStatus::Pending;
        let err = storage.put_invoice(&stored).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn test_unrecorded_invoice_cannot_become_paid() {
        let (storage, _temp) = test_storage();

        let mut invoice = Invoice::new(5, 1, Decimal::new(5000, 0));
        storage.put_invoice(&invoice).unwrap();

        invoice.mark_as_paid();
        let err = storage.put_invoice(&invoice).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                invoice_id: 5,
                from: InvoiceStatus::Pending,
                to: InvoiceStatus::Paid,
            }
        ));

        // A brand new invoice cannot arrive already paid either
        let mut fresh = Invoice::new(6, 1, Decimal::new(5000, 0));
        fresh.status = InvoiceStatus::Paid;
        assert!(storage.put_invoice(&fresh).is_err());

        assert!(!storage.get_invoice(5).unwrap().unwrap().is_paid());
        assert!(storage.get_invoice(6).unwrap().is_none());
    }

    #[test]
    fn test_mark_invoice_paid_requires_entry() {
        let (storage, _temp) = test_storage();

        let invoice = Invoice::new(7, 1, Decimal::new(5000, 0));
        storage.put_invoice(&invoice).unwrap();

        let err = storage.mark_invoice_paid(7).unwrap_err();
        assert!(matches!(err, Error::InvalidEntry(_)));
        assert!(!storage.get_invoice(7).unwrap().unwrap().is_paid());

        storage.insert(pending(7, GENESIS_HASH), None).unwrap();
        assert!(storage.mark_invoice_paid(7).unwrap());
        assert!(storage.get_invoice(7).unwrap().unwrap().is_paid());
        assert!(!storage.mark_invoice_paid(7).unwrap());
    }

    #[test]
    fn test_stats() {
        let (storage, _temp) = test_storage();
        storage.insert(pending(10, GENESIS_HASH), None).unwrap();
        assert_eq!(storage.get_stats().unwrap().chain_length, 1);
    }
}
