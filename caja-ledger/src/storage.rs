//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `debts` - Debt rows (key: debt_id)
//! - `deposits` - Deposit rows (key: deposit_id)
//! - `cuts` - Cash-cut rows (key: cut_id)
//! - `indices` - Per-patient ordered indices and the open-cut / journal-head pointers
//! - `journal` - Per-patient audit journal (key: patient || seq)
//!
//! # Index keys
//!
//! `tag || patient_key || date_be || row_id` for debts (`d`), deposits (`p`)
//! and cuts (`c`); a prefix scan over `tag || patient_key` yields the
//! patient's rows ordered by `(date, id)`. `o || patient_key` points at the
//! unresolved cut, `h || patient_key` holds the journal head.
//!
//! All mutations go through [`Storage::commit`], which writes one
//! `WriteBatch`: either every row of an operation lands, or none does.

use crate::{
    cash_cut::CashCut,
    debts::Debt,
    deposits::Deposit,
    error::{Error, Result},
    journal::{self, JournalDraft, JournalEntry, JournalHead},
    types::{date_key, PatientId},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_DEBTS: &str = "debts";
const CF_DEPOSITS: &str = "deposits";
const CF_CUTS: &str = "cuts";
const CF_INDICES: &str = "indices";
const CF_JOURNAL: &str = "journal";

/// Index tags
const TAG_DEBT: u8 = b'd';
const TAG_DEPOSIT: u8 = b'p';
const TAG_CUT: u8 = b'c';
const TAG_OPEN_CUT: u8 = b'o';
const TAG_JOURNAL_HEAD: u8 = b'h';

/// Rows written by one operation
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// Debts to insert or update
    pub debts: Vec<Debt>,
    /// Deposits to insert or update
    pub deposits: Vec<Deposit>,
    /// Cuts to insert or update
    pub cuts: Vec<CashCut>,
    /// Journal entries to append
    pub journal: Vec<JournalDraft>,
}

impl ChangeSet {
    /// Nothing to write
    pub fn is_empty(&self) -> bool {
        self.debts.is_empty()
            && self.deposits.is_empty()
            && self.cuts.is_empty()
            && self.journal.is_empty()
    }
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.db.path()).finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Small rows, many point reads
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_DEBTS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_DEPOSITS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_CUTS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_JOURNAL, Self::cf_options_journal()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened caja RocksDB");

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options_rows() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_journal() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Writes

    /// Write every row of `changes` plus index and journal entries atomically
    pub fn commit(&self, changes: &ChangeSet) -> Result<Vec<JournalEntry>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = WriteBatch::default();
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let cf_debts = self.cf_handle(CF_DEBTS)?;
        for debt in &changes.debts {
            batch.put_cf(cf_debts, debt.id().as_bytes(), bincode::serialize(debt)?);
            let key = Self::row_index_key(TAG_DEBT, debt.patient_id(), debt.date(), debt.id());
            batch.put_cf(cf_indices, key, b"");
        }

        let cf_deposits = self.cf_handle(CF_DEPOSITS)?;
        for deposit in &changes.deposits {
            batch.put_cf(cf_deposits, deposit.id().as_bytes(), bincode::serialize(deposit)?);
            let key =
                Self::row_index_key(TAG_DEPOSIT, deposit.patient_id(), deposit.date(), deposit.id());
            batch.put_cf(cf_indices, key, b"");
        }

        let cf_cuts = self.cf_handle(CF_CUTS)?;
        for cut in &changes.cuts {
            batch.put_cf(cf_cuts, cut.id().as_bytes(), bincode::serialize(cut)?);
            let key = Self::row_index_key(TAG_CUT, cut.patient_id(), cut.date(), cut.id());
            batch.put_cf(cf_indices, key, b"");

            let open_key = Self::patient_key(TAG_OPEN_CUT, cut.patient_id());
            if cut.is_resolved() {
                batch.delete_cf(cf_indices, open_key);
            } else {
                batch.put_cf(cf_indices, open_key, cut.id().as_bytes());
            }
        }

        let entries = self.chain_journal(&mut batch, &changes.journal)?;

        self.db.write(batch)?;

        tracing::debug!(
            debts = changes.debts.len(),
            deposits = changes.deposits.len(),
            cuts = changes.cuts.len(),
            journal_entries = entries.len(),
            "Change set committed"
        );

        Ok(entries)
    }

    fn chain_journal(
        &self,
        batch: &mut WriteBatch,
        drafts: &[JournalDraft],
    ) -> Result<Vec<JournalEntry>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let cf_journal = self.cf_handle(CF_JOURNAL)?;

        let mut by_patient: BTreeMap<PatientId, Vec<JournalDraft>> = BTreeMap::new();
        for draft in drafts {
            by_patient
                .entry(draft.patient_id.clone())
                .or_default()
                .push(draft.clone());
        }

        let mut all_entries = Vec::new();
        for (patient_id, patient_drafts) in by_patient {
            let head = self.journal_head(&patient_id)?;
            let (entries, new_head) = journal::chain(head, patient_drafts);

            for entry in &entries {
                let key = Self::journal_key(&patient_id, entry.seq);
                batch.put_cf(cf_journal, key, bincode::serialize(entry)?);
            }
            if let Some(new_head) = new_head {
                batch.put_cf(
                    cf_indices,
                    Self::patient_key(TAG_JOURNAL_HEAD, &patient_id),
                    bincode::serialize(&new_head)?,
                );
            }
            all_entries.extend(entries);
        }

        Ok(all_entries)
    }

    // Reads

    /// Get debt by ID
    pub fn get_debt(&self, debt_id: Uuid) -> Result<Debt> {
        self.get_row(CF_DEBTS, debt_id)?
            .ok_or_else(|| Error::NotFound(format!("debt {}", debt_id)))
    }

    /// Get deposit by ID
    pub fn get_deposit(&self, deposit_id: Uuid) -> Result<Deposit> {
        self.get_row(CF_DEPOSITS, deposit_id)?
            .ok_or_else(|| Error::NotFound(format!("deposit {}", deposit_id)))
    }

    /// Get cut by ID
    pub fn get_cut(&self, cut_id: Uuid) -> Result<CashCut> {
        self.get_row(CF_CUTS, cut_id)?
            .ok_or_else(|| Error::NotFound(format!("cash cut {}", cut_id)))
    }

    /// Patient's debts ordered by `(date, id)`
    pub fn list_debts(&self, patient_id: &PatientId) -> Result<Vec<Debt>> {
        self.scan_index(TAG_DEBT, patient_id)?
            .into_iter()
            .map(|id| self.get_debt(id))
            .collect()
    }

    /// Patient's deposits ordered by `(date, id)`
    pub fn list_deposits(&self, patient_id: &PatientId) -> Result<Vec<Deposit>> {
        self.scan_index(TAG_DEPOSIT, patient_id)?
            .into_iter()
            .map(|id| self.get_deposit(id))
            .collect()
    }

    /// Patient's cuts ordered by `(date, id)`
    pub fn list_cuts(&self, patient_id: &PatientId) -> Result<Vec<CashCut>> {
        self.scan_index(TAG_CUT, patient_id)?
            .into_iter()
            .map(|id| self.get_cut(id))
            .collect()
    }

    /// The patient's unresolved cut, if any
    pub fn open_cut(&self, patient_id: &PatientId) -> Result<Option<CashCut>> {
        let cf = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(cf, Self::patient_key(TAG_OPEN_CUT, patient_id))? {
            Some(value) => {
                let cut_id = Self::uuid_from(&value)?;
                Ok(Some(self.get_cut(cut_id)?))
            }
            None => Ok(None),
        }
    }

    /// Current journal head of the patient
    pub fn journal_head(&self, patient_id: &PatientId) -> Result<Option<JournalHead>> {
        let cf = self.cf_handle(CF_INDICES)?;
        match self.db.get_cf(cf, Self::patient_key(TAG_JOURNAL_HEAD, patient_id))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Full journal of the patient, in sequence order
    pub fn journal(&self, patient_id: &PatientId) -> Result<Vec<JournalEntry>> {
        let cf = self.cf_handle(CF_JOURNAL)?;
        let prefix = patient_id.key_bytes();

        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(bincode::deserialize(&value)?);
        }

        Ok(entries)
    }

    fn get_row<T: DeserializeOwned>(&self, cf_name: &str, id: Uuid) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Row IDs under `tag || patient_key`, in key order
    fn scan_index(&self, tag: u8, patient_id: &PatientId) -> Result<Vec<Uuid>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = Self::patient_key(tag, patient_id);

        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_slice(), Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() != prefix.len() + 8 + 16 {
                return Err(Error::Storage(format!(
                    "Malformed index key of length {}",
                    key.len()
                )));
            }
            ids.push(Self::uuid_from(&key[key.len() - 16..])?);
        }

        tracing::debug!(
            tag = %(tag as char),
            patient_id = %patient_id,
            rows = ids.len(),
            "Index scanned"
        );

        Ok(ids)
    }

    // Key helpers

    fn patient_key(tag: u8, patient_id: &PatientId) -> Vec<u8> {
        let mut key = vec![tag];
        key.extend_from_slice(&patient_id.key_bytes());
        key
    }

    fn row_index_key(
        tag: u8,
        patient_id: &PatientId,
        date: chrono::DateTime<chrono::Utc>,
        id: Uuid,
    ) -> Vec<u8> {
        let mut key = Self::patient_key(tag, patient_id);
        key.extend_from_slice(&date_key(date));
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn journal_key(patient_id: &PatientId, seq: u64) -> Vec<u8> {
        let mut key = patient_id.key_bytes();
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn uuid_from(bytes: &[u8]) -> Result<Uuid> {
        Uuid::from_slice(bytes).map_err(|e| Error::Storage(format!("Corrupt row id: {}", e)))
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_debts: self.approximate_count(self.cf_handle(CF_DEBTS)?)?,
            total_deposits: self.approximate_count(self.cf_handle(CF_DEPOSITS)?)?,
            total_cuts: self.approximate_count(self.cf_handle(CF_CUTS)?)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);

        Ok(prop)
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate number of debt rows
    pub total_debts: u64,
    /// Approximate number of deposit rows
    pub total_deposits: u64,
    /// Approximate number of cut rows
    pub total_cuts: u64,
}
