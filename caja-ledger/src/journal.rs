//! Per-patient audit journal
//!
//! Every committed operation appends entries to the patient's journal in the
//! same atomic write as the rows it changed. Entries are hash-chained
//! (SHA-256 over the entry fields and the previous hash), so a rewritten
//! history no longer verifies.

use crate::{types::PatientId, Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Kind of journaled operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum JournalKind {
    /// Charge recorded without credit application
    DebtCreated = 1,
    /// Charge recorded and covered from credit where possible
    ChargeRegistered = 2,
    /// Deposit recorded and applied to selected debts
    DepositRegistered = 3,
    /// Cash cut requested
    CutRequested = 4,
    /// Cash cut resolved by a deposit
    CutResolved = 5,
}

/// Journal entry before sequencing and hashing
#[derive(Debug, Clone)]
pub struct JournalDraft {
    /// Patient
    pub patient_id: PatientId,
    /// Operation
    pub kind: JournalKind,
    /// Amount involved
    pub amount: Decimal,
    /// Rows touched (first is the primary subject)
    pub subjects: Vec<Uuid>,
    /// Wall-clock time of the operation
    pub recorded_at: DateTime<Utc>,
}

impl JournalDraft {
    /// Draft stamped with the current time
    pub fn new(patient_id: PatientId, kind: JournalKind, amount: Decimal, subjects: Vec<Uuid>) -> Self {
        Self {
            patient_id,
            kind,
            amount,
            subjects,
            recorded_at: Utc::now(),
        }
    }
}

/// Sequenced, hash-chained journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the patient's journal (0-based)
    pub seq: u64,
    /// Patient
    pub patient_id: PatientId,
    /// Operation
    pub kind: JournalKind,
    /// Amount involved
    pub amount: Decimal,
    /// Rows touched
    pub subjects: Vec<Uuid>,
    /// Wall-clock time of the operation
    pub recorded_at: DateTime<Utc>,
    /// Hash of the previous entry (zeros for the first)
    pub previous_hash: [u8; 32],
    /// Hash of this entry
    pub hash: [u8; 32],
}

impl JournalEntry {
    /// Compute the entry hash
    pub fn compute_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.seq.to_be_bytes());
        hasher.update(self.patient_id.key_bytes());
        hasher.update([self.kind as u8]);
        hasher.update(self.amount.normalize().to_string().as_bytes());
        hasher.update((self.subjects.len() as u32).to_be_bytes());
        for subject in &self.subjects {
            hasher.update(subject.as_bytes());
        }
        hasher.update(self.recorded_at.timestamp_micros().to_be_bytes());
        hasher.update(self.previous_hash);

        hasher.finalize().into()
    }
}

/// Last entry of a patient's journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalHead {
    /// Sequence of the last entry
    pub seq: u64,
    /// Hash of the last entry
    pub hash: [u8; 32],
}

/// Sequence and hash `drafts` after `head`; returns the entries and the new head
pub fn chain(
    head: Option<JournalHead>,
    drafts: impl IntoIterator<Item = JournalDraft>,
) -> (Vec<JournalEntry>, Option<JournalHead>) {
    let mut head = head;
    let mut entries = Vec::new();

    for draft in drafts {
        let (seq, previous_hash) = match head {
            Some(h) => (h.seq + 1, h.hash),
            None => (0, [0u8; 32]),
        };

        let mut entry = JournalEntry {
            seq,
            patient_id: draft.patient_id,
            kind: draft.kind,
            amount: draft.amount,
            subjects: draft.subjects,
            recorded_at: draft.recorded_at,
            previous_hash,
            hash: [0u8; 32],
        };
        entry.hash = entry.compute_hash();

        head = Some(JournalHead {
            seq,
            hash: entry.hash,
        });
        entries.push(entry);
    }

    (entries, head)
}

/// Verify sequence numbers and hash links of a full journal
pub fn verify_chain(entries: &[JournalEntry]) -> Result<()> {
    let mut previous_hash = [0u8; 32];

    for (expected_seq, entry) in entries.iter().enumerate() {
        if entry.seq != expected_seq as u64 {
            return Err(Error::InvariantViolation(format!(
                "Journal gap: expected seq {}, found {}",
                expected_seq, entry.seq
            )));
        }
        if entry.previous_hash != previous_hash {
            return Err(Error::InvariantViolation(format!(
                "Journal entry {} does not link to its predecessor",
                entry.seq
            )));
        }
        if entry.compute_hash() != entry.hash {
            return Err(Error::InvariantViolation(format!(
                "Journal entry {} hash mismatch",
                entry.seq
            )));
        }
        previous_hash = entry.hash;
    }

    Ok(())
}
