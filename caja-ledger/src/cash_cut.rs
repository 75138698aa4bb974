//! Cash-cut gate ("corte de caja")
//!
//! ```text
//!   NONE ──request_cut──▶ PENDING ──register_deposit──▶ RESOLVED (≡ NONE)
//! ```
//!
//! While a cut is pending, new charges for the patient are refused. There is
//! no manual unblock: the next deposit resolves the cut, whatever its amount.

use crate::{
    storage::Storage,
    types::PatientId,
    Error, Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Snapshot of a patient's outstanding debt taken when a cut is requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashCut {
    id: Uuid,
    patient_id: PatientId,
    total_amount: Decimal,
    resolved: bool,
    date: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by_deposit: Option<Uuid>,
}

impl CashCut {
    /// Cut ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Owning patient
    pub fn patient_id(&self) -> &PatientId {
        &self.patient_id
    }

    /// Outstanding total at request time
    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    /// Resolved by a later deposit
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Request date
    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    /// Resolution time
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Deposit that resolved the cut
    pub fn resolved_by_deposit(&self) -> Option<Uuid> {
        self.resolved_by_deposit
    }

    /// Current state
    pub fn status(&self) -> CutStatus {
        if self.resolved {
            CutStatus::Resolved
        } else {
            CutStatus::Pending
        }
    }

    pub(crate) fn resolve(&mut self, deposit_id: Uuid, at: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_at = Some(at);
        self.resolved_by_deposit = Some(deposit_id);
    }
}

/// Lifecycle of a stored cut
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CutStatus {
    /// Charging blocked
    Pending,
    /// Terminal; the patient may request a new cut
    Resolved,
}

/// Gate state of a patient
#[derive(Debug, Clone, PartialEq)]
pub enum GateState {
    /// No pending cut, charges allowed
    Open,
    /// Charges refused until the next deposit
    Pending(CashCut),
}

/// Reads cut state and builds new cuts
#[derive(Debug, Clone)]
pub struct CashCutGate {
    storage: Arc<Storage>,
}

impl CashCutGate {
    /// Create over shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Current gate state
    pub fn state(&self, patient_id: &PatientId) -> Result<GateState> {
        Ok(match self.storage.open_cut(patient_id)? {
            Some(cut) => GateState::Pending(cut),
            None => GateState::Open,
        })
    }

    /// The unresolved cut, if any
    pub fn pending_cut(&self, patient_id: &PatientId) -> Result<Option<CashCut>> {
        self.storage.open_cut(patient_id)
    }

    /// True iff an unresolved cut exists
    pub fn is_blocked(&self, patient_id: &PatientId) -> Result<bool> {
        Ok(matches!(self.state(patient_id)?, GateState::Pending(_)))
    }

    /// Fail with `Blocked` while a cut is pending
    pub fn ensure_open(&self, patient_id: &PatientId) -> Result<()> {
        match self.state(patient_id)? {
            GateState::Open => Ok(()),
            GateState::Pending(cut) => Err(Error::Blocked(format!(
                "Patient {} has pending cash cut {} for {}",
                patient_id,
                cut.id(),
                cut.total_amount()
            ))),
        }
    }

    /// Build a pending cut over `outstanding_total`
    ///
    /// Fails with `Conflict` when nothing is owed or a cut is already pending.
    pub(crate) fn new_cut(
        &self,
        patient_id: &PatientId,
        outstanding_total: Decimal,
        date: DateTime<Utc>,
    ) -> Result<CashCut> {
        if outstanding_total <= Decimal::ZERO {
            return Err(Error::Conflict(format!(
                "Patient {} has no outstanding debt to cut",
                patient_id
            )));
        }
        if let Some(existing) = self.pending_cut(patient_id)? {
            return Err(Error::Conflict(format!(
                "Patient {} already has pending cash cut {}",
                patient_id,
                existing.id()
            )));
        }

        Ok(CashCut {
            id: Uuid::now_v7(),
            patient_id: patient_id.clone(),
            total_amount: outstanding_total,
            resolved: false,
            date,
            resolved_at: None,
            resolved_by_deposit: None,
        })
    }

    /// Cut history, newest first
    pub fn history(&self, patient_id: &PatientId) -> Result<Vec<CashCut>> {
        let mut cuts = self.storage.list_cuts(patient_id)?;
        cuts.reverse();
        Ok(cuts)
    }
}
