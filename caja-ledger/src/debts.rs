//! Debt ledger
//!
//! Owns debt records and their pending/paid state. Coverage is only ever
//! changed by the allocation engine through the crate-private mutators
//! below; callers get read-only views.

use crate::{
    journal::{JournalDraft, JournalKind},
    storage::{ChangeSet, Storage},
    types::{checked_total, validate_amount, DebtCategory, PatientId},
    Error, Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A charge owed by a patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Debt {
    id: Uuid,
    patient_id: PatientId,
    category: DebtCategory,
    amount: Decimal,
    covered_amount: Decimal,
    is_paid: bool,
    is_credit_applied: bool,
    date: DateTime<Utc>,
}

impl Debt {
    /// Build a fresh, uncovered debt
    pub(crate) fn new(
        patient_id: PatientId,
        category: DebtCategory,
        amount: Decimal,
        date: DateTime<Utc>,
    ) -> Result<Self> {
        let amount = validate_amount(amount, "Debt")?;
        Ok(Self {
            id: Uuid::now_v7(),
            patient_id,
            category,
            amount,
            covered_amount: Decimal::ZERO,
            is_paid: false,
            is_credit_applied: false,
            date,
        })
    }

    /// Debt ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Owning patient
    pub fn patient_id(&self) -> &PatientId {
        &self.patient_id
    }

    /// Charge category
    pub fn category(&self) -> DebtCategory {
        self.category
    }

    /// Charged amount
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Amount covered so far (credit and deposits)
    pub fn covered_amount(&self) -> Decimal {
        self.covered_amount
    }

    /// Fully covered
    pub fn is_paid(&self) -> bool {
        self.is_paid
    }

    /// Part of the debt was covered from credit balance at charge time
    pub fn is_credit_applied(&self) -> bool {
        self.is_credit_applied
    }

    /// Charge date
    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    /// Remaining balance, never negative
    pub fn remaining(&self) -> Decimal {
        (self.amount - self.covered_amount).max(Decimal::ZERO)
    }

    /// Unpaid with something left to pay
    pub fn is_outstanding(&self) -> bool {
        !self.is_paid && self.remaining() > Decimal::ZERO
    }

    /// Cover up to `amount` of the remaining balance; returns what was covered
    pub(crate) fn cover(&mut self, amount: Decimal) -> Decimal {
        let covered = amount.min(self.remaining()).max(Decimal::ZERO);
        self.covered_amount += covered;
        self.is_paid = self.covered_amount >= self.amount;
        covered
    }

    pub(crate) fn mark_credit_applied(&mut self) {
        self.is_credit_applied = true;
    }

    /// `0 <= covered <= amount` and `is_paid <=> covered == amount`
    pub fn check_invariants(&self) -> Result<()> {
        if self.covered_amount < Decimal::ZERO || self.covered_amount > self.amount {
            return Err(Error::InvariantViolation(format!(
                "Debt {} covered {} outside [0, {}]",
                self.id, self.covered_amount, self.amount
            )));
        }
        if self.is_paid != (self.covered_amount == self.amount) {
            return Err(Error::InvariantViolation(format!(
                "Debt {} paid flag {} disagrees with coverage {}/{}",
                self.id, self.is_paid, self.covered_amount, self.amount
            )));
        }
        Ok(())
    }
}

/// Read side of the debt records plus the uncovered-charge write
#[derive(Debug, Clone)]
pub struct DebtLedger {
    storage: Arc<Storage>,
}

impl DebtLedger {
    /// Create over shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Record a charge without touching credit balance
    ///
    /// Not gated; `AllocationEngine::create_debt` checks the cash-cut gate first.
    pub(crate) fn create_debt(
        &self,
        patient_id: &PatientId,
        category: DebtCategory,
        amount: Decimal,
        date: DateTime<Utc>,
    ) -> Result<Debt> {
        let debt = Debt::new(patient_id.clone(), category, amount, date)?;

        let mut changes = ChangeSet::default();
        changes.journal.push(JournalDraft::new(
            patient_id.clone(),
            JournalKind::DebtCreated,
            debt.amount(),
            vec![debt.id()],
        ));
        changes.debts.push(debt.clone());
        self.storage.commit(&changes)?;

        tracing::info!(
            patient_id = %patient_id,
            debt_id = %debt.id(),
            category = %category,
            amount = %debt.amount(),
            "Debt created"
        );

        Ok(debt)
    }

    /// Every debt of the patient, oldest first
    pub fn list(&self, patient_id: &PatientId) -> Result<Vec<Debt>> {
        self.storage.list_debts(patient_id)
    }

    /// Unpaid debts with a remaining balance, oldest first (FIFO priority)
    pub fn list_outstanding(&self, patient_id: &PatientId) -> Result<Vec<Debt>> {
        Ok(self
            .list(patient_id)?
            .into_iter()
            .filter(Debt::is_outstanding)
            .collect())
    }

    /// Sum of remaining balances of outstanding debts
    pub fn outstanding_total(&self, patient_id: &PatientId) -> Result<Decimal> {
        checked_total(self.list_outstanding(patient_id)?.iter().map(Debt::remaining))
    }

    /// Paid debts, newest first
    pub fn list_paid(&self, patient_id: &PatientId) -> Result<Vec<Debt>> {
        let mut paid: Vec<Debt> = self
            .list(patient_id)?
            .into_iter()
            .filter(Debt::is_paid)
            .collect();
        paid.reverse();
        Ok(paid)
    }

    /// Debt by ID
    pub fn get(&self, debt_id: Uuid) -> Result<Debt> {
        self.storage.get_debt(debt_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use chrono::Duration;
    use tempfile::TempDir;

    fn test_ledger() -> (DebtLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        (DebtLedger::new(storage), temp_dir)
    }

    fn debt(amount: Decimal) -> Debt {
        Debt::new(PatientId::new("7"), DebtCategory::Store, amount, Utc::now()).unwrap()
    }

    #[test]
    fn test_cover_partial_then_full() {
        let mut d = debt(Decimal::new(5000, 2));

        assert_eq!(d.cover(Decimal::new(3000, 2)), Decimal::new(3000, 2));
        assert!(!d.is_paid());
        assert_eq!(d.remaining(), Decimal::new(2000, 2));

        // Over-cover is clamped to the remaining balance
        assert_eq!(d.cover(Decimal::new(9000, 2)), Decimal::new(2000, 2));
        assert!(d.is_paid());
        assert_eq!(d.remaining(), Decimal::ZERO);
        d.check_invariants().unwrap();
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        let result = Debt::new(PatientId::new("7"), DebtCategory::Other, Decimal::ZERO, Utc::now());
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_create_and_list_outstanding_in_date_order() {
        let (ledger, _temp) = test_ledger();
        let patient = PatientId::new("p-1");
        let now = Utc::now();

        let newer = ledger
            .create_debt(&patient, DebtCategory::Store, Decimal::new(1000, 2), now)
            .unwrap();
        let older = ledger
            .create_debt(
                &patient,
                DebtCategory::Medication,
                Decimal::new(2550, 2),
                now - Duration::days(3),
            )
            .unwrap();

        let outstanding = ledger.list_outstanding(&patient).unwrap();
        let ids: Vec<Uuid> = outstanding.iter().map(Debt::id).collect();
        assert_eq!(ids, vec![older.id(), newer.id()]);
        assert_eq!(ledger.outstanding_total(&patient).unwrap(), Decimal::new(3550, 2));
        assert!(ledger.list_paid(&patient).unwrap().is_empty());
    }

    #[test]
    fn test_patients_are_isolated() {
        let (ledger, _temp) = test_ledger();
        let a = PatientId::new("1");
        let b = PatientId::new("12");

        ledger
            .create_debt(&a, DebtCategory::Store, Decimal::from(10), Utc::now())
            .unwrap();

        assert_eq!(ledger.list(&a).unwrap().len(), 1);
        assert!(ledger.list(&b).unwrap().is_empty());
        assert_eq!(ledger.outstanding_total(&b).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_get_unknown_debt() {
        let (ledger, _temp) = test_ledger();
        assert!(matches!(ledger.get(Uuid::now_v7()), Err(Error::NotFound(_))));
    }
}
