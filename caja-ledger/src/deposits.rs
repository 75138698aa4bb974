//! Deposit ledger
//!
//! Owns deposit records and the credit balance ("saldo a favor") they
//! carry forward. `credit_remaining == amount - applied_amount` holds for
//! every stored row; `applied_amount` only ever grows.

use crate::{
    storage::Storage,
    types::{checked_total, validate_amount, PatientId, ReceiptRef},
    Error, Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Money received from (or on behalf of) a patient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    id: Uuid,
    patient_id: PatientId,
    amount: Decimal,
    applied_amount: Decimal,
    credit_remaining: Decimal,
    receipt_ref: ReceiptRef,
    date: DateTime<Utc>,
}

impl Deposit {
    /// Build a deposit whose whole amount is still credit
    pub(crate) fn new(
        patient_id: PatientId,
        amount: Decimal,
        receipt_ref: Option<ReceiptRef>,
        date: DateTime<Utc>,
    ) -> Result<Self> {
        let amount = validate_amount(amount, "Deposit")?;
        let receipt_ref = match receipt_ref {
            Some(receipt) if !receipt.is_blank() => receipt,
            _ => {
                return Err(Error::Validation(
                    "A receipt reference is required for every deposit".to_string(),
                ))
            }
        };

        Ok(Self {
            id: Uuid::now_v7(),
            patient_id,
            amount,
            applied_amount: Decimal::ZERO,
            credit_remaining: amount,
            receipt_ref,
            date,
        })
    }

    /// Deposit ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Owning patient
    pub fn patient_id(&self) -> &PatientId {
        &self.patient_id
    }

    /// Deposited amount
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Amount applied to debts so far
    pub fn applied_amount(&self) -> Decimal {
        self.applied_amount
    }

    /// Unapplied balance available to future charges
    pub fn credit_remaining(&self) -> Decimal {
        self.credit_remaining
    }

    /// Receipt handle
    pub fn receipt_ref(&self) -> &ReceiptRef {
        &self.receipt_ref
    }

    /// Deposit date
    pub fn date(&self) -> DateTime<Utc> {
        self.date
    }

    /// Has unapplied credit
    pub fn has_credit(&self) -> bool {
        self.credit_remaining > Decimal::ZERO
    }

    /// Apply up to `wanted` of the remaining credit; returns what was applied
    pub(crate) fn consume(&mut self, wanted: Decimal) -> Decimal {
        let used = wanted.min(self.credit_remaining).max(Decimal::ZERO);
        self.applied_amount += used;
        self.credit_remaining = self.amount - self.applied_amount;
        used
    }

    /// `applied + credit == amount`, both non-negative
    pub fn check_invariants(&self) -> Result<()> {
        if self.applied_amount < Decimal::ZERO || self.credit_remaining < Decimal::ZERO {
            return Err(Error::InvariantViolation(format!(
                "Deposit {} has negative applied {} or credit {}",
                self.id, self.applied_amount, self.credit_remaining
            )));
        }
        if self.applied_amount + self.credit_remaining != self.amount {
            return Err(Error::InvariantViolation(format!(
                "Deposit {} applied {} + credit {} != amount {}",
                self.id, self.applied_amount, self.credit_remaining, self.amount
            )));
        }
        Ok(())
    }
}

/// Read side of the deposit records; deposits are written by the allocation engine
#[derive(Debug, Clone)]
pub struct DepositLedger {
    storage: Arc<Storage>,
}

impl DepositLedger {
    /// Create over shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Every deposit of the patient, oldest first
    pub fn list(&self, patient_id: &PatientId) -> Result<Vec<Deposit>> {
        self.storage.list_deposits(patient_id)
    }

    /// Deposits with unapplied credit, oldest first (FIFO consumption)
    pub fn list_available_credit(&self, patient_id: &PatientId) -> Result<Vec<Deposit>> {
        Ok(self
            .list(patient_id)?
            .into_iter()
            .filter(Deposit::has_credit)
            .collect())
    }

    /// Sum of unapplied credit
    pub fn total_credit(&self, patient_id: &PatientId) -> Result<Decimal> {
        checked_total(self.list(patient_id)?.iter().map(Deposit::credit_remaining))
    }

    /// Deposit history, newest first
    pub fn history(&self, patient_id: &PatientId) -> Result<Vec<Deposit>> {
        let mut deposits = self.list(patient_id)?;
        deposits.reverse();
        Ok(deposits)
    }

    /// Deposit by ID
    pub fn get(&self, deposit_id: Uuid) -> Result<Deposit> {
        self.storage.get_deposit(deposit_id)
    }
}
