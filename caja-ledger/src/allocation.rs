//! Allocation engine
//!
//! The only writer of `covered_amount`/`is_paid` on debts and
//! `applied_amount`/`credit_remaining` on deposits. Two flows:
//!
//! - **Charge**: a new debt is covered from existing credit, oldest deposit
//!   first, before it is ever seen as outstanding.
//! - **Deposit**: incoming money is applied to caller-selected outstanding
//!   debts in the given order; the surplus becomes credit.
//!
//! Every flow reads the committed rows, computes all changes in memory with
//! the pure helpers below, then commits them in one [`ChangeSet`]. Callers
//! must serialize flows per patient (see [`crate::actor`]).

use crate::{
    cash_cut::{CashCut, CashCutGate},
    debts::{Debt, DebtLedger},
    deposits::{Deposit, DepositLedger},
    journal::{JournalDraft, JournalKind},
    storage::{ChangeSet, Storage},
    types::{checked_total, validate_amount, DebtCategory, PatientId, ReceiptRef},
    Error, Result,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Credit drawn from one deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditDraw {
    /// Deposit the credit came from
    pub deposit_id: Uuid,
    /// Amount drawn
    pub amount: Decimal,
}

/// Coverage added to one debt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtCoverage {
    /// Debt covered
    pub debt_id: Uuid,
    /// Amount added to its coverage
    pub amount: Decimal,
    /// Fully paid after this coverage
    pub paid: bool,
}

/// Result of a charge
#[derive(Debug, Clone)]
pub struct ChargeOutcome {
    /// The committed debt
    pub debt: Debt,
    /// Credit consumed to cover it
    pub credit_used: Decimal,
    /// Per-deposit draws, oldest deposit first
    pub draws: Vec<CreditDraw>,
    /// Deposits as committed after the draws
    pub deposits: Vec<Deposit>,
}

/// Result of a deposit
#[derive(Debug, Clone)]
pub struct DepositOutcome {
    /// The committed deposit
    pub deposit: Deposit,
    /// Per-debt coverage, in application order
    pub coverages: Vec<DebtCoverage>,
    /// Debts as committed after coverage
    pub debts: Vec<Debt>,
    /// Cut resolved by this deposit
    pub resolved_cut: Option<CashCut>,
}

/// What a deposit would do, without doing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositPreview {
    /// Amount that would be applied to the selected debts
    pub applied: Decimal,
    /// Amount that would become credit
    pub credit: Decimal,
    /// Selected balance the deposit would leave unpaid
    pub shortfall: Decimal,
}

/// Draw `needed` from deposits in slice order (callers pass oldest first).
///
/// Never draws more than the total credit available and never drives a
/// deposit's credit below zero.
pub fn draw_credit(deposits: &mut [Deposit], needed: Decimal) -> Vec<CreditDraw> {
    let mut still_needed = needed.max(Decimal::ZERO);
    let mut draws = Vec::new();

    for deposit in deposits.iter_mut() {
        if still_needed <= Decimal::ZERO {
            break;
        }
        if !deposit.has_credit() {
            continue;
        }
        let drawn = deposit.consume(still_needed);
        still_needed -= drawn;
        draws.push(CreditDraw {
            deposit_id: deposit.id(),
            amount: drawn,
        });
    }

    draws
}

/// Apply up to `amount` to debts in slice order, marking each paid when its
/// remaining balance reaches zero.
pub fn apply_payment(debts: &mut [Debt], amount: Decimal) -> Vec<DebtCoverage> {
    let mut to_apply = amount.max(Decimal::ZERO);
    let mut coverages = Vec::new();

    for debt in debts.iter_mut() {
        if to_apply <= Decimal::ZERO {
            break;
        }
        if !debt.is_outstanding() {
            continue;
        }
        let covered = debt.cover(to_apply);
        to_apply -= covered;
        coverages.push(DebtCoverage {
            debt_id: debt.id(),
            amount: covered,
            paid: debt.is_paid(),
        });
    }

    coverages
}

/// Split `amount` against the remaining balance of `targets`
pub fn plan_deposit(amount: Decimal, targets: &[Debt]) -> Result<DepositPreview> {
    let total_pending = checked_total(targets.iter().map(Debt::remaining))?;
    let applied = amount.min(total_pending).max(Decimal::ZERO);
    Ok(DepositPreview {
        applied,
        credit: amount - applied,
        shortfall: total_pending - applied,
    })
}

/// Charge/deposit/cut flows over the three ledgers
#[derive(Debug, Clone)]
pub struct AllocationEngine {
    storage: Arc<Storage>,
    debts: DebtLedger,
    deposits: DepositLedger,
    gate: CashCutGate,
}

impl AllocationEngine {
    /// Create over shared storage
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            debts: DebtLedger::new(storage.clone()),
            deposits: DepositLedger::new(storage.clone()),
            gate: CashCutGate::new(storage.clone()),
            storage,
        }
    }

    /// Underlying storage
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Debt ledger
    pub fn debts(&self) -> &DebtLedger {
        &self.debts
    }

    /// Deposit ledger
    pub fn deposits(&self) -> &DepositLedger {
        &self.deposits
    }

    /// Cash-cut gate
    pub fn gate(&self) -> &CashCutGate {
        &self.gate
    }

    /// Record a charge without consuming credit (still gated by a pending cut)
    pub fn create_debt(
        &self,
        patient_id: &PatientId,
        category: DebtCategory,
        amount: Decimal,
        date: DateTime<Utc>,
    ) -> Result<Debt> {
        self.gate.ensure_open(patient_id)?;
        self.debts.create_debt(patient_id, category, amount, date)
    }

    /// Record a charge and cover it from existing credit, oldest deposit first
    pub fn register_charge(
        &self,
        patient_id: &PatientId,
        category: DebtCategory,
        amount: Decimal,
        date: DateTime<Utc>,
    ) -> Result<ChargeOutcome> {
        self.gate.ensure_open(patient_id)?;

        let mut debt = Debt::new(patient_id.clone(), category, amount, date)?;

        let mut deposits = self.deposits.list_available_credit(patient_id)?;
        let available = checked_total(deposits.iter().map(Deposit::credit_remaining))?;
        let used = debt.amount().min(available);

        let draws = if used > Decimal::ZERO {
            draw_credit(&mut deposits, used)
        } else {
            Vec::new()
        };
        let drawn = checked_total(draws.iter().map(|d| d.amount))?;
        if drawn != used {
            return Err(Error::InvariantViolation(format!(
                "Drew {} of credit but {} was available to use",
                drawn, used
            )));
        }

        debt.cover(used);
        if used > Decimal::ZERO {
            debt.mark_credit_applied();
        }
        debt.check_invariants()?;

        let touched: HashSet<Uuid> = draws.iter().map(|d| d.deposit_id).collect();
        deposits.retain(|d| touched.contains(&d.id()));
        for deposit in &deposits {
            deposit.check_invariants()?;
        }

        let mut subjects = vec![debt.id()];
        subjects.extend(draws.iter().map(|d| d.deposit_id));

        let changes = ChangeSet {
            debts: vec![debt.clone()],
            deposits: deposits.clone(),
            cuts: vec![],
            journal: vec![JournalDraft::new(
                patient_id.clone(),
                JournalKind::ChargeRegistered,
                debt.amount(),
                subjects,
            )],
        };
        self.storage.commit(&changes)?;

        tracing::info!(
            patient_id = %patient_id,
            debt_id = %debt.id(),
            category = %category,
            amount = %debt.amount(),
            credit_used = %used,
            paid = debt.is_paid(),
            "Charge registered"
        );

        Ok(ChargeOutcome {
            debt,
            credit_used: used,
            draws,
            deposits,
        })
    }

    /// Record a deposit, apply it to the selected debts in the given order,
    /// keep the surplus as credit and resolve any pending cut
    pub fn register_deposit(
        &self,
        patient_id: &PatientId,
        amount: Decimal,
        receipt_ref: Option<ReceiptRef>,
        selected_debt_ids: &[Uuid],
        date: DateTime<Utc>,
    ) -> Result<DepositOutcome> {
        let mut deposit = Deposit::new(patient_id.clone(), amount, receipt_ref, date)?;
        let mut targets = self.select_targets(patient_id, selected_debt_ids)?;

        let plan = plan_deposit(deposit.amount(), &targets)?;
        let coverages = apply_payment(&mut targets, plan.applied);
        let applied = checked_total(coverages.iter().map(|c| c.amount))?;
        if applied != plan.applied {
            return Err(Error::InvariantViolation(format!(
                "Applied {} but planned {}",
                applied, plan.applied
            )));
        }

        deposit.consume(applied);
        deposit.check_invariants()?;

        let covered: HashSet<Uuid> = coverages.iter().map(|c| c.debt_id).collect();
        targets.retain(|d| covered.contains(&d.id()));
        for debt in &targets {
            debt.check_invariants()?;
        }

        let mut subjects = vec![deposit.id()];
        subjects.extend(coverages.iter().map(|c| c.debt_id));

        let mut changes = ChangeSet {
            debts: targets.clone(),
            deposits: vec![deposit.clone()],
            cuts: vec![],
            journal: vec![JournalDraft::new(
                patient_id.clone(),
                JournalKind::DepositRegistered,
                deposit.amount(),
                subjects,
            )],
        };

        let resolved_cut = match self.gate.pending_cut(patient_id)? {
            Some(mut cut) => {
                cut.resolve(deposit.id(), Utc::now());
                changes.journal.push(JournalDraft::new(
                    patient_id.clone(),
                    JournalKind::CutResolved,
                    cut.total_amount(),
                    vec![cut.id(), deposit.id()],
                ));
                changes.cuts.push(cut.clone());
                Some(cut)
            }
            None => None,
        };

        self.storage.commit(&changes)?;

        tracing::info!(
            patient_id = %patient_id,
            deposit_id = %deposit.id(),
            amount = %deposit.amount(),
            applied = %deposit.applied_amount(),
            credit = %deposit.credit_remaining(),
            debts_covered = coverages.len(),
            cut_resolved = resolved_cut.is_some(),
            "Deposit registered"
        );

        Ok(DepositOutcome {
            deposit,
            coverages,
            debts: targets,
            resolved_cut,
        })
    }

    /// Compute what `register_deposit` would apply, without writing
    pub fn preview_deposit(
        &self,
        patient_id: &PatientId,
        amount: Decimal,
        selected_debt_ids: &[Uuid],
    ) -> Result<DepositPreview> {
        let amount = validate_amount(amount, "Deposit")?;
        let targets = self.select_targets(patient_id, selected_debt_ids)?;
        plan_deposit(amount, &targets)
    }

    /// Freeze charging behind a cut over the current outstanding total
    pub fn request_cut(&self, patient_id: &PatientId, date: DateTime<Utc>) -> Result<CashCut> {
        let outstanding = self.debts.outstanding_total(patient_id)?;
        let cut = self.gate.new_cut(patient_id, outstanding, date)?;

        let changes = ChangeSet {
            cuts: vec![cut.clone()],
            journal: vec![JournalDraft::new(
                patient_id.clone(),
                JournalKind::CutRequested,
                cut.total_amount(),
                vec![cut.id()],
            )],
            ..Default::default()
        };
        self.storage.commit(&changes)?;

        tracing::info!(
            patient_id = %patient_id,
            cut_id = %cut.id(),
            total = %cut.total_amount(),
            "Cash cut requested"
        );

        Ok(cut)
    }

    /// Selected ids restricted to the patient's outstanding debts, in caller
    /// order, duplicates dropped. Unknown or foreign ids are `NotFound`.
    fn select_targets(&self, patient_id: &PatientId, selected_debt_ids: &[Uuid]) -> Result<Vec<Debt>> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        for &debt_id in selected_debt_ids {
            if !seen.insert(debt_id) {
                continue;
            }
            let debt = self.storage.get_debt(debt_id)?;
            if debt.patient_id() != patient_id {
                return Err(Error::NotFound(format!(
                    "debt {} for patient {}",
                    debt_id, patient_id
                )));
            }
            if debt.is_outstanding() {
                targets.push(debt);
            } else {
                tracing::debug!(debt_id = %debt_id, "Selected debt already paid, skipping");
            }
        }

        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use chrono::Duration;
    use tempfile::TempDir;

    fn test_engine() -> (AllocationEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        let storage = Arc::new(Storage::open(&config).unwrap());
        (AllocationEngine::new(storage), temp_dir)
    }

    fn receipt() -> Option<ReceiptRef> {
        Some(ReceiptRef::new("comprobante_1"))
    }

    fn usd(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[test]
    fn test_draw_credit_oldest_first() {
        let patient = PatientId::new("1");
        let mut deposits = vec![
            Deposit::new(patient.clone(), usd(1000), receipt(), Utc::now()).unwrap(),
            Deposit::new(patient.clone(), usd(2500), receipt(), Utc::now()).unwrap(),
        ];

        let draws = draw_credit(&mut deposits, usd(1800));

        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].amount, usd(1000));
        assert_eq!(draws[1].amount, usd(800));
        assert_eq!(deposits[0].credit_remaining(), Decimal::ZERO);
        assert_eq!(deposits[1].credit_remaining(), usd(1700));
    }

    #[test]
    fn test_draw_credit_caps_at_available() {
        let patient = PatientId::new("1");
        let mut deposits =
            vec![Deposit::new(patient, usd(500), receipt(), Utc::now()).unwrap()];

        let draws = draw_credit(&mut deposits, usd(9000));
        let total: Decimal = draws.iter().map(|d| d.amount).sum();
        assert_eq!(total, usd(500));
        assert_eq!(deposits[0].credit_remaining(), Decimal::ZERO);
    }

    #[test]
    fn test_plan_deposit_surplus_and_shortfall() {
        let patient = PatientId::new("1");
        let debts = vec![
            Debt::new(patient.clone(), DebtCategory::Store, usd(4000), Utc::now()).unwrap(),
            Debt::new(patient, DebtCategory::Store, usd(6000), Utc::now()).unwrap(),
        ];

        let short = plan_deposit(usd(7000), &debts).unwrap();
        assert_eq!(short.applied, usd(7000));
        assert_eq!(short.credit, Decimal::ZERO);
        assert_eq!(short.shortfall, usd(3000));

        let surplus = plan_deposit(usd(12000), &debts).unwrap();
        assert_eq!(surplus.applied, usd(10000));
        assert_eq!(surplus.credit, usd(2000));
        assert_eq!(surplus.shortfall, Decimal::ZERO);

        let none = plan_deposit(usd(5000), &[]).unwrap();
        assert_eq!(none.applied, Decimal::ZERO);
        assert_eq!(none.credit, usd(5000));
    }

    #[test]
    fn test_charge_consumes_credit_across_deposits() {
        let (engine, _temp) = test_engine();
        let patient = PatientId::new("42");
        let now = Utc::now();

        engine
            .register_deposit(&patient, usd(1000), receipt(), &[], now - Duration::days(2))
            .unwrap();
        engine
            .register_deposit(&patient, usd(1500), receipt(), &[], now - Duration::days(1))
            .unwrap();

        let outcome = engine
            .register_charge(&patient, DebtCategory::Medication, usd(2000), now)
            .unwrap();

        assert!(outcome.debt.is_paid());
        assert!(outcome.debt.is_credit_applied());
        assert_eq!(outcome.credit_used, usd(2000));
        assert_eq!(outcome.draws.len(), 2);
        assert_eq!(engine.deposits().total_credit(&patient).unwrap(), usd(500));
        assert!(engine.debts().list_outstanding(&patient).unwrap().is_empty());
    }

    #[test]
    fn test_deposit_in_caller_order() {
        let (engine, _temp) = test_engine();
        let patient = PatientId::new("42");
        let now = Utc::now();

        let older = engine
            .register_charge(&patient, DebtCategory::Store, usd(3000), now - Duration::days(1))
            .unwrap()
            .debt;
        let newer = engine
            .register_charge(&patient, DebtCategory::Store, usd(3000), now)
            .unwrap()
            .debt;

        // Newest first on purpose
        let outcome = engine
            .register_deposit(&patient, usd(4000), receipt(), &[newer.id(), older.id()], now)
            .unwrap();

        assert_eq!(outcome.coverages[0].debt_id, newer.id());
        assert!(outcome.coverages[0].paid);
        assert_eq!(outcome.coverages[1].amount, usd(1000));
        assert_eq!(engine.debts().get(older.id()).unwrap().remaining(), usd(2000));
    }

    #[test]
    fn test_duplicate_selection_counts_once() {
        let (engine, _temp) = test_engine();
        let patient = PatientId::new("42");

        let debt = engine
            .register_charge(&patient, DebtCategory::Store, usd(2000), Utc::now())
            .unwrap()
            .debt;

        let outcome = engine
            .register_deposit(&patient, usd(5000), receipt(), &[debt.id(), debt.id()], Utc::now())
            .unwrap();

        assert_eq!(outcome.deposit.applied_amount(), usd(2000));
        assert_eq!(outcome.deposit.credit_remaining(), usd(3000));
    }

    #[test]
    fn test_foreign_debt_fails_without_effect() {
        let (engine, _temp) = test_engine();
        let owner = PatientId::new("1");
        let other = PatientId::new("2");

        let debt = engine
            .register_charge(&owner, DebtCategory::Store, usd(2000), Utc::now())
            .unwrap()
            .debt;

        let result = engine.register_deposit(&other, usd(2000), receipt(), &[debt.id()], Utc::now());
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(engine.deposits().list(&other).unwrap().is_empty());
        assert_eq!(engine.debts().get(debt.id()).unwrap().covered_amount(), Decimal::ZERO);
    }

    #[test]
    fn test_preview_does_not_write() {
        let (engine, _temp) = test_engine();
        let patient = PatientId::new("42");
        let debt = engine
            .register_charge(&patient, DebtCategory::Store, usd(8000), Utc::now())
            .unwrap()
            .debt;

        let preview = engine.preview_deposit(&patient, usd(5000), &[debt.id()]).unwrap();
        assert_eq!(preview.shortfall, usd(3000));
        assert_eq!(engine.debts().outstanding_total(&patient).unwrap(), usd(8000));
        assert!(engine.deposits().list(&patient).unwrap().is_empty());
    }

    #[test]
    fn test_create_debt_is_gated() {
        let (engine, _temp) = test_engine();
        let patient = PatientId::new("42");

        engine
            .create_debt(&patient, DebtCategory::MonthlyFee, usd(150000), Utc::now())
            .unwrap();
        engine.request_cut(&patient, Utc::now()).unwrap();

        let result = engine.create_debt(&patient, DebtCategory::Store, usd(100), Utc::now());
        assert!(matches!(result, Err(Error::Blocked(_))));
        assert_eq!(engine.debts().list(&patient).unwrap().len(), 1);
    }

    #[test]
    fn test_credit_only_deposit_resolves_pending_cut() {
        let (engine, _temp) = test_engine();
        let patient = PatientId::new("42");
        let now = Utc::now();

        engine
            .create_debt(&patient, DebtCategory::Store, usd(9000), now)
            .unwrap();
        let cut = engine.request_cut(&patient, now).unwrap();

        let outcome = engine
            .register_deposit(&patient, usd(1000), receipt(), &[], now + Duration::minutes(1))
            .unwrap();
        assert!(outcome.coverages.is_empty());
        assert_eq!(outcome.deposit.credit_remaining(), usd(1000));
        assert_eq!(outcome.resolved_cut.map(|c| c.id()), Some(cut.id()));
        assert!(!engine.gate().is_blocked(&patient).unwrap());
    }

    #[test]
    fn test_oversized_amounts_rejected_and_totals_hold() {
        let (engine, _temp) = test_engine();
        let patient = PatientId::new("42");
        let now = Utc::now();

        let huge = engine.register_deposit(&patient, Decimal::MAX, receipt(), &[], now);
        assert!(matches!(huge, Err(Error::Validation(_))));
        let huge_charge = engine.register_charge(&patient, DebtCategory::Store, Decimal::MAX, now);
        assert!(matches!(huge_charge, Err(Error::Validation(_))));
        assert!(engine.deposits().list(&patient).unwrap().is_empty());

        let cap = crate::types::max_amount();
        for i in 0..3 {
            engine
                .register_deposit(&patient, cap, receipt(), &[], now + Duration::seconds(i))
                .unwrap();
        }
        assert_eq!(engine.deposits().total_credit(&patient).unwrap(), cap * Decimal::from(3));

        let outcome = engine
            .register_charge(&patient, DebtCategory::Other, cap, now + Duration::minutes(1))
            .unwrap();
        assert!(outcome.debt.is_paid());
        assert_eq!(engine.deposits().total_credit(&patient).unwrap(), cap * Decimal::from(2));
    }
}
