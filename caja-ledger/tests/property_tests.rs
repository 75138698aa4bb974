//! Property-based tests for caja ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Money conservation: Σ(debt covered) == Σ(deposit applied)
//! - Balance identities: outstanding and credit totals match the rows
//! - Gate exclusivity: a pending cut refuses every charge
//! - Amount precision: more than two decimal places is rejected
//! - Selection bound: a deposit applies min(amount, Σ selected remaining)

use caja_ledger::{CajaLedger, Config, DebtCategory, Error, PatientId, ReceiptRef};
use chrono::{Duration, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use tempfile::TempDir;

/// One step of a patient's caja history
#[derive(Debug, Clone)]
enum Op {
    Charge(i64),
    Debt(i64),
    Deposit { cents: i64, select_outstanding: bool },
    Cut,
}

/// Strategy for generating valid amounts (positive, two decimals)
fn cents_strategy() -> impl Strategy<Value = i64> {
    1i64..50_000i64
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => cents_strategy().prop_map(Op::Charge),
        1 => cents_strategy().prop_map(Op::Debt),
        3 => (cents_strategy(), any::<bool>())
            .prop_map(|(cents, select_outstanding)| Op::Deposit { cents, select_outstanding }),
        1 => Just(Op::Cut),
    ]
}

/// Create test ledger with temp directory
async fn create_test_ledger() -> (CajaLedger, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.actors.shards = 1;

    (CajaLedger::open(config).await.unwrap(), temp_dir)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: any history keeps money conserved and totals consistent
    #[test]
    fn prop_money_conservation(ops in prop::collection::vec(op_strategy(), 1..25)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let patient = PatientId::new("prop-patient");
            let start = Utc::now();

            let mut charged = Decimal::ZERO;
            let mut deposited = Decimal::ZERO;

            for (i, op) in ops.iter().enumerate() {
                let date = start + Duration::seconds(i as i64);
                let blocked = ledger.is_blocked(&patient).await.unwrap();

                match op {
                    Op::Charge(cents) => {
                        let result = ledger
                            .register_charge(&patient, DebtCategory::Store, Decimal::new(*cents, 2), date)
                            .await;
                        if blocked {
                            prop_assert!(matches!(result, Err(Error::Blocked(_))));
                        } else {
                            let outcome = result.unwrap();
                            prop_assert!(outcome.credit_used <= outcome.debt.amount());
                            charged += outcome.debt.amount();
                        }
                    }
                    Op::Debt(cents) => {
                        let result = ledger
                            .create_debt(&patient, DebtCategory::Other, Decimal::new(*cents, 2), date)
                            .await;
                        if blocked {
                            prop_assert!(matches!(result, Err(Error::Blocked(_))));
                        } else {
                            let debt = result.unwrap();
                            prop_assert_eq!(debt.covered_amount(), Decimal::ZERO);
                            charged += debt.amount();
                        }
                    }
                    Op::Deposit { cents, select_outstanding } => {
                        let selected = if *select_outstanding {
                            ledger
                                .list_outstanding(&patient)
                                .await
                                .unwrap()
                                .iter()
                                .map(|d| d.id())
                                .collect()
                        } else {
                            vec![]
                        };
                        let outcome = ledger
                            .register_deposit(
                                &patient,
                                Decimal::new(*cents, 2),
                                Some(ReceiptRef::new(format!("R-{}", i))),
                                selected,
                                date,
                            )
                            .await
                            .unwrap();
                        prop_assert_eq!(outcome.resolved_cut.is_some(), blocked);
                        prop_assert!(!ledger.is_blocked(&patient).await.unwrap());
                        deposited += outcome.deposit.amount();
                    }
                    Op::Cut => {
                        let outstanding = ledger.outstanding_total(&patient).await.unwrap();
                        let result = ledger.request_cut(&patient, date).await;
                        if blocked || outstanding == Decimal::ZERO {
                            prop_assert!(matches!(result, Err(Error::Conflict(_))));
                        } else {
                            prop_assert_eq!(result.unwrap().total_amount(), outstanding);
                        }
                    }
                }
            }

            ledger.check_invariants(&patient).await.unwrap();

            // charged - covered == outstanding, deposited - applied == credit,
            // and covered == applied, so the two sides meet
            let outstanding = ledger.outstanding_total(&patient).await.unwrap();
            let credit = ledger.total_credit(&patient).await.unwrap();
            prop_assert_eq!(charged - outstanding, deposited - credit);

            let balance = ledger.patient_balance(&patient).await.unwrap();
            prop_assert_eq!(balance.outstanding_total, outstanding);
            prop_assert_eq!(balance.credit, credit);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: a charge never uses more credit than was available
    #[test]
    fn prop_charge_draws_at_most_available(deposit in cents_strategy(), charge in cents_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let patient = PatientId::new("draw");
            let now = Utc::now();

            ledger
                .register_deposit(&patient, Decimal::new(deposit, 2), Some(ReceiptRef::new("R")), vec![], now)
                .await
                .unwrap();
            let outcome = ledger
                .register_charge(&patient, DebtCategory::Medication, Decimal::new(charge, 2), now + Duration::seconds(1))
                .await
                .unwrap();

            let expected = Decimal::new(deposit.min(charge), 2);
            prop_assert_eq!(outcome.credit_used, expected);
            prop_assert_eq!(outcome.debt.covered_amount(), expected);
            prop_assert_eq!(outcome.debt.is_paid(), deposit >= charge);
            prop_assert_eq!(
                ledger.total_credit(&patient).await.unwrap(),
                Decimal::new(deposit - deposit.min(charge), 2)
            );

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: sub-cent amounts are refused, never rounded
    #[test]
    fn prop_sub_cent_amounts_rejected(mills in 1i64..1_000_000i64) {
        prop_assume!(mills % 10 != 0);

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let patient = PatientId::new("precision");

            let result = ledger
                .register_charge(&patient, DebtCategory::Store, Decimal::new(mills, 3), Utc::now())
                .await;
            prop_assert!(matches!(result, Err(Error::Validation(_))));
            prop_assert_eq!(ledger.stats().unwrap().total_debts, 0);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}

/// Debts of a patient: amount in cents and whether it is paid off up front
fn debt_set_strategy() -> impl Strategy<Value = Vec<(i64, bool)>> {
    prop::collection::vec((cents_strategy(), prop::bool::weighted(0.3)), 1..6)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: a deposit applies exactly min(amount, Σ remaining of the
    /// distinct outstanding selected debts), and the rest is credit
    #[test]
    fn prop_deposit_applies_bounded_by_selection(
        debts in debt_set_strategy(),
        picks in prop::collection::vec(0usize..6, 0..8),
        amount in cents_strategy(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (ledger, _temp) = create_test_ledger().await;
            let patient = PatientId::new("selection");
            let start = Utc::now();

            let mut rows = Vec::new();
            for (i, (cents, _)) in debts.iter().enumerate() {
                let debt = ledger
                    .create_debt(&patient, DebtCategory::Store, Decimal::new(*cents, 2), start + Duration::seconds(i as i64))
                    .await
                    .unwrap();
                rows.push(debt);
            }
            for (i, (cents, paid)) in debts.iter().enumerate() {
                if *paid {
                    ledger
                        .register_deposit(
                            &patient,
                            Decimal::new(*cents, 2),
                            Some(ReceiptRef::new(format!("PRE-{}", i))),
                            vec![rows[i].id()],
                            start + Duration::minutes(1),
                        )
                        .await
                        .unwrap();
                }
            }

            // Picks may repeat and may point at paid debts
            let selected: Vec<_> = picks
                .iter()
                .filter(|&&p| p < rows.len())
                .map(|&p| rows[p].id())
                .collect();
            let mut seen = std::collections::HashSet::new();
            let selectable: Decimal = picks
                .iter()
                .filter(|&&p| p < rows.len() && !debts[p].1 && seen.insert(p))
                .map(|&p| rows[p].amount())
                .sum();
            let amount = Decimal::new(amount, 2);
            let expected = amount.min(selectable);

            // Queries leave rows and journal untouched
            let journal_before = ledger.journal(&patient).await.unwrap().len();
            let stats_before = ledger.stats().unwrap();
            let outstanding = ledger.list_outstanding(&patient).await.unwrap();
            let credit = ledger.total_credit(&patient).await.unwrap();
            prop_assert_eq!(ledger.list_outstanding(&patient).await.unwrap(), outstanding);
            prop_assert_eq!(ledger.total_credit(&patient).await.unwrap(), credit);
            let preview = ledger
                .preview_deposit(&patient, amount, selected.clone())
                .await
                .unwrap();
            prop_assert_eq!(ledger.journal(&patient).await.unwrap().len(), journal_before);
            let stats_after = ledger.stats().unwrap();
            prop_assert_eq!(stats_after.total_debts, stats_before.total_debts);
            prop_assert_eq!(stats_after.total_deposits, stats_before.total_deposits);

            let outcome = ledger
                .register_deposit(
                    &patient,
                    amount,
                    Some(ReceiptRef::new("MAIN")),
                    selected,
                    start + Duration::minutes(2),
                )
                .await
                .unwrap();

            prop_assert_eq!(preview.applied, expected);
            prop_assert_eq!(outcome.deposit.applied_amount(), expected);
            prop_assert_eq!(
                outcome.deposit.applied_amount() + outcome.deposit.credit_remaining(),
                amount
            );
            prop_assert!(outcome.coverages.iter().all(|c| c.amount > Decimal::ZERO));

            ledger.check_invariants(&patient).await.unwrap();
            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}
