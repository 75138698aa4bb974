//! Caja Ledger
//!
//! Per-patient debt/deposit reconciliation for a clinic cashier.
//!
//! # Architecture
//!
//! - **Debt Ledger**: Charges with a covered amount that only grows
//! - **Deposit Ledger**: Receipt-backed payments with unapplied credit
//! - **Allocation Engine**: Oldest-first matching of credit to debts
//! - **Cash-Cut Gate**: A pending cut freezes charging until a deposit lands
//! - **Single Writer**: One actor shard per patient eliminates races
//!
//! # Invariants
//!
//! - Money conservation: Σ(debt covered) == Σ(deposit applied) per patient
//! - 0 ≤ covered ≤ amount, 0 ≤ applied ≤ amount, paid ⇔ covered == amount
//! - At most one pending cash cut per patient
//! - Every write commits in one atomic batch with its journal entries

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod journal;
pub mod debts;
pub mod deposits;
pub mod cash_cut;
pub mod allocation;
pub mod ledger;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result};
pub use types::{DebtCategory, PatientId, ReceiptRef};
pub use debts::Debt;
pub use deposits::Deposit;
pub use cash_cut::{CashCut, CutStatus};
pub use allocation::{ChargeOutcome, CreditDraw, DebtCoverage, DepositOutcome, DepositPreview};
pub use actor::{CutStatement, PatientBalance};
pub use journal::{JournalEntry, JournalKind};
pub use ledger::CajaLedger;
pub use config::Config;
pub use storage::Storage;
