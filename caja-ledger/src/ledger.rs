//! Main ledger orchestration layer
//!
//! Ties storage, the allocation engine and the shard actors together into
//! the high-level API a caja front end calls.
//!
//! # Example
//!
//! ```no_run
//! use caja_ledger::{CajaLedger, Config, DebtCategory, PatientId};
//! use chrono::Utc;
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> caja_ledger::Result<()> {
//!     let ledger = CajaLedger::open(Config::default()).await?;
//!     let patient = PatientId::new("1234");
//!
//!     let outcome = ledger
//!         .register_charge(&patient, DebtCategory::Store, Decimal::new(4550, 2), Utc::now())
//!         .await?;
//!     println!("credit used: {}", outcome.credit_used);
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{
        shard_for, spawn_ledger_actors, CutStatement, LedgerHandle, LedgerMessage,
        PatientBalance,
    },
    allocation::{ChargeOutcome, DepositOutcome, DepositPreview},
    cash_cut::CashCut,
    debts::Debt,
    deposits::Deposit,
    journal::JournalEntry,
    metrics::Metrics,
    storage::StorageStats,
    types::{DebtCategory, PatientId, ReceiptRef},
    Config, Error, Result, Storage,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Main ledger interface
pub struct CajaLedger {
    /// One handle per writer shard
    shards: Vec<LedgerHandle>,

    /// Direct storage access (for id lookups)
    storage: Arc<Storage>,

    /// Shared metrics
    metrics: Arc<Metrics>,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for CajaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CajaLedger")
            .field("shards", &self.shards.len())
            .field("data_dir", &self.config.data_dir)
            .finish()
    }
}

impl CajaLedger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Arc::new(
            Metrics::new().map_err(|e| Error::Config(format!("Metrics setup failed: {}", e)))?,
        );

        let shards = spawn_ledger_actors(
            storage.clone(),
            metrics.clone(),
            config.actors.shards,
            config.actors.mailbox_capacity,
        );

        tracing::info!(
            data_dir = %config.data_dir.display(),
            shards = shards.len(),
            "Caja ledger opened"
        );

        Ok(Self {
            shards,
            storage,
            metrics,
            config,
        })
    }

    /// Shard handle for a validated patient
    fn route(&self, patient_id: &PatientId) -> Result<&LedgerHandle> {
        patient_id.validate()?;
        self.shards
            .get(shard_for(patient_id, self.shards.len()))
            .ok_or_else(|| Error::Concurrency("No ledger shard available".to_string()))
    }

    // ===== Debt ledger =====

    /// Record a charge that does not touch existing credit
    pub async fn create_debt(
        &self,
        patient_id: &PatientId,
        category: DebtCategory,
        amount: Decimal,
        date: DateTime<Utc>,
    ) -> Result<Debt> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::CreateDebt {
                patient_id,
                category,
                amount,
                date,
                response,
            })
            .await
    }

    /// Outstanding debts, oldest first
    pub async fn list_outstanding(&self, patient_id: &PatientId) -> Result<Vec<Debt>> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::ListOutstanding { patient_id, response })
            .await
    }

    /// Sum of remaining balances
    pub async fn outstanding_total(&self, patient_id: &PatientId) -> Result<Decimal> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::OutstandingTotal { patient_id, response })
            .await
    }

    /// Fully paid debts, newest first
    pub async fn list_paid(&self, patient_id: &PatientId) -> Result<Vec<Debt>> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::ListPaid { patient_id, response })
            .await
    }

    /// Look up a debt by id
    pub fn get_debt(&self, debt_id: Uuid) -> Result<Debt> {
        self.storage.get_debt(debt_id)
    }

    // ===== Deposit ledger =====

    /// Deposits that still carry credit, oldest first
    pub async fn list_available_credit(&self, patient_id: &PatientId) -> Result<Vec<Deposit>> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::ListAvailableCredit { patient_id, response })
            .await
    }

    /// Sum of unapplied credit
    pub async fn total_credit(&self, patient_id: &PatientId) -> Result<Decimal> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::TotalCredit { patient_id, response })
            .await
    }

    /// All deposits, newest first
    pub async fn list_deposits(&self, patient_id: &PatientId) -> Result<Vec<Deposit>> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::ListDeposits { patient_id, response })
            .await
    }

    /// Look up a deposit by id
    pub fn get_deposit(&self, deposit_id: Uuid) -> Result<Deposit> {
        self.storage.get_deposit(deposit_id)
    }

    // ===== Allocation =====

    /// Record a charge and cover it from existing credit, oldest deposit first
    pub async fn register_charge(
        &self,
        patient_id: &PatientId,
        category: DebtCategory,
        amount: Decimal,
        date: DateTime<Utc>,
    ) -> Result<ChargeOutcome> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::RegisterCharge {
                patient_id,
                category,
                amount,
                date,
                response,
            })
            .await
    }

    /// Record a deposit, apply it to the selected debts in the given order
    /// and resolve any pending cut
    pub async fn register_deposit(
        &self,
        patient_id: &PatientId,
        amount: Decimal,
        receipt_ref: Option<ReceiptRef>,
        selected_debt_ids: Vec<Uuid>,
        date: DateTime<Utc>,
    ) -> Result<DepositOutcome> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::RegisterDeposit {
                patient_id,
                amount,
                receipt_ref,
                selected_debt_ids,
                date,
                response,
            })
            .await
    }

    /// What `register_deposit` would apply, without writing anything
    pub async fn preview_deposit(
        &self,
        patient_id: &PatientId,
        amount: Decimal,
        selected_debt_ids: Vec<Uuid>,
    ) -> Result<DepositPreview> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::PreviewDeposit {
                patient_id,
                amount,
                selected_debt_ids,
                response,
            })
            .await
    }

    // ===== Cash-cut gate =====

    /// Freeze charging behind a cut over the current outstanding total
    pub async fn request_cut(&self, patient_id: &PatientId, date: DateTime<Utc>) -> Result<CashCut> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::RequestCut {
                patient_id,
                date,
                response,
            })
            .await
    }

    /// True while a pending cut exists
    pub async fn is_blocked(&self, patient_id: &PatientId) -> Result<bool> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::IsBlocked { patient_id, response })
            .await
    }

    /// Unresolved cut, if any
    pub async fn pending_cut(&self, patient_id: &PatientId) -> Result<Option<CashCut>> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::PendingCut { patient_id, response })
            .await
    }

    /// Pending cut with the debts it is waiting on
    pub async fn cut_statement(&self, patient_id: &PatientId) -> Result<Option<CutStatement>> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::CutStatement { patient_id, response })
            .await
    }

    /// All cuts, newest first
    pub async fn list_cuts(&self, patient_id: &PatientId) -> Result<Vec<CashCut>> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::ListCuts { patient_id, response })
            .await
    }

    // ===== Overview and audit =====

    /// Outstanding, credit and pending cut in one read
    pub async fn patient_balance(&self, patient_id: &PatientId) -> Result<PatientBalance> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::PatientBalance { patient_id, response })
            .await
    }

    /// Audit journal in sequence order
    pub async fn journal(&self, patient_id: &PatientId) -> Result<Vec<JournalEntry>> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::Journal { patient_id, response })
            .await
    }

    /// Re-hash the journal chain, `InvariantViolation` on a break
    pub async fn verify_journal(&self, patient_id: &PatientId) -> Result<()> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::VerifyJournal { patient_id, response })
            .await
    }

    /// Check money conservation, row invariants and the journal hash chain
    pub async fn check_invariants(&self, patient_id: &PatientId) -> Result<()> {
        let patient_id = patient_id.clone();
        self.route(&patient_id)?
            .request(|response| LedgerMessage::CheckInvariants { patient_id, response })
            .await
    }

    /// Row counts across all patients
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration the ledger was opened with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop every shard actor
    pub async fn shutdown(self) -> Result<()> {
        for handle in &self.shards {
            handle.shutdown().await?;
        }
        tracing::info!("Caja ledger shut down");
        Ok(())
    }
}
