//! Actor-based concurrency for the caja ledger
//!
//! Single writer per patient using Tokio actors:
//! - Patients are routed by a stable hash to one of N shard actors
//! - Each shard drains its mailbox sequentially, so the read-modify-write
//!   flows of one patient never interleave
//! - Different shards run in parallel
//! - Bounded mailboxes give backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    CajaLedger                         │
//! │          shard_for(patient_id) → LedgerHandle         │
//! └───────────┬──────────────────────────┬───────────────┘
//!             │ mpsc (bounded)           │ mpsc (bounded)
//!             ▼                          ▼
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │   LedgerActor #0     │   │   LedgerActor #N-1   │
//! │  AllocationEngine    │…  │  AllocationEngine    │
//! └───────────┬──────────┘   └───────────┬──────────┘
//!             └────────────┬─────────────┘
//!                          ▼
//!              Storage::commit() (WriteBatch)
//! ```

use crate::{
    allocation::{AllocationEngine, ChargeOutcome, DepositOutcome, DepositPreview},
    cash_cut::CashCut,
    debts::Debt,
    deposits::Deposit,
    journal::{self, JournalEntry},
    metrics::Metrics,
    types::{checked_total, DebtCategory, PatientId, ReceiptRef},
    Error, Result, Storage,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Pending cut with the debts behind it
#[derive(Debug, Clone)]
pub struct CutStatement {
    /// The pending cut
    pub cut: CashCut,
    /// Debts still outstanding, oldest first
    pub outstanding: Vec<Debt>,
    /// Current outstanding total (may differ from the snapshot)
    pub outstanding_total: Decimal,
}

/// Balance row of the caja overview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientBalance {
    /// Patient
    pub patient_id: PatientId,
    /// Sum of remaining balances
    pub outstanding_total: Decimal,
    /// Unapplied credit
    pub credit: Decimal,
    /// Snapshot total of the pending cut, if any
    pub pending_cut_total: Option<Decimal>,
}

/// Message sent to a shard actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Record a charge without consuming credit
    CreateDebt {
        patient_id: PatientId,
        category: DebtCategory,
        amount: Decimal,
        date: DateTime<Utc>,
        response: oneshot::Sender<Result<Debt>>,
    },

    /// Record a charge covered from credit
    RegisterCharge {
        patient_id: PatientId,
        category: DebtCategory,
        amount: Decimal,
        date: DateTime<Utc>,
        response: oneshot::Sender<Result<ChargeOutcome>>,
    },

    /// Record and apply a deposit
    RegisterDeposit {
        patient_id: PatientId,
        amount: Decimal,
        receipt_ref: Option<ReceiptRef>,
        selected_debt_ids: Vec<Uuid>,
        date: DateTime<Utc>,
        response: oneshot::Sender<Result<DepositOutcome>>,
    },

    /// Request a cash cut
    RequestCut {
        patient_id: PatientId,
        date: DateTime<Utc>,
        response: oneshot::Sender<Result<CashCut>>,
    },

    /// Outstanding debts, oldest first
    ListOutstanding {
        patient_id: PatientId,
        response: oneshot::Sender<Result<Vec<Debt>>>,
    },

    /// Sum of outstanding balances
    OutstandingTotal {
        patient_id: PatientId,
        response: oneshot::Sender<Result<Decimal>>,
    },

    /// Paid debts, newest first
    ListPaid {
        patient_id: PatientId,
        response: oneshot::Sender<Result<Vec<Debt>>>,
    },

    /// Deposits with credit, oldest first
    ListAvailableCredit {
        patient_id: PatientId,
        response: oneshot::Sender<Result<Vec<Deposit>>>,
    },

    /// Sum of unapplied credit
    TotalCredit {
        patient_id: PatientId,
        response: oneshot::Sender<Result<Decimal>>,
    },

    /// Deposits, newest first
    ListDeposits {
        patient_id: PatientId,
        response: oneshot::Sender<Result<Vec<Deposit>>>,
    },

    /// Pending cut present
    IsBlocked {
        patient_id: PatientId,
        response: oneshot::Sender<Result<bool>>,
    },

    /// Unresolved cut, if any
    PendingCut {
        patient_id: PatientId,
        response: oneshot::Sender<Result<Option<CashCut>>>,
    },

    /// Cuts, newest first
    ListCuts {
        patient_id: PatientId,
        response: oneshot::Sender<Result<Vec<CashCut>>>,
    },

    /// Pending cut with its outstanding debts
    CutStatement {
        patient_id: PatientId,
        response: oneshot::Sender<Result<Option<CutStatement>>>,
    },

    /// Dry-run a deposit
    PreviewDeposit {
        patient_id: PatientId,
        amount: Decimal,
        selected_debt_ids: Vec<Uuid>,
        response: oneshot::Sender<Result<DepositPreview>>,
    },

    /// Overview balance
    PatientBalance {
        patient_id: PatientId,
        response: oneshot::Sender<Result<PatientBalance>>,
    },

    /// Audit journal
    Journal {
        patient_id: PatientId,
        response: oneshot::Sender<Result<Vec<JournalEntry>>>,
    },

    /// Re-hash the journal chain
    VerifyJournal {
        patient_id: PatientId,
        response: oneshot::Sender<Result<()>>,
    },

    /// Verify row invariants, money conservation and the journal chain
    CheckInvariants {
        patient_id: PatientId,
        response: oneshot::Sender<Result<()>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns one shard of patients
#[derive(Debug)]
pub struct LedgerActor {
    /// Shard index
    shard: usize,

    /// Write flows
    engine: AllocationEngine,

    /// Shared metrics
    metrics: Arc<Metrics>,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        shard: usize,
        storage: Arc<Storage>,
        metrics: Arc<Metrics>,
        mailbox: mpsc::Receiver<LedgerMessage>,
    ) -> Self {
        Self {
            shard,
            engine: AllocationEngine::new(storage),
            metrics,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        tracing::debug!(shard = self.shard, "Ledger shard started");

        while let Some(msg) = self.mailbox.recv().await {
            if let LedgerMessage::Shutdown = msg {
                break;
            }
            self.handle_message(msg);
        }

        tracing::debug!(shard = self.shard, "Ledger shard stopped");
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::CreateDebt {
                patient_id,
                category,
                amount,
                date,
                response,
            } => {
                let started = Instant::now();
                let result = self.engine.create_debt(&patient_id, category, amount, date);
                if result.is_ok() {
                    self.metrics.record_charge(Decimal::ZERO);
                }
                self.finish_write(started, &result);
                let _ = response.send(result);
            }

            LedgerMessage::RegisterCharge {
                patient_id,
                category,
                amount,
                date,
                response,
            } => {
                let started = Instant::now();
                let result = self.engine.register_charge(&patient_id, category, amount, date);
                if let Ok(outcome) = &result {
                    self.metrics.record_charge(outcome.credit_used);
                }
                self.finish_write(started, &result);
                let _ = response.send(result);
            }

            LedgerMessage::RegisterDeposit {
                patient_id,
                amount,
                receipt_ref,
                selected_debt_ids,
                date,
                response,
            } => {
                let started = Instant::now();
                let result = self.engine.register_deposit(
                    &patient_id,
                    amount,
                    receipt_ref,
                    &selected_debt_ids,
                    date,
                );
                if result.is_ok() {
                    self.metrics.record_deposit();
                }
                self.finish_write(started, &result);
                let _ = response.send(result);
            }

            LedgerMessage::RequestCut {
                patient_id,
                date,
                response,
            } => {
                let started = Instant::now();
                let result = self.engine.request_cut(&patient_id, date);
                if result.is_ok() {
                    self.metrics.record_cut();
                }
                self.finish_write(started, &result);
                let _ = response.send(result);
            }

            LedgerMessage::ListOutstanding { patient_id, response } => {
                let _ = response.send(self.engine.debts().list_outstanding(&patient_id));
            }

            LedgerMessage::OutstandingTotal { patient_id, response } => {
                let _ = response.send(self.engine.debts().outstanding_total(&patient_id));
            }

            LedgerMessage::ListPaid { patient_id, response } => {
                let _ = response.send(self.engine.debts().list_paid(&patient_id));
            }

            LedgerMessage::ListAvailableCredit { patient_id, response } => {
                let _ = response.send(self.engine.deposits().list_available_credit(&patient_id));
            }

            LedgerMessage::TotalCredit { patient_id, response } => {
                let _ = response.send(self.engine.deposits().total_credit(&patient_id));
            }

            LedgerMessage::ListDeposits { patient_id, response } => {
                let _ = response.send(self.engine.deposits().history(&patient_id));
            }

            LedgerMessage::IsBlocked { patient_id, response } => {
                let _ = response.send(self.engine.gate().is_blocked(&patient_id));
            }

            LedgerMessage::PendingCut { patient_id, response } => {
                let _ = response.send(self.engine.gate().pending_cut(&patient_id));
            }

            LedgerMessage::ListCuts { patient_id, response } => {
                let _ = response.send(self.engine.gate().history(&patient_id));
            }

            LedgerMessage::CutStatement { patient_id, response } => {
                let _ = response.send(self.cut_statement(&patient_id));
            }

            LedgerMessage::PreviewDeposit {
                patient_id,
                amount,
                selected_debt_ids,
                response,
            } => {
                let _ = response.send(self.engine.preview_deposit(
                    &patient_id,
                    amount,
                    &selected_debt_ids,
                ));
            }

            LedgerMessage::PatientBalance { patient_id, response } => {
                let _ = response.send(self.patient_balance(&patient_id));
            }

            LedgerMessage::Journal { patient_id, response } => {
                let _ = response.send(self.engine.storage().journal(&patient_id));
            }

            LedgerMessage::VerifyJournal { patient_id, response } => {
                let result = self
                    .engine
                    .storage()
                    .journal(&patient_id)
                    .and_then(|entries| journal::verify_chain(&entries));
                let _ = response.send(result);
            }

            LedgerMessage::CheckInvariants { patient_id, response } => {
                let _ = response.send(self.check_invariants(&patient_id));
            }

            LedgerMessage::Shutdown => {
                // Handled in run loop
            }
        }
    }

    fn finish_write<T>(&self, started: Instant, result: &Result<T>) {
        self.metrics.record_duration(started.elapsed().as_secs_f64());
        if let Err(e) = result {
            if e.is_client_error() {
                tracing::warn!(shard = self.shard, reason = e.reason(), "Operation refused: {}", e);
            } else {
                tracing::error!(shard = self.shard, "Operation failed: {}", e);
            }
            self.metrics.record_rejection(e.reason());
        }
    }

    fn cut_statement(&self, patient_id: &PatientId) -> Result<Option<CutStatement>> {
        let Some(cut) = self.engine.gate().pending_cut(patient_id)? else {
            return Ok(None);
        };
        let outstanding = self.engine.debts().list_outstanding(patient_id)?;
        let outstanding_total = checked_total(outstanding.iter().map(Debt::remaining))?;
        Ok(Some(CutStatement {
            cut,
            outstanding,
            outstanding_total,
        }))
    }

    fn patient_balance(&self, patient_id: &PatientId) -> Result<PatientBalance> {
        Ok(PatientBalance {
            patient_id: patient_id.clone(),
            outstanding_total: self.engine.debts().outstanding_total(patient_id)?,
            credit: self.engine.deposits().total_credit(patient_id)?,
            pending_cut_total: self
                .engine
                .gate()
                .pending_cut(patient_id)?
                .map(|cut| cut.total_amount()),
        })
    }

    fn check_invariants(&self, patient_id: &PatientId) -> Result<()> {
        let debts = self.engine.debts().list(patient_id)?;
        let deposits = self.engine.deposits().list(patient_id)?;

        for debt in &debts {
            debt.check_invariants()?;
        }
        for deposit in &deposits {
            deposit.check_invariants()?;
        }

        // Every covered cent came out of some deposit
        let covered = checked_total(debts.iter().map(Debt::covered_amount))?;
        let applied = checked_total(deposits.iter().map(Deposit::applied_amount))?;
        if covered != applied {
            return Err(Error::InvariantViolation(format!(
                "Patient {} debts covered {} but deposits applied {}",
                patient_id, covered, applied
            )));
        }

        let cuts = self.engine.gate().history(patient_id)?;
        if cuts.iter().filter(|c| !c.is_resolved()).count() > 1 {
            return Err(Error::InvariantViolation(format!(
                "Patient {} has more than one unresolved cash cut",
                patient_id
            )));
        }

        journal::verify_chain(&self.engine.storage().journal(patient_id)?)
    }
}

/// Handle for sending messages to one shard actor
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    /// Send a request and wait for its response
    pub async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Stable shard index of a patient
pub fn shard_for(patient_id: &PatientId, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    patient_id.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

/// Spawn `shards` ledger actors over shared storage
pub fn spawn_ledger_actors(
    storage: Arc<Storage>,
    metrics: Arc<Metrics>,
    shards: usize,
    mailbox_capacity: usize,
) -> Vec<LedgerHandle> {
    (0..shards.max(1))
        .map(|shard| {
            let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
            let actor = LedgerActor::new(shard, storage.clone(), metrics.clone(), rx);

            tokio::spawn(async move {
                actor.run().await;
            });

            LedgerHandle::new(tx)
        })
        .collect()
}
