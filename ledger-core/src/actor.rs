//! Actor-based concurrency for the ledger
//!
//! A single task owns the [`Ledger`] and drains a bounded mailbox, so commands
//! from any number of [`LedgerHandle`] clones are applied one at a time in
//! arrival order. A full mailbox applies backpressure to senders.
//!
//! ```text
//!   LedgerHandle (Clone) ──┐
//!   LedgerHandle (Clone) ──┼── mpsc::channel (bounded) ──▶ LedgerActor ──▶ Ledger
//!   LedgerHandle (Clone) ──┘                                   │
//!                                                              ▼
//!                                                           Metrics
//! ```

use crate::command::{Command, Receipt};
use crate::events::EventRecord;
use crate::ledger::Ledger;
use crate::metrics::Metrics;
use crate::types::{Amount, EscrowId, EscrowRecord, JobId, JobRecord, Principal};
use crate::{Error, Result};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Apply a command
    Submit {
        caller: Principal,
        command: Command,
        response: oneshot::Sender<Result<Receipt>>,
    },

    /// Get a job record
    GetJob {
        job_id: JobId,
        response: oneshot::Sender<Result<JobRecord>>,
    },

    /// Get an escrow record
    GetEscrow {
        escrow_id: EscrowId,
        response: oneshot::Sender<Result<EscrowRecord>>,
    },

    /// Role check
    IsAuthorized {
        job_id: JobId,
        account: Principal,
        response: oneshot::Sender<Result<bool>>,
    },

    /// Reward credit balance
    RewardBalance {
        account: Principal,
        response: oneshot::Sender<Amount>,
    },

    /// Escrow payouts received by an account
    PayoutBalance {
        account: Principal,
        response: oneshot::Sender<Amount>,
    },

    /// Event records from a sequence number on
    EventsSince {
        from: u64,
        response: oneshot::Sender<Vec<EventRecord>>,
    },

    /// Current world-state version
    Version { response: oneshot::Sender<u64> },

    /// Check hash chain and value invariants
    VerifyInvariants {
        response: oneshot::Sender<Result<()>>,
    },

    /// Serialize the world state
    Snapshot {
        response: oneshot::Sender<Result<Vec<u8>>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
#[derive(Debug)]
pub struct LedgerActor {
    /// The world state
    ledger: Ledger,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Metrics sink
    metrics: Metrics,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(ledger: Ledger, mailbox: mpsc::Receiver<LedgerMessage>, metrics: Metrics) -> Self {
        Self {
            ledger,
            mailbox,
            metrics,
        }
    }

    /// Run until shutdown or until every handle is dropped, then hand the
    /// ledger back
    pub async fn run(mut self) -> Ledger {
        while let Some(msg) = self.mailbox.recv().await {
            if let LedgerMessage::Shutdown = msg {
                tracing::info!(version = self.ledger.version(), "Ledger actor shutting down");
                break;
            }
            self.handle_message(msg);
        }
        self.ledger
    }

    /// Handle a single message
    fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::Submit {
                caller,
                command,
                response,
            } => {
                let result = self.submit(&caller, command);
                let _ = response.send(result);
            }

            LedgerMessage::GetJob { job_id, response } => {
                let _ = response.send(self.ledger.job(job_id).cloned());
            }

            LedgerMessage::GetEscrow {
                escrow_id,
                response,
            } => {
                let _ = response.send(self.ledger.escrow(escrow_id).cloned());
            }

            LedgerMessage::IsAuthorized {
                job_id,
                account,
                response,
            } => {
                let _ = response.send(self.ledger.is_authorized(job_id, &account));
            }

            LedgerMessage::RewardBalance { account, response } => {
                let _ = response.send(self.ledger.reward_balance(&account));
            }

            LedgerMessage::PayoutBalance { account, response } => {
                let _ = response.send(self.ledger.escrows().payout_balance(&account));
            }

            LedgerMessage::EventsSince { from, response } => {
                let _ = response.send(self.ledger.events_since(from).to_vec());
            }

            LedgerMessage::Version { response } => {
                let _ = response.send(self.ledger.version());
            }

            LedgerMessage::VerifyInvariants { response } => {
                let _ = response.send(self.ledger.verify_invariants());
            }

            LedgerMessage::Snapshot { response } => {
                let _ = response.send(self.ledger.snapshot());
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn submit(&mut self, caller: &Principal, command: Command) -> Result<Receipt> {
        let operation = command.name();
        let started = Instant::now();
        let result = self.ledger.execute(caller, command);
        self.metrics
            .record_execute_duration(started.elapsed().as_secs_f64());

        match &result {
            Ok(receipt) => {
                self.metrics.record_commit(operation, receipt);
                self.metrics.update_balances(
                    self.ledger.escrows().total_locked(),
                    self.ledger.rewards().total_supply(),
                );
            }
            Err(e) => self.metrics.record_rejection(operation, e),
        }
        result
    }
}

/// Handle for sending messages to the actor
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Apply a command on behalf of `caller`
    pub async fn submit(&self, caller: Principal, command: Command) -> Result<Receipt> {
        self.request(|response| LedgerMessage::Submit {
            caller,
            command,
            response,
        })
        .await?
    }

    /// Get a job record
    pub async fn job(&self, job_id: JobId) -> Result<JobRecord> {
        self.request(|response| LedgerMessage::GetJob { job_id, response })
            .await?
    }

    /// Get an escrow record
    pub async fn escrow(&self, escrow_id: EscrowId) -> Result<EscrowRecord> {
        self.request(|response| LedgerMessage::GetEscrow {
            escrow_id,
            response,
        })
        .await?
    }

    /// Role check
    pub async fn is_authorized(&self, job_id: JobId, account: Principal) -> Result<bool> {
        self.request(|response| LedgerMessage::IsAuthorized {
            job_id,
            account,
            response,
        })
        .await?
    }

    /// Reward credit balance
    pub async fn reward_balance(&self, account: Principal) -> Result<Amount> {
        self.request(|response| LedgerMessage::RewardBalance { account, response })
            .await
    }

    /// Escrow payouts received by an account
    pub async fn payout_balance(&self, account: Principal) -> Result<Amount> {
        self.request(|response| LedgerMessage::PayoutBalance { account, response })
            .await
    }

    /// Event records from `from` on
    pub async fn events_since(&self, from: u64) -> Result<Vec<EventRecord>> {
        self.request(|response| LedgerMessage::EventsSince { from, response })
            .await
    }

    /// Current world-state version
    pub async fn version(&self) -> Result<u64> {
        self.request(|response| LedgerMessage::Version { response })
            .await
    }

    /// Check hash chain and value invariants
    pub async fn verify_invariants(&self) -> Result<()> {
        self.request(|response| LedgerMessage::VerifyInvariants { response })
            .await?
    }

    /// Serialize the world state
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        self.request(|response| LedgerMessage::Snapshot { response })
            .await?
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

/// Spawn the ledger actor with a mailbox of `capacity` messages
///
/// The join handle resolves to the ledger once the actor stops.
pub fn spawn_ledger_actor(
    ledger: Ledger,
    capacity: usize,
    metrics: Metrics,
) -> (LedgerHandle, JoinHandle<Ledger>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let actor = LedgerActor::new(ledger, rx, metrics);
    let task = tokio::spawn(actor.run());
    (LedgerHandle::new(tx), task)
}
