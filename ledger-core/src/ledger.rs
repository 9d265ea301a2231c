//! Execution engine
//!
//! [`Ledger`] owns the world state and applies one [`Command`] at a time.
//! Each committed command bumps the world-state version by one and appends
//! its events to the hash-chained log. A rejected command leaves the state,
//! the version and the log untouched.
//!
//! # Example
//!
//! ```
//! use logistics_ledger::{Command, Config, Ledger, NewJob, Outcome, Principal};
//!
//! # fn main() -> logistics_ledger::Result<()> {
//! let mut ledger = Ledger::new(&Config::default())?;
//! let receipt = ledger.execute(
//!     &Principal::new("shipper"),
//!     Command::CreateJob(NewJob {
//!         fulfiller: Principal::new("carrier"),
//!         destination_party: Principal::new("warehouse"),
//!         origin: "Rotterdam".to_string(),
//!         destination: "Antwerp".to_string(),
//!         distance: 100,
//!         estimated_impact: 50,
//!         metadata_ref: String::new(),
//!     }),
//! )?;
//! assert!(matches!(receipt.outcome, Outcome::JobCreated { .. }));
//! assert_eq!(ledger.version(), 1);
//! # Ok(())
//! # }
//! ```

use crate::auth::OpContext;
use crate::clock::{Clock, SystemClock};
use crate::command::{Command, Outcome, Receipt};
use crate::crypto::{digest_hex, hash_bytes};
use crate::escrow::ConditionalEscrow;
use crate::events::{Applied, EventLog, EventRecord};
use crate::registry::AssetRegistry;
use crate::rewards::RewardLedger;
use crate::types::{Amount, EscrowId, EscrowRecord, JobId, JobRecord, Principal, RewardKind};
use crate::{Config, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SNAPSHOT_FORMAT: u32 = 1;

/// Everything a snapshot captures
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorldState {
    administrator: Principal,
    version: u64,
    last_timestamp: Option<DateTime<Utc>>,
    registry: AssetRegistry,
    escrow: ConditionalEscrow,
    rewards: RewardLedger,
    log: EventLog,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    format: u32,
    digest: [u8; 32],
    state: Vec<u8>,
}

/// Single-writer ledger over jobs, escrows and rewards
#[derive(Debug)]
pub struct Ledger {
    state: WorldState,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Empty ledger on the system clock
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Empty ledger on the given clock
    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            service = %config.service_name,
            administrator = %config.administrator,
            base_multiplier = config.reward.base_multiplier,
            "Ledger initialized"
        );
        Ok(Self {
            state: WorldState {
                administrator: config.administrator.clone(),
                version: 0,
                last_timestamp: None,
                registry: AssetRegistry::new(),
                escrow: ConditionalEscrow::new(),
                rewards: RewardLedger::new(u128::from(config.reward.base_multiplier)),
                log: EventLog::new(),
            },
            clock,
        })
    }

    /// Apply `command` on behalf of `caller`
    pub fn execute(&mut self, caller: &Principal, command: Command) -> Result<Receipt> {
        let operation = command.name();
        let now = self.next_timestamp();

        let applied = match self.dispatch(caller, now, command) {
            Ok(applied) => applied,
            Err(e) => {
                tracing::debug!(operation, %caller, kind = %e.kind(), error = %e, "Operation rejected");
                return Err(e);
            }
        };

        let version = self.state.version + 1;
        let events = self.state.log.append(version, now, applied.events)?.to_vec();
        self.state.version = version;
        self.state.last_timestamp = Some(now);

        tracing::info!(operation, %caller, version, events = events.len(), "Operation committed");

        Ok(Receipt {
            version,
            outcome: applied.value,
            events,
        })
    }

    fn dispatch(
        &mut self,
        caller: &Principal,
        now: DateTime<Utc>,
        command: Command,
    ) -> Result<Applied<Outcome>> {
        let state = &mut self.state;
        let ctx = OpContext::new(caller, &state.administrator, now);

        let applied = match command {
            Command::CreateJob(params) => state
                .registry
                .create_job(&ctx, params)?
                .map(|(job_id, token_id)| Outcome::JobCreated { job_id, token_id }),
            Command::StartJob { job_id } => {
                state.registry.start_job(&ctx, job_id)?.map(|()| Outcome::Done)
            }
            Command::CompleteJob {
                job_id,
                actual_impact,
                proof_ref,
            } => state
                .registry
                .complete_job(&ctx, job_id, actual_impact, proof_ref)?
                .map(|()| Outcome::Done),
            Command::CancelJob { job_id, reason } => state
                .registry
                .cancel_job(&ctx, job_id, reason)?
                .map(|()| Outcome::Done),
            Command::OverrideJobStatus { job_id, new_status } => state
                .registry
                .override_status(&ctx, job_id, new_status)?
                .map(|()| Outcome::Done),
            Command::TransferToken { token_id, to } => state
                .registry
                .transfer_token(&ctx, token_id, to)?
                .map(|()| Outcome::Done),
            Command::CreateEscrow {
                job_id,
                payee,
                conditions,
                deposit,
            } => state
                .escrow
                .create_escrow(&ctx, &state.registry, job_id, payee, conditions, deposit)?
                .map(|escrow_id| Outcome::EscrowCreated { escrow_id }),
            Command::Deposit { escrow_id, amount } => state
                .escrow
                .deposit(&ctx, escrow_id, amount)?
                .map(|new_total| Outcome::Deposited { new_total }),
            Command::Release {
                escrow_id,
                amount,
                reason,
            } => state
                .escrow
                .release(&ctx, &state.registry, escrow_id, amount, reason)?
                .map(|amount| Outcome::Released { amount }),
            Command::ReleaseOnCompletion { escrow_id, job_id } => state
                .escrow
                .release_on_completion(&ctx, &state.registry, escrow_id, job_id)?
                .map(|amount| Outcome::Released { amount }),
            Command::CompleteMilestone {
                escrow_id,
                proof_ref,
            } => state
                .escrow
                .complete_milestone(&ctx, &state.registry, escrow_id, proof_ref)?
                .map(|amount| Outcome::Released { amount }),
            Command::Refund { escrow_id, reason } => state
                .escrow
                .refund(&ctx, escrow_id, reason)?
                .map(|amount| Outcome::Refunded { amount }),
            Command::ConfirmDelivery { escrow_id } => state
                .escrow
                .confirm_delivery(&ctx, &state.registry, escrow_id)?
                .map(|()| Outcome::Done),
            Command::OverrideEscrowStatus {
                escrow_id,
                new_status,
            } => state
                .escrow
                .override_status(&ctx, escrow_id, new_status)?
                .map(|()| Outcome::Done),
            Command::MintReward {
                recipient,
                job_id,
                impact_offset,
                kind,
            } => state
                .rewards
                .mint_reward(&ctx, &state.registry, recipient, job_id, impact_offset, kind)?
                .map(|(reward_id, amount)| Outcome::RewardMinted { reward_id, amount }),
            Command::Burn { amount, reason } => state
                .rewards
                .burn(&ctx, amount, reason)?
                .map(|remaining| Outcome::Burned { remaining }),
        };

        Ok(applied)
    }

    /// Clock reading, never earlier than the last committed timestamp
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        match self.state.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        }
    }

    /// Principal holding the administrator role
    pub fn administrator(&self) -> &Principal {
        &self.state.administrator
    }

    /// Number of committed commands
    pub fn version(&self) -> u64 {
        self.state.version
    }

    /// Job records and token ownership
    pub fn registry(&self) -> &AssetRegistry {
        &self.state.registry
    }

    /// Escrow book
    pub fn escrows(&self) -> &ConditionalEscrow {
        &self.state.escrow
    }

    /// Reward ledger
    pub fn rewards(&self) -> &RewardLedger {
        &self.state.rewards
    }

    /// Job by id
    pub fn job(&self, job_id: JobId) -> Result<&JobRecord> {
        self.state.registry.job(job_id)
    }

    /// True if `account` holds any role on the job
    pub fn is_authorized(&self, job_id: JobId, account: &Principal) -> Result<bool> {
        self.state
            .registry
            .is_authorized(job_id, account, &self.state.administrator)
    }

    /// Escrow by id
    pub fn escrow(&self, escrow_id: EscrowId) -> Result<&EscrowRecord> {
        self.state.escrow.escrow(escrow_id)
    }

    /// Value still held by the escrow
    pub fn available_balance(&self, escrow_id: EscrowId) -> Result<Amount> {
        self.state.escrow.available_balance(escrow_id)
    }

    /// Reward amount for an offset, without minting
    pub fn compute_reward(&self, impact_offset: u128, kind: RewardKind) -> Result<Amount> {
        self.state.rewards.compute_reward(impact_offset, kind)
    }

    /// Reward credit balance
    pub fn reward_balance(&self, account: &Principal) -> Amount {
        self.state.rewards.balance_of(account)
    }

    /// The event log
    pub fn event_log(&self) -> &EventLog {
        &self.state.log
    }

    /// Records with `sequence >= from`
    pub fn events_since(&self, from: u64) -> &[EventRecord] {
        self.state.log.since(from)
    }

    /// Recompute the event hash chain
    pub fn verify_event_log(&self) -> Result<()> {
        self.state.log.verify()
    }

    /// Check the hash chain, escrow conservation and reward balances
    pub fn verify_invariants(&self) -> Result<()> {
        self.state.log.verify()?;
        if let Some(last) = self.state.log.records().last() {
            if last.version > self.state.version {
                return Err(Error::Integrity(format!(
                    "log reaches version {} beyond state version {}",
                    last.version, self.state.version
                )));
            }
        }
        self.state.escrow.verify_conservation()?;
        self.state.rewards.verify_balances()?;
        Ok(())
    }

    /// Hex SHA-256 of the canonical world state
    pub fn state_digest(&self) -> Result<String> {
        Ok(digest_hex(&bincode::serialize(&self.state)?))
    }

    /// Serialize the world state
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let state = bincode::serialize(&self.state)?;
        let envelope = SnapshotEnvelope {
            format: SNAPSHOT_FORMAT,
            digest: hash_bytes(&state),
            state,
        };
        Ok(bincode::serialize(&envelope)?)
    }

    /// Rebuild a ledger from [`Ledger::snapshot`] output
    pub fn restore(bytes: &[u8], clock: Arc<dyn Clock>) -> Result<Self> {
        let envelope: SnapshotEnvelope = bincode::deserialize(bytes)?;
        if envelope.format != SNAPSHOT_FORMAT {
            return Err(Error::Integrity(format!(
                "unsupported snapshot format {}",
                envelope.format
            )));
        }
        if hash_bytes(&envelope.state) != envelope.digest {
            return Err(Error::Integrity("snapshot digest mismatch".to_string()));
        }

        let state: WorldState = bincode::deserialize(&envelope.state)?;
        let ledger = Self { state, clock };
        ledger.verify_invariants()?;

        tracing::info!(
            version = ledger.state.version,
            events = ledger.state.log.len(),
            "Ledger restored from snapshot"
        );
        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::events::LedgerEvent;
    use crate::registry::NewJob;
    use crate::types::{JobStatus, ReleaseConditions, TokenId};
    use chrono::Duration;

    fn p(name: &str) -> Principal {
        Principal::new(name)
    }

    fn new_job() -> Command {
        Command::CreateJob(NewJob {
            fulfiller: p("carrier"),
            destination_party: p("warehouse"),
            origin: "Hamburg".to_string(),
            destination: "Lyon".to_string(),
            distance: 900,
            estimated_impact: 120,
            metadata_ref: "ipfs://manifest".to_string(),
        })
    }

    fn test_ledger() -> (Ledger, ManualClock) {
        let clock = ManualClock::default();
        let ledger = Ledger::with_clock(&Config::default(), Arc::new(clock.clone())).unwrap();
        (ledger, clock)
    }

    #[test]
    fn test_execute_commits_and_versions() {
        let (mut ledger, _) = test_ledger();

        let receipt = ledger.execute(&p("shipper"), new_job()).unwrap();
        assert_eq!(receipt.version, 1);
        assert_eq!(
            receipt.outcome,
            Outcome::JobCreated {
                job_id: JobId(1),
                token_id: TokenId(1)
            }
        );
        assert_eq!(receipt.events.len(), 1);
        assert!(matches!(
            receipt.events[0].event,
            LedgerEvent::JobCreated { .. }
        ));

        let receipt = ledger
            .execute(&p("carrier"), Command::StartJob { job_id: JobId(1) })
            .unwrap();
        assert_eq!(receipt.version, 2);
        assert_eq!(receipt.events[0].sequence, 1);
        assert_eq!(ledger.job(JobId(1)).unwrap().status, JobStatus::InTransit);
        ledger.verify_invariants().unwrap();
    }

    #[test]
    fn test_rejection_leaves_state_untouched() {
        let (mut ledger, _) = test_ledger();
        ledger.execute(&p("shipper"), new_job()).unwrap();
        let before = ledger.state_digest().unwrap();

        let err = ledger
            .execute(&p("stranger"), Command::StartJob { job_id: JobId(1) })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let err = ledger
            .execute(
                &p("shipper"),
                Command::CreateEscrow {
                    job_id: JobId(1),
                    payee: p("carrier"),
                    conditions: ReleaseConditions::default(),
                    deposit: 0,
                },
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert_eq!(ledger.version(), 1);
        assert_eq!(ledger.event_log().len(), 1);
        assert_eq!(ledger.state_digest().unwrap(), before);
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let (mut ledger, clock) = test_ledger();
        ledger.execute(&p("shipper"), new_job()).unwrap();
        let first = ledger.events_since(0)[0].timestamp;

        clock.advance(Duration::seconds(-3600));
        let receipt = ledger
            .execute(&p("carrier"), Command::StartJob { job_id: JobId(1) })
            .unwrap();
        assert_eq!(receipt.events[0].timestamp, first);
        assert_eq!(ledger.job(JobId(1)).unwrap().started_at, Some(first));

        clock.advance(Duration::seconds(7200));
        let receipt = ledger
            .execute(
                &p("carrier"),
                Command::CompleteJob {
                    job_id: JobId(1),
                    actual_impact: 110,
                    proof_ref: String::new(),
                },
            )
            .unwrap();
        assert!(receipt.events[0].timestamp > first);
    }

    #[test]
    fn test_is_authorized_passthrough() {
        let (mut ledger, _) = test_ledger();
        ledger.execute(&p("shipper"), new_job()).unwrap();

        assert!(ledger.is_authorized(JobId(1), &p("shipper")).unwrap());
        assert!(ledger.is_authorized(JobId(1), &p("warehouse")).unwrap());
        assert!(ledger.is_authorized(JobId(1), &p("admin")).unwrap());
        assert!(!ledger.is_authorized(JobId(1), &p("stranger")).unwrap());
        assert!(!ledger.is_authorized(JobId(1), &Principal::zero()).unwrap());
        assert!(ledger.is_authorized(JobId(9), &p("shipper")).is_err());
    }

    #[test]
    fn test_snapshot_restore() {
        let (mut ledger, clock) = test_ledger();
        ledger.execute(&p("shipper"), new_job()).unwrap();
        ledger
            .execute(
                &p("shipper"),
                Command::CreateEscrow {
                    job_id: JobId(1),
                    payee: p("carrier"),
                    conditions: ReleaseConditions::default(),
                    deposit: 5_000,
                },
            )
            .unwrap();

        let bytes = ledger.snapshot().unwrap();
        let mut restored = Ledger::restore(&bytes, Arc::new(clock)).unwrap();
        assert_eq!(restored.version(), 2);
        assert_eq!(
            restored.state_digest().unwrap(),
            ledger.state_digest().unwrap()
        );
        assert_eq!(restored.available_balance(EscrowId(1)).unwrap(), 5_000);

        // Restored ledger keeps counting where the original stopped.
        let receipt = restored
            .execute(&p("carrier"), Command::StartJob { job_id: JobId(1) })
            .unwrap();
        assert_eq!(receipt.version, 3);
        restored.verify_invariants().unwrap();
    }

    #[test]
    fn test_restore_rejects_tampering() {
        let (mut ledger, _) = test_ledger();
        ledger.execute(&p("shipper"), new_job()).unwrap();

        let mut bytes = ledger.snapshot().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        let err = Ledger::restore(&bytes, Arc::new(SystemClock)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);

        let err = Ledger::restore(&[1, 2, 3], Arc::new(SystemClock)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.administrator = Principal::zero();
        let err = Ledger::new(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
