//! Events emitted by the ledger core
//!
//! Each committed operation appends one or more [`LedgerEvent`]s to the
//! event log. The log is hash chained (see [`crate::crypto`]) so an external
//! indexer can detect gaps or tampering when mirroring it.

use crate::types::{
    Amount, AnyStatus, EscrowId, EscrowStatus, JobId, JobStatus, Principal, RewardId, RewardKind,
    TokenId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// Job created and ownership token minted
    JobCreated {
        job_id: JobId,
        token_id: TokenId,
        initiator: Principal,
        fulfiller: Principal,
    },

    /// Fulfiller started the job
    JobStarted {
        job_id: JobId,
        started_at: DateTime<Utc>,
    },

    /// Fulfiller delivered the job
    JobCompleted {
        job_id: JobId,
        completed_at: DateTime<Utc>,
        actual_impact: u64,
    },

    /// Job status moved
    JobStatusChanged {
        job_id: JobId,
        old_status: JobStatus,
        new_status: JobStatus,
    },

    /// Job cancelled with a reason
    JobCancelled {
        job_id: JobId,
        cancelled_by: Principal,
        reason: String,
    },

    /// Ownership token changed hands
    JobTokenTransferred {
        token_id: TokenId,
        from: Principal,
        to: Principal,
    },

    /// Escrow opened with its initial deposit
    EscrowCreated {
        escrow_id: EscrowId,
        job_id: JobId,
        payer: Principal,
        payee: Principal,
        amount: Amount,
    },

    /// Payer topped up an escrow
    FundsDeposited {
        escrow_id: EscrowId,
        amount: Amount,
        new_total: Amount,
    },

    /// Value released to the payee
    FundsReleased {
        escrow_id: EscrowId,
        amount: Amount,
        payee: Principal,
        reason: String,
    },

    /// Remaining value returned to the payer
    FundsRefunded {
        escrow_id: EscrowId,
        amount: Amount,
        reason: String,
    },

    /// Escrow status moved
    EscrowStatusChanged {
        escrow_id: EscrowId,
        old_status: EscrowStatus,
        new_status: EscrowStatus,
    },

    /// Destination party confirmed delivery for an escrow
    DeliveryConfirmed {
        escrow_id: EscrowId,
        job_id: JobId,
        confirmed_by: Principal,
    },

    /// Reward minted and credited
    RewardGranted {
        reward_id: RewardId,
        recipient: Principal,
        job_id: JobId,
        amount: Amount,
        impact_offset: u128,
        reward_kind: RewardKind,
    },

    /// Reward balance destroyed
    CreditsBurned {
        account: Principal,
        amount: Amount,
        reason: String,
    },

    /// Administrative status overwrite outside the ordinary transition table
    StatusOverridden {
        subject: OverrideSubject,
        old_status: AnyStatus,
        new_status: AnyStatus,
        by: Principal,
    },
}

/// Record targeted by an administrative override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideSubject {
    /// A job record
    Job(JobId),
    /// An escrow record
    Escrow(EscrowId),
}

impl LedgerEvent {
    /// Event name as listed for indexers
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::JobCreated { .. } => "JobCreated",
            LedgerEvent::JobStarted { .. } => "JobStarted",
            LedgerEvent::JobCompleted { .. } => "JobCompleted",
            LedgerEvent::JobStatusChanged { .. } => "JobStatusChanged",
            LedgerEvent::JobCancelled { .. } => "JobCancelled",
            LedgerEvent::JobTokenTransferred { .. } => "JobTokenTransferred",
            LedgerEvent::EscrowCreated { .. } => "EscrowCreated",
            LedgerEvent::FundsDeposited { .. } => "FundsDeposited",
            LedgerEvent::FundsReleased { .. } => "FundsReleased",
            LedgerEvent::FundsRefunded { .. } => "FundsRefunded",
            LedgerEvent::EscrowStatusChanged { .. } => "EscrowStatusChanged",
            LedgerEvent::DeliveryConfirmed { .. } => "DeliveryConfirmed",
            LedgerEvent::RewardGranted { .. } => "RewardGranted",
            LedgerEvent::CreditsBurned { .. } => "CreditsBurned",
            LedgerEvent::StatusOverridden { .. } => "StatusOverridden",
        }
    }

    /// Exceptional (administrative override) event
    pub fn is_exceptional(&self) -> bool {
        matches!(self, LedgerEvent::StatusOverridden { .. })
    }
}

/// Result of a component operation: its value plus the events to commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    /// Operation result
    pub value: T,
    /// Events emitted, in order
    pub events: Vec<LedgerEvent>,
}

impl<T> Applied<T> {
    /// Wrap a value with its events
    pub fn new(value: T, events: Vec<LedgerEvent>) -> Self {
        Self { value, events }
    }

    /// Transform the value, keeping the events
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Applied<U> {
        Applied {
            value: f(self.value),
            events: self.events,
        }
    }
}

/// Committed event with its position in the hash chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position in the log (from 0)
    pub sequence: u64,

    /// World-state version the event was committed in
    pub version: u64,

    /// Commit timestamp
    pub timestamp: DateTime<Utc>,

    /// Payload
    pub event: LedgerEvent,

    /// Hash of the previous record (zeroes for the first)
    pub prev_hash: [u8; 32],

    /// Hash of this record
    pub hash: [u8; 32],
}

impl EventRecord {
    /// Canonical bytes covered by `hash` (everything but the hashes)
    pub fn canonical_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(bincode::serialize(&(
            self.sequence,
            self.version,
            &self.timestamp,
            &self.event,
        ))?)
    }
}

/// Append-only, hash-chained event log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `events` committed at `version`, returning the new records
    pub fn append(
        &mut self,
        version: u64,
        timestamp: DateTime<Utc>,
        events: Vec<LedgerEvent>,
    ) -> crate::Result<&[EventRecord]> {
        // Build the whole batch before touching the log.
        let start = self.records.len();
        let mut prev_hash = self.head_hash();
        let mut batch = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            let mut record = EventRecord {
                sequence: (start + offset) as u64,
                version,
                timestamp,
                event,
                prev_hash,
                hash: [0u8; 32],
            };
            record.hash = crate::crypto::chain_hash(&prev_hash, &record.canonical_bytes()?);
            prev_hash = record.hash;
            batch.push(record);
        }
        self.records.extend(batch);
        Ok(&self.records[start..])
    }

    /// Hash of the last record (zeroes when empty)
    pub fn head_hash(&self) -> [u8; 32] {
        self.records.last().map(|r| r.hash).unwrap_or([0u8; 32])
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check for an empty log
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Records with `sequence >= from`
    pub fn since(&self, from: u64) -> &[EventRecord] {
        let start = usize::try_from(from)
            .unwrap_or(usize::MAX)
            .min(self.records.len());
        &self.records[start..]
    }

    /// Recompute the hash chain
    pub fn verify(&self) -> crate::Result<()> {
        let mut prev_hash = [0u8; 32];
        for (index, record) in self.records.iter().enumerate() {
            if record.sequence != index as u64 {
                return Err(crate::Error::Integrity(format!(
                    "record {} carries sequence {}",
                    index, record.sequence
                )));
            }
            if record.prev_hash != prev_hash {
                return Err(crate::Error::Integrity(format!(
                    "record {} does not link to its predecessor",
                    index
                )));
            }
            let expected = crate::crypto::chain_hash(&prev_hash, &record.canonical_bytes()?);
            if record.hash != expected {
                return Err(crate::Error::Integrity(format!(
                    "record {} hash mismatch: stored {}, computed {}",
                    index,
                    hex::encode(record.hash),
                    hex::encode(expected)
                )));
            }
            prev_hash = record.hash;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burned(amount: Amount) -> LedgerEvent {
        LedgerEvent::CreditsBurned {
            account: Principal::new("carrier"),
            amount,
            reason: "offset retired".to_string(),
        }
    }

    #[test]
    fn test_append_links_records() {
        let mut log = EventLog::new();
        let now = Utc::now();

        log.append(1, now, vec![burned(1), burned(2)]).unwrap();
        log.append(2, now, vec![burned(3)]).unwrap();

        assert_eq!(log.len(), 3);
        assert_eq!(log.records()[0].prev_hash, [0u8; 32]);
        assert_eq!(log.records()[1].prev_hash, log.records()[0].hash);
        assert_eq!(log.records()[2].prev_hash, log.records()[1].hash);
        assert_eq!(log.records()[2].version, 2);
        log.verify().unwrap();
    }

    #[test]
    fn test_tampering_detected() {
        let mut log = EventLog::new();
        log.append(1, Utc::now(), vec![burned(10), burned(20)]).unwrap();

        log.records[0].event = burned(11);
        assert!(matches!(log.verify(), Err(crate::Error::Integrity(_))));
    }

    #[test]
    fn test_since() {
        let mut log = EventLog::new();
        log.append(1, Utc::now(), vec![burned(1), burned(2), burned(3)])
            .unwrap();

        assert_eq!(log.since(1).len(), 2);
        assert_eq!(log.since(3).len(), 0);
        assert_eq!(log.since(99).len(), 0);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(burned(1).name(), "CreditsBurned");
        assert!(!burned(1).is_exceptional());
    }
}
