//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (integer minor units for value)
//! - Explicit identities (no implicit "whoever calls")

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value amount in minor units
pub type Amount = u128;

/// Principal identifier (account address, participant handle, etc.)
///
/// The empty identifier is the zero principal and is never a valid party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Create new principal
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The zero principal
    pub fn zero() -> Self {
        Self(String::new())
    }

    /// Check for the zero principal
    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            f.write_str("<zero>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

macro_rules! sequence_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw sequence value
            pub fn get(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

sequence_id!(
    /// Job identifier, assigned monotonically from 1
    JobId,
    "job"
);
sequence_id!(
    /// Job ownership token identifier (equal to the job's id)
    TokenId,
    "token"
);
sequence_id!(
    /// Escrow identifier, assigned monotonically from 1
    EscrowId,
    "escrow"
);
sequence_id!(
    /// Reward grant identifier, assigned monotonically from 1
    RewardId,
    "reward"
);

impl From<JobId> for TokenId {
    fn from(job_id: JobId) -> Self {
        TokenId(job_id.0)
    }
}

impl From<TokenId> for JobId {
    fn from(token_id: TokenId) -> Self {
        JobId(token_id.0)
    }
}

/// Roles a principal can hold with respect to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Created the job
    Initiator,
    /// Assigned to carry the job out
    Fulfiller,
    /// Receives the delivery
    DestinationParty,
    /// Ledger-wide privileged principal
    Administrator,
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobStatus {
    /// Created, waiting for the fulfiller
    Created = 0,
    /// Picked up by the fulfiller
    InTransit = 1,
    /// Delivered (terminal)
    Delivered = 2,
    /// Cancelled (terminal)
    Cancelled = 3,
    /// Forced by the administrator
    Disputed = 4,
}

impl JobStatus {
    /// Ordinary transition table (administrative overrides bypass it)
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Created, JobStatus::InTransit)
                | (JobStatus::InTransit, JobStatus::Delivered)
                | (JobStatus::Created, JobStatus::Cancelled)
                | (JobStatus::InTransit, JobStatus::Cancelled)
        )
    }

    /// Check if status is terminal for the ordinary state machine
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Delivered | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Escrow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EscrowStatus {
    /// Funded, nothing released
    Pending = 0,
    /// Some value released to the payee
    PartiallyReleased = 1,
    /// Everything released to the payee (terminal)
    Released = 2,
    /// Remaining value returned to the payer (terminal)
    Refunded = 3,
    /// Forced by the administrator
    Disputed = 4,
}

impl EscrowStatus {
    /// Status accepts deposits and releases
    pub fn is_open(&self) -> bool {
        matches!(self, EscrowStatus::Pending | EscrowStatus::PartiallyReleased)
    }

    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Status carried by an override or status-change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnyStatus {
    /// Job status
    Job(JobStatus),
    /// Escrow status
    Escrow(EscrowStatus),
}

/// Reward category, each with a fixed bonus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RewardKind {
    /// Plain completion, no bonus
    Completion = 0,
    /// Low-impact delivery, +20%
    LowImpact = 1,
    /// Impact-neutral delivery, +50%
    ImpactNeutral = 2,
    /// Batch-optimized route, +15%
    BatchOptimized = 3,
    /// Sustainable transport mode, no bonus
    SustainableMode = 4,
}

impl RewardKind {
    /// All reward kinds
    pub const ALL: [RewardKind; 5] = [
        RewardKind::Completion,
        RewardKind::LowImpact,
        RewardKind::ImpactNeutral,
        RewardKind::BatchOptimized,
        RewardKind::SustainableMode,
    ];

    /// Bonus on top of the base reward, in percent
    pub fn bonus_percent(&self) -> u8 {
        match self {
            RewardKind::Completion | RewardKind::SustainableMode => 0,
            RewardKind::LowImpact => 20,
            RewardKind::ImpactNeutral => 50,
            RewardKind::BatchOptimized => 15,
        }
    }
}

/// Release conditions stored on an escrow at creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConditions {
    /// Release requires the linked job to be delivered
    pub requires_job_completion: bool,
    /// Milestone completion requires a proof reference
    pub requires_proof: bool,
    /// Completion release requires the destination party's confirmation
    pub requires_destination_confirmation: bool,
    /// Share released on milestone completion (0..=100)
    pub milestone_percent: u8,
    /// Share released on job completion (0..=100)
    pub completion_percent: u8,
}

impl ReleaseConditions {
    /// Check percentage bounds
    pub fn validate(&self) -> crate::Result<()> {
        let total = u16::from(self.milestone_percent) + u16::from(self.completion_percent);
        if total > 100 {
            return Err(crate::Error::Validation(format!(
                "milestone ({}%) plus completion ({}%) exceeds 100%",
                self.milestone_percent, self.completion_percent
            )));
        }
        Ok(())
    }
}

/// Logistics job tracked by the asset registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Job ID
    pub job_id: JobId,

    /// Creator of the job
    pub initiator: Principal,

    /// Assigned carrier
    pub fulfiller: Principal,

    /// Receiving party
    pub destination_party: Principal,

    /// Opaque origin descriptor
    pub origin: String,

    /// Opaque destination descriptor
    pub destination: String,

    /// Route distance (> 0)
    pub distance: u64,

    /// Estimated impact (> 0)
    pub estimated_impact: u64,

    /// Reported impact at completion (0 until completed)
    pub actual_impact: u64,

    /// Current status
    pub status: JobStatus,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Set once when the fulfiller starts
    pub started_at: Option<DateTime<Utc>>,

    /// Set once when the fulfiller completes
    pub completed_at: Option<DateTime<Utc>>,

    /// Content reference for documents (may be empty)
    pub metadata_ref: String,
}

impl JobRecord {
    /// Roles `account` holds on this job
    pub fn roles_of(&self, account: &Principal, administrator: &Principal) -> Vec<Role> {
        let mut roles = Vec::new();
        if account.is_zero() {
            return roles;
        }
        if &self.initiator == account {
            roles.push(Role::Initiator);
        }
        if &self.fulfiller == account {
            roles.push(Role::Fulfiller);
        }
        if &self.destination_party == account {
            roles.push(Role::DestinationParty);
        }
        if administrator == account {
            roles.push(Role::Administrator);
        }
        roles
    }

    /// Check if job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Value held for a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    /// Escrow ID
    pub escrow_id: EscrowId,

    /// Linked job (exactly one escrow per job)
    pub job_id: JobId,

    /// Depositor
    pub payer: Principal,

    /// Beneficiary of releases
    pub payee: Principal,

    /// Total deposited
    pub amount: Amount,

    /// Cumulative value that left the escrow (releases and refund)
    pub released_amount: Amount,

    /// Part of `released_amount` returned to the payer
    pub refunded_amount: Amount,

    /// Current status
    pub status: EscrowStatus,

    /// Release conditions
    pub conditions: ReleaseConditions,

    /// Destination party confirmed delivery
    pub destination_confirmed: bool,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Set when fully released
    pub released_at: Option<DateTime<Utc>>,
}

impl EscrowRecord {
    /// Value still held
    pub fn available(&self) -> Amount {
        self.amount.saturating_sub(self.released_amount)
    }
}

/// Direction of a value movement out of an escrow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    /// Release to the payee
    Release,
    /// Refund to the payer
    Refund,
}

/// Recorded value movement out of an escrow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueTransfer {
    /// Source escrow
    pub escrow_id: EscrowId,
    /// Recipient
    pub to: Principal,
    /// Amount moved
    pub amount: Amount,
    /// Release or refund
    pub kind: TransferKind,
    /// When
    pub at: DateTime<Utc>,
}

/// Immutable reward grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardGrant {
    /// Reward ID
    pub reward_id: RewardId,
    /// Credited principal
    pub recipient: Principal,
    /// Job the reward is for
    pub job_id: JobId,
    /// Credited amount
    pub amount: Amount,
    /// Reported impact offset
    pub impact_offset: u128,
    /// Reward category
    pub kind: RewardKind,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}
