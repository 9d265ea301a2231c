//! Logistics Ledger
//!
//! Single-writer ledger for freight jobs, conditional escrow and
//! impact-linked reward credits.
//!
//! # Architecture
//!
//! - **Asset registry**: jobs with a fixed role set and an ownership token each
//! - **Conditional escrow**: one escrow per job, released by role and condition
//! - **Reward ledger**: credits minted against verified impact offsets
//! - **Execution engine**: applies one command at a time, versioned
//! - **Event log**: append-only, SHA-256 hash-chained
//!
//! # Invariants
//!
//! - Escrow conservation: released + available == amount for every escrow
//! - Atomicity: a rejected command changes nothing
//! - Monotonic lifecycle: terminal statuses are left only by administrator override
//! - Reward determinism: the same offset and kind always mint the same amount

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod auth;
pub mod clock;
pub mod command;
pub mod config;
pub mod crypto;
pub mod error;
pub mod escrow;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod registry;
pub mod rewards;
pub mod types;

// Re-exports
pub use actor::{spawn_ledger_actor, LedgerHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, Envelope, Outcome, Receipt};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use events::{EventRecord, LedgerEvent};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use registry::NewJob;
pub use types::{
    Amount, EscrowId, EscrowRecord, EscrowStatus, JobId, JobRecord, JobStatus, Principal,
    ReleaseConditions, RewardId, RewardKind, Role, TokenId,
};
