//! Command surface: one variant per mutating operation

use crate::events::EventRecord;
use crate::registry::NewJob;
use crate::types::{
    Amount, EscrowId, EscrowStatus, JobId, JobStatus, Principal, ReleaseConditions, RewardId,
    RewardKind, TokenId,
};
use serde::{Deserialize, Serialize};

/// Operation submitted by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Create a job and mint its token to the caller
    CreateJob(NewJob),

    /// Fulfiller starts a job
    StartJob { job_id: JobId },

    /// Fulfiller delivers a job
    CompleteJob {
        job_id: JobId,
        actual_impact: u64,
        #[serde(default)]
        proof_ref: String,
    },

    /// Initiator or fulfiller cancels a job
    CancelJob {
        job_id: JobId,
        #[serde(default)]
        reason: String,
    },

    /// Administrator forces a job status
    OverrideJobStatus { job_id: JobId, new_status: JobStatus },

    /// Token owner hands the job token over
    TransferToken { token_id: TokenId, to: Principal },

    /// Open the escrow for a job
    CreateEscrow {
        job_id: JobId,
        payee: Principal,
        #[serde(default)]
        conditions: ReleaseConditions,
        deposit: Amount,
    },

    /// Payer tops up an escrow
    Deposit { escrow_id: EscrowId, amount: Amount },

    /// Administrator or payer releases value
    Release {
        escrow_id: EscrowId,
        amount: Amount,
        #[serde(default)]
        reason: String,
    },

    /// Release the completion share of a delivered job
    ReleaseOnCompletion { escrow_id: EscrowId, job_id: JobId },

    /// Release the milestone share
    CompleteMilestone {
        escrow_id: EscrowId,
        #[serde(default)]
        proof_ref: String,
    },

    /// Administrator refunds the remaining balance
    Refund {
        escrow_id: EscrowId,
        #[serde(default)]
        reason: String,
    },

    /// Destination party confirms delivery
    ConfirmDelivery { escrow_id: EscrowId },

    /// Administrator forces an escrow status
    OverrideEscrowStatus {
        escrow_id: EscrowId,
        new_status: EscrowStatus,
    },

    /// Administrator mints a reward
    MintReward {
        recipient: Principal,
        job_id: JobId,
        impact_offset: u128,
        kind: RewardKind,
    },

    /// Caller burns reward credits
    Burn {
        amount: Amount,
        #[serde(default)]
        reason: String,
    },
}

impl Command {
    /// Operation name, used for metrics and logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateJob(_) => "create_job",
            Command::StartJob { .. } => "start_job",
            Command::CompleteJob { .. } => "complete_job",
            Command::CancelJob { .. } => "cancel_job",
            Command::OverrideJobStatus { .. } => "override_job_status",
            Command::TransferToken { .. } => "transfer_token",
            Command::CreateEscrow { .. } => "create_escrow",
            Command::Deposit { .. } => "deposit",
            Command::Release { .. } => "release",
            Command::ReleaseOnCompletion { .. } => "release_on_completion",
            Command::CompleteMilestone { .. } => "complete_milestone",
            Command::Refund { .. } => "refund",
            Command::ConfirmDelivery { .. } => "confirm_delivery",
            Command::OverrideEscrowStatus { .. } => "override_escrow_status",
            Command::MintReward { .. } => "mint_reward",
            Command::Burn { .. } => "burn",
        }
    }
}

/// Success payload of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Job and token created
    JobCreated { job_id: JobId, token_id: TokenId },
    /// Escrow created
    EscrowCreated { escrow_id: EscrowId },
    /// Deposit accepted
    Deposited { new_total: Amount },
    /// Value released to the payee
    Released { amount: Amount },
    /// Remaining value returned to the payer
    Refunded { amount: Amount },
    /// Reward minted
    RewardMinted { reward_id: RewardId, amount: Amount },
    /// Credits burned
    Burned { remaining: Amount },
    /// Applied, nothing to report
    Done,
}

/// Committed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// World-state version after the command
    pub version: u64,
    /// Success payload
    pub outcome: Outcome,
    /// Events appended by the command
    pub events: Vec<EventRecord>,
}

/// Command with its caller, as carried over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Submitting principal
    pub caller: Principal,
    /// Operation
    pub command: Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_from_json() {
        let line = r#"{
            "caller": "shipper",
            "command": {
                "create_escrow": {
                    "job_id": 1,
                    "payee": "carrier",
                    "conditions": { "requires_job_completion": true, "requires_proof": false,
                                    "requires_destination_confirmation": false,
                                    "milestone_percent": 0, "completion_percent": 100 },
                    "deposit": 1000
                }
            }
        }"#;
        let envelope: Envelope = serde_json::from_str(line).unwrap();
        assert_eq!(envelope.caller, Principal::new("shipper"));
        match envelope.command {
            Command::CreateEscrow {
                job_id,
                deposit,
                conditions,
                ..
            } => {
                assert_eq!(job_id, JobId(1));
                assert_eq!(deposit, 1000);
                assert_eq!(conditions.completion_percent, 100);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_defaults_and_names() {
        let command: Command =
            serde_json::from_str(r#"{"cancel_job": {"job_id": 3}}"#).unwrap();
        assert_eq!(
            command,
            Command::CancelJob {
                job_id: JobId(3),
                reason: String::new()
            }
        );
        assert_eq!(command.name(), "cancel_job");

        let done = serde_json::to_string(&Outcome::Done).unwrap();
        assert_eq!(done, r#""done""#);
    }
}
