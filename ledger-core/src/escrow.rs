//! Conditional escrow: value held per job until release conditions hold
//!
//! # Invariants
//!
//! - `released_amount <= amount` for every escrow, at all times
//! - `amount - released_amount` is the available balance: total deposits
//!   minus everything released to the payee or refunded to the payer
//! - every movement out of an escrow is recorded as a [`ValueTransfer`] and
//!   credited to the recipient's payout balance
//!
//! The job's status is read from the [`AssetRegistry`]; the registry never
//! calls back into this module.

use crate::auth::OpContext;
use crate::events::{Applied, LedgerEvent, OverrideSubject};
use crate::registry::AssetRegistry;
use crate::types::{
    Amount, AnyStatus, EscrowId, EscrowRecord, EscrowStatus, JobId, JobStatus, Principal,
    ReleaseConditions, Role, TransferKind, ValueTransfer,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reason attached to completion releases
pub const COMPLETION_REASON: &str = "job completed";

/// Reason attached to milestone releases
pub const MILESTONE_REASON: &str = "milestone completed";

/// `floor(amount * percent / 100)` without intermediate overflow
pub fn percent_of(amount: Amount, percent: u8) -> Amount {
    let percent = Amount::from(percent);
    (amount / 100) * percent + (amount % 100) * percent / 100
}

/// Escrow records, per-job index, and the transfer journal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalEscrow {
    escrows: BTreeMap<EscrowId, EscrowRecord>,
    by_job: BTreeMap<JobId, EscrowId>,
    transfers: Vec<ValueTransfer>,
    payouts: BTreeMap<Principal, Amount>,
    next_escrow_id: u64,
}

impl Default for ConditionalEscrow {
    fn default() -> Self {
        Self {
            escrows: BTreeMap::new(),
            by_job: BTreeMap::new(),
            transfers: Vec::new(),
            payouts: BTreeMap::new(),
            next_escrow_id: 1,
        }
    }
}

impl ConditionalEscrow {
    /// Empty escrow book
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the escrow for `job_id` with an initial deposit from the caller
    pub fn create_escrow(
        &mut self,
        ctx: &OpContext<'_>,
        registry: &AssetRegistry,
        job_id: JobId,
        payee: Principal,
        conditions: ReleaseConditions,
        deposit: Amount,
    ) -> Result<Applied<EscrowId>> {
        if deposit == 0 {
            return Err(Error::Validation("deposit must be positive".to_string()));
        }
        if payee.is_zero() {
            return Err(Error::Validation("payee must not be zero".to_string()));
        }
        if ctx.caller.is_zero() {
            return Err(Error::Validation("payer must not be zero".to_string()));
        }
        conditions.validate()?;
        registry.job(job_id)?;
        if let Some(existing) = self.by_job.get(&job_id) {
            return Err(Error::State(format!(
                "{} already has {}",
                job_id, existing
            )));
        }

        let escrow_id = EscrowId(self.next_escrow_id);
        let record = EscrowRecord {
            escrow_id,
            job_id,
            payer: ctx.caller.clone(),
            payee,
            amount: deposit,
            released_amount: 0,
            refunded_amount: 0,
            status: EscrowStatus::Pending,
            conditions,
            destination_confirmed: false,
            created_at: ctx.now,
            released_at: None,
        };
        let event = LedgerEvent::EscrowCreated {
            escrow_id,
            job_id,
            payer: record.payer.clone(),
            payee: record.payee.clone(),
            amount: deposit,
        };

        self.next_escrow_id += 1;
        self.by_job.insert(job_id, escrow_id);
        self.escrows.insert(escrow_id, record);

        tracing::info!(%escrow_id, %job_id, amount = %deposit, "Escrow created");

        Ok(Applied::new(escrow_id, vec![event]))
    }

    /// Payer adds value to an open escrow
    pub fn deposit(
        &mut self,
        ctx: &OpContext<'_>,
        escrow_id: EscrowId,
        amount: Amount,
    ) -> Result<Applied<Amount>> {
        let escrow = self.escrow_mut(escrow_id)?;
        if &escrow.payer != ctx.caller {
            return Err(Error::Authorization(format!(
                "only the payer may deposit into {}",
                escrow_id
            )));
        }
        if !escrow.status.is_open() {
            return Err(Error::State(format!(
                "{} does not accept deposits in {}",
                escrow_id, escrow.status
            )));
        }
        if amount == 0 {
            return Err(Error::Validation("deposit must be positive".to_string()));
        }
        let new_total = escrow
            .amount
            .checked_add(amount)
            .ok_or_else(|| Error::Validation("deposit overflows escrow total".to_string()))?;

        escrow.amount = new_total;

        tracing::info!(%escrow_id, amount = %amount, total = %new_total, "Funds deposited");

        Ok(Applied::new(
            new_total,
            vec![LedgerEvent::FundsDeposited {
                escrow_id,
                amount,
                new_total,
            }],
        ))
    }

    /// Administrator or payer releases part of the balance to the payee
    ///
    /// When the escrow requires job completion, the payer can only release
    /// once the job is delivered; the administrator is not gated.
    pub fn release(
        &mut self,
        ctx: &OpContext<'_>,
        registry: &AssetRegistry,
        escrow_id: EscrowId,
        amount: Amount,
        reason: String,
    ) -> Result<Applied<Amount>> {
        let escrow = self.escrow(escrow_id)?;
        let is_admin = ctx.is_administrator();
        if !is_admin && &escrow.payer != ctx.caller {
            return Err(Error::Authorization(format!(
                "only the administrator or payer may release {}",
                escrow_id
            )));
        }
        if !escrow.status.is_open() {
            return Err(Error::State(format!(
                "{} cannot release in {}",
                escrow_id, escrow.status
            )));
        }
        if amount == 0 {
            return Err(Error::Validation("release must be positive".to_string()));
        }
        if amount > escrow.available() {
            return Err(Error::Conservation(format!(
                "release of {} exceeds available {} in {}",
                amount,
                escrow.available(),
                escrow_id
            )));
        }
        if !is_admin && escrow.conditions.requires_job_completion {
            let status = registry.status(escrow.job_id)?;
            if status != JobStatus::Delivered {
                return Err(Error::State(format!(
                    "{} requires {} delivered, it is {}",
                    escrow_id, escrow.job_id, status
                )));
            }
        }

        self.apply_release(escrow_id, amount, reason, ctx.now)
            .map(|events| Applied::new(amount, events))
    }

    /// Anyone may trigger the completion share once the job is delivered
    pub fn release_on_completion(
        &mut self,
        ctx: &OpContext<'_>,
        registry: &AssetRegistry,
        escrow_id: EscrowId,
        job_id: JobId,
    ) -> Result<Applied<Amount>> {
        let escrow = self.escrow(escrow_id)?;
        if escrow.job_id != job_id {
            return Err(Error::Validation(format!(
                "{} is linked to {}, not {}",
                escrow_id, escrow.job_id, job_id
            )));
        }
        let status = registry.status(job_id)?;
        if status != JobStatus::Delivered {
            return Err(Error::State(format!(
                "{} is {}, completion release needs Delivered",
                job_id, status
            )));
        }
        if !escrow.status.is_open() {
            return Err(Error::State(format!(
                "{} cannot release in {}",
                escrow_id, escrow.status
            )));
        }
        if escrow.conditions.requires_destination_confirmation && !escrow.destination_confirmed {
            return Err(Error::State(format!(
                "{} awaits destination confirmation",
                escrow_id
            )));
        }

        let target = percent_of(escrow.amount, escrow.conditions.completion_percent);
        let to_release = target.min(escrow.available());
        if to_release == 0 {
            return Err(Error::State(format!(
                "{} has nothing to release on completion",
                escrow_id
            )));
        }

        tracing::debug!(%escrow_id, %job_id, by = %ctx.caller, "Completion release triggered");

        self.apply_release(escrow_id, to_release, COMPLETION_REASON.to_string(), ctx.now)
            .map(|events| Applied::new(to_release, events))
    }

    /// Release the milestone share of a pending escrow
    pub fn complete_milestone(
        &mut self,
        ctx: &OpContext<'_>,
        registry: &AssetRegistry,
        escrow_id: EscrowId,
        proof_ref: String,
    ) -> Result<Applied<Amount>> {
        let escrow = self.escrow(escrow_id)?;
        if escrow.status != EscrowStatus::Pending {
            return Err(Error::State(format!(
                "{} milestone needs Pending, it is {}",
                escrow_id, escrow.status
            )));
        }
        if !ctx.is_administrator() && &escrow.payer != ctx.caller {
            let job = registry.job(escrow.job_id)?;
            ctx.require_role(
                job,
                &[Role::Initiator, Role::Fulfiller, Role::DestinationParty],
                "milestone completion",
            )?;
        }
        if escrow.conditions.requires_proof && proof_ref.is_empty() {
            return Err(Error::Validation(format!(
                "{} requires a proof reference",
                escrow_id
            )));
        }

        let milestone_amount = percent_of(escrow.amount, escrow.conditions.milestone_percent);
        if milestone_amount == 0 {
            return Err(Error::Validation(format!(
                "{} has no milestone share",
                escrow_id
            )));
        }
        if milestone_amount > escrow.available() {
            return Err(Error::Conservation(format!(
                "milestone of {} exceeds available {} in {}",
                milestone_amount,
                escrow.available(),
                escrow_id
            )));
        }

        let reason = if proof_ref.is_empty() {
            MILESTONE_REASON.to_string()
        } else {
            format!("{}: {}", MILESTONE_REASON, proof_ref)
        };
        self.apply_release(escrow_id, milestone_amount, reason, ctx.now)
            .map(|events| Applied::new(milestone_amount, events))
    }

    /// Administrator returns the remaining balance to the payer
    pub fn refund(
        &mut self,
        ctx: &OpContext<'_>,
        escrow_id: EscrowId,
        reason: String,
    ) -> Result<Applied<Amount>> {
        ctx.require_administrator("refund")?;
        let escrow = self.escrow_mut(escrow_id)?;
        if !escrow.status.is_open() {
            return Err(Error::State(format!(
                "{} cannot be refunded in {}",
                escrow_id, escrow.status
            )));
        }

        let remaining = escrow.available();
        let released_amount = escrow
            .released_amount
            .checked_add(remaining)
            .ok_or_else(|| Error::Conservation(format!("{} disbursement overflow", escrow_id)))?;
        if released_amount > escrow.amount {
            return Err(Error::Conservation(format!(
                "refund would move more than {} deposited",
                escrow.amount
            )));
        }

        let old_status = escrow.status;
        let payer = escrow.payer.clone();
        escrow.released_amount = released_amount;
        escrow.refunded_amount += remaining;
        escrow.status = EscrowStatus::Refunded;

        self.record_transfer(escrow_id, payer, remaining, TransferKind::Refund, ctx.now);

        tracing::warn!(%escrow_id, amount = %remaining, %reason, "Escrow refunded");

        Ok(Applied::new(
            remaining,
            vec![
                LedgerEvent::FundsRefunded {
                    escrow_id,
                    amount: remaining,
                    reason,
                },
                LedgerEvent::EscrowStatusChanged {
                    escrow_id,
                    old_status,
                    new_status: EscrowStatus::Refunded,
                },
            ],
        ))
    }

    /// Destination party confirms a delivered job for this escrow
    pub fn confirm_delivery(
        &mut self,
        ctx: &OpContext<'_>,
        registry: &AssetRegistry,
        escrow_id: EscrowId,
    ) -> Result<Applied<()>> {
        let escrow = self.escrow(escrow_id)?;
        let job = registry.job(escrow.job_id)?;
        if &job.destination_party != ctx.caller {
            return Err(Error::Authorization(format!(
                "only the destination party of {} may confirm delivery",
                job.job_id
            )));
        }
        if job.status != JobStatus::Delivered {
            return Err(Error::State(format!(
                "{} is {}, not Delivered",
                job.job_id, job.status
            )));
        }
        if !escrow.status.is_open() {
            return Err(Error::State(format!(
                "{} is closed ({})",
                escrow_id, escrow.status
            )));
        }
        if escrow.destination_confirmed {
            return Err(Error::State(format!(
                "{} delivery already confirmed",
                escrow_id
            )));
        }

        let job_id = job.job_id;
        self.escrow_mut(escrow_id)?.destination_confirmed = true;

        tracing::info!(%escrow_id, %job_id, "Delivery confirmed");

        Ok(Applied::new(
            (),
            vec![LedgerEvent::DeliveryConfirmed {
                escrow_id,
                job_id,
                confirmed_by: ctx.caller.clone(),
            }],
        ))
    }

    /// Administrator forces any escrow status; no value moves
    pub fn override_status(
        &mut self,
        ctx: &OpContext<'_>,
        escrow_id: EscrowId,
        new_status: EscrowStatus,
    ) -> Result<Applied<()>> {
        ctx.require_administrator("escrow status override")?;
        let escrow = self.escrow_mut(escrow_id)?;
        let old_status = escrow.status;
        escrow.status = new_status;

        tracing::warn!(
            %escrow_id,
            %old_status,
            %new_status,
            by = %ctx.caller,
            "Escrow status overridden"
        );

        Ok(Applied::new(
            (),
            vec![
                LedgerEvent::EscrowStatusChanged {
                    escrow_id,
                    old_status,
                    new_status,
                },
                LedgerEvent::StatusOverridden {
                    subject: OverrideSubject::Escrow(escrow_id),
                    old_status: AnyStatus::Escrow(old_status),
                    new_status: AnyStatus::Escrow(new_status),
                    by: ctx.caller.clone(),
                },
            ],
        ))
    }

    /// Escrow by ID
    pub fn escrow(&self, escrow_id: EscrowId) -> Result<&EscrowRecord> {
        self.escrows
            .get(&escrow_id)
            .ok_or_else(|| Error::NotFound(escrow_id.to_string()))
    }

    /// Escrow linked to a job
    pub fn escrow_for_job(&self, job_id: JobId) -> Result<&EscrowRecord> {
        let escrow_id = self
            .by_job
            .get(&job_id)
            .ok_or_else(|| Error::NotFound(format!("escrow for {}", job_id)))?;
        self.escrow(*escrow_id)
    }

    /// Value still held by an escrow
    pub fn available_balance(&self, escrow_id: EscrowId) -> Result<Amount> {
        Ok(self.escrow(escrow_id)?.available())
    }

    /// Value credited to `account` by releases and refunds
    pub fn payout_balance(&self, account: &Principal) -> Amount {
        self.payouts.get(account).copied().unwrap_or(0)
    }

    /// Transfers out of one escrow, oldest first
    pub fn transfers(&self, escrow_id: EscrowId) -> Vec<&ValueTransfer> {
        self.transfers
            .iter()
            .filter(|t| t.escrow_id == escrow_id)
            .collect()
    }

    /// Total value currently held across all escrows
    pub fn total_locked(&self) -> Amount {
        self.escrows
            .values()
            .fold(0, |acc: Amount, e| acc.saturating_add(e.available()))
    }

    /// Recompute every escrow's balance from the transfer journal
    pub fn verify_conservation(&self) -> Result<()> {
        let mut released: BTreeMap<EscrowId, Amount> = BTreeMap::new();
        let mut refunded: BTreeMap<EscrowId, Amount> = BTreeMap::new();
        let mut credited: BTreeMap<&Principal, Amount> = BTreeMap::new();
        for transfer in &self.transfers {
            let bucket = match transfer.kind {
                TransferKind::Release => &mut released,
                TransferKind::Refund => &mut refunded,
            };
            *bucket.entry(transfer.escrow_id).or_default() += transfer.amount;
            *credited.entry(&transfer.to).or_default() += transfer.amount;
        }

        for escrow in self.escrows.values() {
            let out = released.get(&escrow.escrow_id).copied().unwrap_or(0);
            let back = refunded.get(&escrow.escrow_id).copied().unwrap_or(0);
            if escrow.released_amount > escrow.amount {
                return Err(Error::Conservation(format!(
                    "{} released {} of {}",
                    escrow.escrow_id, escrow.released_amount, escrow.amount
                )));
            }
            if out + back != escrow.released_amount || back != escrow.refunded_amount {
                return Err(Error::Conservation(format!(
                    "{} journal shows {} released and {} refunded, record shows {} and {}",
                    escrow.escrow_id, out, back, escrow.released_amount, escrow.refunded_amount
                )));
            }
        }

        for (account, amount) in credited {
            if self.payout_balance(account) != amount {
                return Err(Error::Conservation(format!(
                    "payout balance of {} does not match its transfers",
                    account
                )));
            }
        }
        Ok(())
    }

    fn apply_release(
        &mut self,
        escrow_id: EscrowId,
        amount: Amount,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<Vec<LedgerEvent>> {
        let escrow = self.escrow_mut(escrow_id)?;
        let released_amount = escrow
            .released_amount
            .checked_add(amount)
            .filter(|total| *total <= escrow.amount)
            .ok_or_else(|| {
                Error::Conservation(format!(
                    "release of {} exceeds available {} in {}",
                    amount,
                    escrow.available(),
                    escrow_id
                ))
            })?;

        let old_status = escrow.status;
        escrow.released_amount = released_amount;
        if escrow.released_amount == escrow.amount {
            escrow.status = EscrowStatus::Released;
            escrow.released_at = Some(now);
        } else {
            escrow.status = EscrowStatus::PartiallyReleased;
        }
        let new_status = escrow.status;
        let payee = escrow.payee.clone();

        self.record_transfer(escrow_id, payee.clone(), amount, TransferKind::Release, now);

        tracing::info!(%escrow_id, amount = %amount, %payee, %reason, "Funds released");

        let mut events = vec![LedgerEvent::FundsReleased {
            escrow_id,
            amount,
            payee,
            reason,
        }];
        if old_status != new_status {
            events.push(LedgerEvent::EscrowStatusChanged {
                escrow_id,
                old_status,
                new_status,
            });
        }
        Ok(events)
    }

    fn record_transfer(
        &mut self,
        escrow_id: EscrowId,
        to: Principal,
        amount: Amount,
        kind: TransferKind,
        at: DateTime<Utc>,
    ) {
        let credited = self.payouts.entry(to.clone()).or_default();
        *credited = credited.saturating_add(amount);
        self.transfers.push(ValueTransfer {
            escrow_id,
            to,
            amount,
            kind,
            at,
        });
    }

    fn escrow_mut(&mut self, escrow_id: EscrowId) -> Result<&mut EscrowRecord> {
        self.escrows
            .get_mut(&escrow_id)
            .ok_or_else(|| Error::NotFound(escrow_id.to_string()))
    }
}
