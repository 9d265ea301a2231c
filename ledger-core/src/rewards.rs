//! Reward ledger: deterministic reward minting and fungible balances
//!
//! Minting is the single source of balance credit: a grant is appended and
//! the recipient is credited in the same step. There is no separate claim.
//! Balances and offset totals are running sums that can always be rebuilt
//! from the grant and burn logs (see [`RewardLedger::verify_balances`]).

use crate::auth::OpContext;
use crate::events::{Applied, LedgerEvent};
use crate::registry::AssetRegistry;
use crate::types::{Amount, JobId, Principal, RewardGrant, RewardId, RewardKind};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default reward units per unit of impact offset
pub const DEFAULT_BASE_MULTIPLIER: u128 = 100;

/// `base = offset * multiplier`, plus the kind's bonus percent of `base`
///
/// Pure; identical inputs always give identical outputs.
pub fn compute_reward(
    base_multiplier: u128,
    impact_offset: u128,
    kind: RewardKind,
) -> Result<Amount> {
    let base = impact_offset
        .checked_mul(base_multiplier)
        .ok_or_else(|| Error::Validation("reward base overflows".to_string()))?;
    let bonus = crate::escrow::percent_of(base, kind.bonus_percent());
    base.checked_add(bonus)
        .ok_or_else(|| Error::Validation("reward amount overflows".to_string()))
}

/// Burned reward credits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRecord {
    /// Account debited
    pub account: Principal,
    /// Amount destroyed
    pub amount: Amount,
    /// Free-form reason
    pub reason: String,
    /// When
    pub at: DateTime<Utc>,
}

/// Grant log, burn log and derived balances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardLedger {
    base_multiplier: u128,
    grants: Vec<RewardGrant>,
    burns: Vec<BurnRecord>,
    balances: BTreeMap<Principal, Amount>,
    offsets: BTreeMap<Principal, u128>,
    minted_total: Amount,
    burned_total: Amount,
    next_reward_id: u64,
}

impl Default for RewardLedger {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_MULTIPLIER)
    }
}

impl RewardLedger {
    /// Empty ledger with the given base multiplier
    pub fn new(base_multiplier: u128) -> Self {
        Self {
            base_multiplier,
            grants: Vec::new(),
            burns: Vec::new(),
            balances: BTreeMap::new(),
            offsets: BTreeMap::new(),
            minted_total: 0,
            burned_total: 0,
            next_reward_id: 1,
        }
    }

    /// Base multiplier in use
    pub fn base_multiplier(&self) -> u128 {
        self.base_multiplier
    }

    /// Reward for `impact_offset` of `kind` under this ledger's multiplier
    pub fn compute_reward(&self, impact_offset: u128, kind: RewardKind) -> Result<Amount> {
        compute_reward(self.base_multiplier, impact_offset, kind)
    }

    /// Administrator mints and credits a reward
    pub fn mint_reward(
        &mut self,
        ctx: &OpContext<'_>,
        registry: &AssetRegistry,
        recipient: Principal,
        job_id: JobId,
        impact_offset: u128,
        kind: RewardKind,
    ) -> Result<Applied<(RewardId, Amount)>> {
        ctx.require_administrator("reward minting")?;
        if recipient.is_zero() {
            return Err(Error::Validation("recipient must not be zero".to_string()));
        }
        if impact_offset == 0 {
            return Err(Error::Validation(
                "impact offset must be positive".to_string(),
            ));
        }
        registry.job(job_id)?;

        let amount = self.compute_reward(impact_offset, kind)?;
        if amount == 0 {
            return Err(Error::Validation("computed reward is zero".to_string()));
        }
        let balance = self
            .balance_of(&recipient)
            .checked_add(amount)
            .ok_or_else(|| Error::Validation("recipient balance overflows".to_string()))?;
        let offset = self
            .total_offset_of(&recipient)
            .checked_add(impact_offset)
            .ok_or_else(|| Error::Validation("recipient offset total overflows".to_string()))?;
        let minted_total = self
            .minted_total
            .checked_add(amount)
            .ok_or_else(|| Error::Validation("reward supply overflows".to_string()))?;

        let reward_id = RewardId(self.next_reward_id);
        self.next_reward_id += 1;
        self.grants.push(RewardGrant {
            reward_id,
            recipient: recipient.clone(),
            job_id,
            amount,
            impact_offset,
            kind,
            created_at: ctx.now,
        });
        self.balances.insert(recipient.clone(), balance);
        self.offsets.insert(recipient.clone(), offset);
        self.minted_total = minted_total;

        tracing::info!(%reward_id, %recipient, %job_id, amount = %amount, ?kind, "Reward granted");

        Ok(Applied::new(
            (reward_id, amount),
            vec![LedgerEvent::RewardGranted {
                reward_id,
                recipient,
                job_id,
                amount,
                impact_offset,
                reward_kind: kind,
            }],
        ))
    }

    /// Caller destroys part of their own balance
    pub fn burn(
        &mut self,
        ctx: &OpContext<'_>,
        amount: Amount,
        reason: String,
    ) -> Result<Applied<Amount>> {
        if amount == 0 {
            return Err(Error::Validation("burn amount must be positive".to_string()));
        }
        let balance = self.balance_of(ctx.caller);
        if balance < amount {
            return Err(Error::Validation(format!(
                "{} holds {}, cannot burn {}",
                ctx.caller, balance, amount
            )));
        }

        let remaining = balance - amount;
        self.balances.insert(ctx.caller.clone(), remaining);
        self.burned_total += amount;
        self.burns.push(BurnRecord {
            account: ctx.caller.clone(),
            amount,
            reason: reason.clone(),
            at: ctx.now,
        });

        tracing::info!(account = %ctx.caller, amount = %amount, %reason, "Credits burned");

        Ok(Applied::new(
            remaining,
            vec![LedgerEvent::CreditsBurned {
                account: ctx.caller.clone(),
                amount,
                reason,
            }],
        ))
    }

    /// Current balance
    pub fn balance_of(&self, account: &Principal) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Cumulative impact offset credited to `account`
    pub fn total_offset_of(&self, account: &Principal) -> u128 {
        self.offsets.get(account).copied().unwrap_or(0)
    }

    /// Grant by ID
    pub fn grant(&self, reward_id: RewardId) -> Result<&RewardGrant> {
        // Ids are dense from 1, so the log index is id - 1.
        reward_id
            .get()
            .checked_sub(1)
            .and_then(|index| self.grants.get(index as usize))
            .ok_or_else(|| Error::NotFound(reward_id.to_string()))
    }

    /// Grants to `recipient`, oldest first
    pub fn grants_for(&self, recipient: &Principal) -> Vec<&RewardGrant> {
        self.grants
            .iter()
            .filter(|g| &g.recipient == recipient)
            .collect()
    }

    /// Minted minus burned
    pub fn total_supply(&self) -> Amount {
        self.minted_total - self.burned_total
    }

    /// Rebuild balances and offsets from the logs and compare
    pub fn verify_balances(&self) -> Result<()> {
        let mut balances: BTreeMap<&Principal, Amount> = BTreeMap::new();
        let mut offsets: BTreeMap<&Principal, u128> = BTreeMap::new();
        for grant in &self.grants {
            *balances.entry(&grant.recipient).or_default() += grant.amount;
            *offsets.entry(&grant.recipient).or_default() += grant.impact_offset;
        }
        for burn in &self.burns {
            let balance = balances.entry(&burn.account).or_default();
            *balance = balance.checked_sub(burn.amount).ok_or_else(|| {
                Error::Integrity(format!("{} burned more than granted", burn.account))
            })?;
        }

        for (account, expected) in &balances {
            if self.balance_of(account) != *expected {
                return Err(Error::Integrity(format!(
                    "balance of {} is {}, logs give {}",
                    account,
                    self.balance_of(account),
                    expected
                )));
            }
        }
        for (account, expected) in &offsets {
            if self.total_offset_of(account) != *expected {
                return Err(Error::Integrity(format!(
                    "offset total of {} does not match its grants",
                    account
                )));
            }
        }
        Ok(())
    }
}
