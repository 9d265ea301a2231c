//! Asset registry: job records, their lifecycle, and ownership tokens
//!
//! Two independent relations live here:
//! - the role set of each job (initiator, fulfiller, destination party),
//!   fixed at creation and used for authorization, and
//! - the ownership map of job tokens, which can change hands freely.
//!
//! Ordinary operations follow [`JobStatus::can_transition_to`]. The only way
//! around that table is [`AssetRegistry::override_status`], which emits a
//! [`LedgerEvent::StatusOverridden`] audit event.

use crate::auth::{self, OpContext};
use crate::events::{Applied, LedgerEvent, OverrideSubject};
use crate::types::{AnyStatus, JobId, JobRecord, JobStatus, Principal, Role, TokenId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameters of a new job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    /// Assigned carrier
    pub fulfiller: Principal,
    /// Receiving party
    pub destination_party: Principal,
    /// Opaque origin descriptor
    pub origin: String,
    /// Opaque destination descriptor
    pub destination: String,
    /// Route distance
    pub distance: u64,
    /// Estimated impact
    pub estimated_impact: u64,
    /// Document reference (may be empty)
    #[serde(default)]
    pub metadata_ref: String,
}

/// Job records and token ownership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRegistry {
    jobs: BTreeMap<JobId, JobRecord>,
    owners: BTreeMap<TokenId, Principal>,
    next_job_id: u64,
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self {
            jobs: BTreeMap::new(),
            owners: BTreeMap::new(),
            next_job_id: 1,
        }
    }
}

impl AssetRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job and mint its ownership token to the caller
    pub fn create_job(
        &mut self,
        ctx: &OpContext<'_>,
        params: NewJob,
    ) -> Result<Applied<(JobId, TokenId)>> {
        if ctx.caller.is_zero() {
            return Err(Error::Validation("caller must not be zero".to_string()));
        }
        if params.fulfiller.is_zero() {
            return Err(Error::Validation("fulfiller must not be zero".to_string()));
        }
        if params.destination_party.is_zero() {
            return Err(Error::Validation(
                "destination party must not be zero".to_string(),
            ));
        }
        if &params.fulfiller == ctx.caller {
            return Err(Error::Validation(
                "fulfiller must differ from initiator".to_string(),
            ));
        }
        if params.distance == 0 {
            return Err(Error::Validation("distance must be positive".to_string()));
        }
        if params.estimated_impact == 0 {
            return Err(Error::Validation(
                "estimated impact must be positive".to_string(),
            ));
        }

        let job_id = JobId(self.next_job_id);
        let token_id = TokenId::from(job_id);
        let record = JobRecord {
            job_id,
            initiator: ctx.caller.clone(),
            fulfiller: params.fulfiller,
            destination_party: params.destination_party,
            origin: params.origin,
            destination: params.destination,
            distance: params.distance,
            estimated_impact: params.estimated_impact,
            actual_impact: 0,
            status: JobStatus::Created,
            created_at: ctx.now,
            started_at: None,
            completed_at: None,
            metadata_ref: params.metadata_ref,
        };

        let event = LedgerEvent::JobCreated {
            job_id,
            token_id,
            initiator: record.initiator.clone(),
            fulfiller: record.fulfiller.clone(),
        };

        self.next_job_id += 1;
        self.owners.insert(token_id, ctx.caller.clone());
        self.jobs.insert(job_id, record);

        tracing::info!(%job_id, initiator = %ctx.caller, "Job created");

        Ok(Applied::new((job_id, token_id), vec![event]))
    }

    /// Fulfiller picks the job up
    pub fn start_job(&mut self, ctx: &OpContext<'_>, job_id: JobId) -> Result<Applied<()>> {
        let job = self.job_mut(job_id)?;
        if job.status != JobStatus::Created {
            return Err(Error::State(format!(
                "{} cannot start from {}",
                job_id, job.status
            )));
        }
        if &job.fulfiller != ctx.caller {
            return Err(Error::Authorization(format!(
                "only the fulfiller may start {}",
                job_id
            )));
        }

        job.status = JobStatus::InTransit;
        job.started_at = Some(ctx.now);

        tracing::info!(%job_id, "Job started");

        Ok(Applied::new(
            (),
            vec![
                LedgerEvent::JobStarted {
                    job_id,
                    started_at: ctx.now,
                },
                LedgerEvent::JobStatusChanged {
                    job_id,
                    old_status: JobStatus::Created,
                    new_status: JobStatus::InTransit,
                },
            ],
        ))
    }

    /// Fulfiller delivers the job; a non-empty proof reference replaces the
    /// job's metadata reference
    pub fn complete_job(
        &mut self,
        ctx: &OpContext<'_>,
        job_id: JobId,
        actual_impact: u64,
        proof_ref: String,
    ) -> Result<Applied<()>> {
        let job = self.job_mut(job_id)?;
        if job.status != JobStatus::InTransit {
            return Err(Error::State(format!(
                "{} cannot complete from {}",
                job_id, job.status
            )));
        }
        if &job.fulfiller != ctx.caller {
            return Err(Error::Authorization(format!(
                "only the fulfiller may complete {}",
                job_id
            )));
        }

        job.status = JobStatus::Delivered;
        job.completed_at = Some(ctx.now);
        job.actual_impact = actual_impact;
        if !proof_ref.is_empty() {
            job.metadata_ref = proof_ref;
        }

        tracing::info!(%job_id, actual_impact, "Job delivered");

        Ok(Applied::new(
            (),
            vec![
                LedgerEvent::JobCompleted {
                    job_id,
                    completed_at: ctx.now,
                    actual_impact,
                },
                LedgerEvent::JobStatusChanged {
                    job_id,
                    old_status: JobStatus::InTransit,
                    new_status: JobStatus::Delivered,
                },
            ],
        ))
    }

    /// Initiator or fulfiller cancels a job that has not been delivered
    pub fn cancel_job(
        &mut self,
        ctx: &OpContext<'_>,
        job_id: JobId,
        reason: String,
    ) -> Result<Applied<()>> {
        let administrator = ctx.administrator;
        let job = self.job_mut(job_id)?;
        let old_status = job.status;
        if !old_status.can_transition_to(JobStatus::Cancelled) {
            return Err(Error::State(format!(
                "{} cannot be cancelled from {}",
                job_id, old_status
            )));
        }
        let roles = job.roles_of(ctx.caller, administrator);
        if !roles.contains(&Role::Initiator) && !roles.contains(&Role::Fulfiller) {
            return Err(Error::Authorization(format!(
                "only the initiator or fulfiller may cancel {}",
                job_id
            )));
        }

        job.status = JobStatus::Cancelled;

        tracing::info!(%job_id, by = %ctx.caller, %reason, "Job cancelled");

        Ok(Applied::new(
            (),
            vec![
                LedgerEvent::JobStatusChanged {
                    job_id,
                    old_status,
                    new_status: JobStatus::Cancelled,
                },
                LedgerEvent::JobCancelled {
                    job_id,
                    cancelled_by: ctx.caller.clone(),
                    reason,
                },
            ],
        ))
    }

    /// Administrator forces any status, bypassing the transition table
    pub fn override_status(
        &mut self,
        ctx: &OpContext<'_>,
        job_id: JobId,
        new_status: JobStatus,
    ) -> Result<Applied<()>> {
        ctx.require_administrator("status override")?;
        let job = self.job_mut(job_id)?;
        let old_status = job.status;
        job.status = new_status;

        tracing::warn!(
            %job_id,
            %old_status,
            %new_status,
            by = %ctx.caller,
            "Job status overridden"
        );

        Ok(Applied::new(
            (),
            vec![
                LedgerEvent::JobStatusChanged {
                    job_id,
                    old_status,
                    new_status,
                },
                LedgerEvent::StatusOverridden {
                    subject: OverrideSubject::Job(job_id),
                    old_status: AnyStatus::Job(old_status),
                    new_status: AnyStatus::Job(new_status),
                    by: ctx.caller.clone(),
                },
            ],
        ))
    }

    /// Move a job's ownership token; roles are unaffected
    pub fn transfer_token(
        &mut self,
        ctx: &OpContext<'_>,
        token_id: TokenId,
        to: Principal,
    ) -> Result<Applied<()>> {
        let owner = self
            .owners
            .get_mut(&token_id)
            .ok_or_else(|| Error::NotFound(token_id.to_string()))?;
        if owner != ctx.caller {
            return Err(Error::Authorization(format!(
                "{} is owned by {}, not {}",
                token_id, owner, ctx.caller
            )));
        }
        if to.is_zero() {
            return Err(Error::Validation(
                "token recipient must not be zero".to_string(),
            ));
        }
        if &to == ctx.caller {
            return Err(Error::Validation(
                "token recipient is already the owner".to_string(),
            ));
        }

        let from = std::mem::replace(owner, to.clone());

        tracing::info!(%token_id, %from, %to, "Job token transferred");

        Ok(Applied::new(
            (),
            vec![LedgerEvent::JobTokenTransferred { token_id, from, to }],
        ))
    }

    /// Role check against the job's fixed role set
    pub fn is_authorized(
        &self,
        job_id: JobId,
        account: &Principal,
        administrator: &Principal,
    ) -> Result<bool> {
        Ok(auth::is_authorized(self.job(job_id)?, account, administrator))
    }

    /// Job by ID
    pub fn job(&self, job_id: JobId) -> Result<&JobRecord> {
        self.jobs
            .get(&job_id)
            .ok_or_else(|| Error::NotFound(job_id.to_string()))
    }

    /// Current status of a job
    pub fn status(&self, job_id: JobId) -> Result<JobStatus> {
        Ok(self.job(job_id)?.status)
    }

    /// Current owner of a token
    pub fn owner_of(&self, token_id: TokenId) -> Result<&Principal> {
        self.owners
            .get(&token_id)
            .ok_or_else(|| Error::NotFound(token_id.to_string()))
    }

    /// Tokens held by `owner`
    pub fn tokens_of(&self, owner: &Principal) -> Vec<TokenId> {
        self.owners
            .iter()
            .filter(|(_, o)| *o == owner)
            .map(|(token_id, _)| *token_id)
            .collect()
    }

    /// Jobs currently in `status`
    pub fn jobs_by_status(&self, status: JobStatus) -> Vec<&JobRecord> {
        self.jobs.values().filter(|j| j.status == status).collect()
    }

    /// Jobs in which `account` holds a role
    pub fn jobs_for(&self, account: &Principal) -> Vec<&JobRecord> {
        if account.is_zero() {
            return Vec::new();
        }
        self.jobs
            .values()
            .filter(|j| {
                &j.initiator == account
                    || &j.fulfiller == account
                    || &j.destination_party == account
            })
            .collect()
    }

    /// Number of jobs ever created
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    fn job_mut(&mut self, job_id: JobId) -> Result<&mut JobRecord> {
        self.jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(job_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn p(id: &str) -> Principal {
        Principal::new(id)
    }

    fn new_job() -> NewJob {
        NewJob {
            fulfiller: p("carrier"),
            destination_party: p("warehouse"),
            origin: "X".to_string(),
            destination: "Y".to_string(),
            distance: 100,
            estimated_impact: 50,
            metadata_ref: String::new(),
        }
    }

    fn created(registry: &mut AssetRegistry) -> JobId {
        let admin = p("admin");
        let shipper = p("shipper");
        let ctx = OpContext::new(&shipper, &admin, Utc::now());
        registry.create_job(&ctx, new_job()).unwrap().value.0
    }

    #[test]
    fn test_create_job_mints_token_to_initiator() {
        let mut registry = AssetRegistry::new();
        let admin = p("admin");
        let shipper = p("shipper");
        let ctx = OpContext::new(&shipper, &admin, Utc::now());

        let applied = registry.create_job(&ctx, new_job()).unwrap();
        let (job_id, token_id) = applied.value;

        assert_eq!(job_id, JobId(1));
        assert_eq!(token_id, TokenId(1));
        assert_eq!(registry.owner_of(token_id).unwrap(), &shipper);
        assert_eq!(registry.status(job_id).unwrap(), JobStatus::Created);
        assert_eq!(applied.events.len(), 1);
        assert_eq!(applied.events[0].name(), "JobCreated");

        let second = registry.create_job(&ctx, new_job()).unwrap().value.0;
        assert_eq!(second, JobId(2));
    }

    #[test]
    fn test_create_job_validation() {
        let mut registry = AssetRegistry::new();
        let admin = p("admin");
        let shipper = p("shipper");
        let ctx = OpContext::new(&shipper, &admin, Utc::now());

        let cases = [
            NewJob {
                fulfiller: Principal::zero(),
                ..new_job()
            },
            NewJob {
                destination_party: Principal::zero(),
                ..new_job()
            },
            NewJob {
                fulfiller: p("shipper"),
                ..new_job()
            },
            NewJob {
                distance: 0,
                ..new_job()
            },
            NewJob {
                estimated_impact: 0,
                ..new_job()
            },
        ];
        for params in cases {
            assert!(matches!(
                registry.create_job(&ctx, params),
                Err(Error::Validation(_))
            ));
        }
        assert_eq!(registry.job_count(), 0);

        // Failed creations do not consume ids.
        let job_id = registry.create_job(&ctx, new_job()).unwrap().value.0;
        assert_eq!(job_id, JobId(1));
    }

    #[test]
    fn test_lifecycle_sets_timestamps_once() {
        let mut registry = AssetRegistry::new();
        let job_id = created(&mut registry);
        let admin = p("admin");
        let carrier = p("carrier");
        let t0 = Utc::now();

        let ctx = OpContext::new(&carrier, &admin, t0);
        registry.start_job(&ctx, job_id).unwrap();
        assert_eq!(registry.job(job_id).unwrap().started_at, Some(t0));

        // Starting again is a state error and does not move started_at.
        let later = OpContext::new(&carrier, &admin, t0 + Duration::seconds(5));
        assert!(matches!(
            registry.start_job(&later, job_id),
            Err(Error::State(_))
        ));
        assert_eq!(registry.job(job_id).unwrap().started_at, Some(t0));

        registry
            .complete_job(&later, job_id, 45, "ipfs://proof".to_string())
            .unwrap();
        let job = registry.job(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Delivered);
        assert_eq!(job.actual_impact, 45);
        assert_eq!(job.metadata_ref, "ipfs://proof");
        assert!(job.completed_at >= job.started_at);
    }

    #[test]
    fn test_start_requires_fulfiller() {
        let mut registry = AssetRegistry::new();
        let job_id = created(&mut registry);
        let admin = p("admin");
        let stranger = p("stranger");
        let ctx = OpContext::new(&stranger, &admin, Utc::now());

        assert!(matches!(
            registry.start_job(&ctx, job_id),
            Err(Error::Authorization(_))
        ));
        assert_eq!(registry.status(job_id).unwrap(), JobStatus::Created);
    }

    #[test]
    fn test_cancel_rules() {
        let mut registry = AssetRegistry::new();
        let job_id = created(&mut registry);
        let admin = p("admin");
        let warehouse = p("warehouse");
        let shipper = p("shipper");

        let ctx = OpContext::new(&warehouse, &admin, Utc::now());
        assert!(matches!(
            registry.cancel_job(&ctx, job_id, "no longer needed".to_string()),
            Err(Error::Authorization(_))
        ));

        let ctx = OpContext::new(&shipper, &admin, Utc::now());
        let applied = registry
            .cancel_job(&ctx, job_id, "no longer needed".to_string())
            .unwrap();
        assert_eq!(applied.events[0].name(), "JobStatusChanged");
        assert_eq!(applied.events[1].name(), "JobCancelled");

        assert!(matches!(
            registry.cancel_job(&ctx, job_id, "again".to_string()),
            Err(Error::State(_))
        ));
    }

    #[test]
    fn test_override_is_admin_only_and_flagged() {
        let mut registry = AssetRegistry::new();
        let job_id = created(&mut registry);
        let admin = p("admin");
        let shipper = p("shipper");

        let ctx = OpContext::new(&shipper, &admin, Utc::now());
        assert!(matches!(
            registry.override_status(&ctx, job_id, JobStatus::Disputed),
            Err(Error::Authorization(_))
        ));

        let ctx = OpContext::new(&admin, &admin, Utc::now());
        let applied = registry
            .override_status(&ctx, job_id, JobStatus::Delivered)
            .unwrap();
        assert!(applied.events.iter().any(LedgerEvent::is_exceptional));
        assert_eq!(registry.status(job_id).unwrap(), JobStatus::Delivered);

        // Overrides may regress a terminal status.
        registry
            .override_status(&ctx, job_id, JobStatus::Created)
            .unwrap();
        assert_eq!(registry.status(job_id).unwrap(), JobStatus::Created);
    }

    #[test]
    fn test_token_transfer_keeps_roles() {
        let mut registry = AssetRegistry::new();
        let job_id = created(&mut registry);
        let token_id = TokenId::from(job_id);
        let admin = p("admin");
        let shipper = p("shipper");
        let buyer = p("buyer");

        let ctx = OpContext::new(&buyer, &admin, Utc::now());
        assert!(matches!(
            registry.transfer_token(&ctx, token_id, p("other")),
            Err(Error::Authorization(_))
        ));

        let ctx = OpContext::new(&shipper, &admin, Utc::now());
        registry.transfer_token(&ctx, token_id, buyer.clone()).unwrap();
        assert_eq!(registry.owner_of(token_id).unwrap(), &buyer);
        assert_eq!(registry.tokens_of(&buyer), vec![token_id]);

        // The new owner gains no role; the initiator keeps theirs.
        assert!(!registry.is_authorized(job_id, &buyer, &admin).unwrap());
        assert!(registry.is_authorized(job_id, &shipper, &admin).unwrap());
        let ctx = OpContext::new(&buyer, &admin, Utc::now());
        assert!(registry
            .cancel_job(&ctx, job_id, "new owner".to_string())
            .is_err());
    }

    #[test]
    fn test_queries() {
        let mut registry = AssetRegistry::new();
        let job_id = created(&mut registry);

        assert_eq!(registry.jobs_by_status(JobStatus::Created).len(), 1);
        assert_eq!(registry.jobs_for(&p("warehouse")).len(), 1);
        assert!(registry.jobs_for(&p("stranger")).is_empty());
        assert!(matches!(registry.job(JobId(99)), Err(Error::NotFound(_))));
        assert!(registry.is_authorized(JobId(99), &p("x"), &p("admin")).is_err());
        assert_eq!(registry.job(job_id).unwrap().distance, 100);
    }
}
