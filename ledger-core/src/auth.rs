//! Role resolution for job-scoped operations
//!
//! Authorization is a pure function of ledger state: the role set fixed on a
//! job at creation plus the ledger's administrator. Holding a job's ownership
//! token grants nothing here.

use crate::types::{JobRecord, Principal, Role};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Per-operation execution context
#[derive(Debug, Clone, Copy)]
pub struct OpContext<'a> {
    /// Principal submitting the operation
    pub caller: &'a Principal,
    /// Ledger administrator
    pub administrator: &'a Principal,
    /// Ledger time for this step
    pub now: DateTime<Utc>,
}

impl<'a> OpContext<'a> {
    /// Create context
    pub fn new(caller: &'a Principal, administrator: &'a Principal, now: DateTime<Utc>) -> Self {
        Self {
            caller,
            administrator,
            now,
        }
    }

    /// Caller is the administrator
    pub fn is_administrator(&self) -> bool {
        !self.caller.is_zero() && self.caller == self.administrator
    }

    /// Fail unless the caller is the administrator
    pub fn require_administrator(&self, operation: &str) -> Result<()> {
        if self.is_administrator() {
            Ok(())
        } else {
            Err(Error::Authorization(format!(
                "{} requires the administrator, caller is {}",
                operation, self.caller
            )))
        }
    }

    /// Fail unless the caller holds one of `allowed` on `job`
    pub fn require_role(&self, job: &JobRecord, allowed: &[Role], operation: &str) -> Result<()> {
        let held = job.roles_of(self.caller, self.administrator);
        if held.iter().any(|role| allowed.contains(role)) {
            return Ok(());
        }
        tracing::debug!(
            job_id = %job.job_id,
            caller = %self.caller,
            ?allowed,
            "Role check failed"
        );
        Err(Error::Authorization(format!(
            "{} on {} requires one of {:?}, caller {} holds {:?}",
            operation, job.job_id, allowed, self.caller, held
        )))
    }
}

/// True iff `account` is the job's initiator, fulfiller, destination party or
/// the administrator
pub fn is_authorized(job: &JobRecord, account: &Principal, administrator: &Principal) -> bool {
    !job.roles_of(account, administrator).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobId, JobStatus};

    fn job() -> JobRecord {
        JobRecord {
            job_id: JobId(1),
            initiator: Principal::new("shipper"),
            fulfiller: Principal::new("carrier"),
            destination_party: Principal::new("warehouse"),
            origin: "Rotterdam".to_string(),
            destination: "Duisburg".to_string(),
            distance: 230,
            estimated_impact: 40,
            actual_impact: 0,
            status: JobStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            metadata_ref: String::new(),
        }
    }

    #[test]
    fn test_every_role_is_authorized() {
        let job = job();
        let admin = Principal::new("admin");
        for account in ["shipper", "carrier", "warehouse", "admin"] {
            assert!(is_authorized(&job, &Principal::new(account), &admin));
        }
        assert!(!is_authorized(&job, &Principal::new("stranger"), &admin));
        assert!(!is_authorized(&job, &Principal::zero(), &admin));
    }

    #[test]
    fn test_require_role() {
        let job = job();
        let admin = Principal::new("admin");
        let carrier = Principal::new("carrier");
        let ctx = OpContext::new(&carrier, &admin, Utc::now());

        assert!(ctx.require_role(&job, &[Role::Fulfiller], "start").is_ok());
        assert!(matches!(
            ctx.require_role(&job, &[Role::Initiator], "cancel"),
            Err(Error::Authorization(_))
        ));
        assert!(ctx.require_administrator("refund").is_err());
    }

    #[test]
    fn test_zero_administrator_never_matches() {
        let zero = Principal::zero();
        let ctx = OpContext::new(&zero, &zero, Utc::now());
        assert!(!ctx.is_administrator());
    }
}
