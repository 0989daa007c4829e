//! Granting workflow: provisions and deprovisions access for access groups.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::clock::Clock;
use crate::models::{AccessGroup, AccessRequest, Grant, GrantStatus, RequestedBy};

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("grant is inactive")]
    GrantInactive,

    #[error("no grant to revoke")]
    NoGrant,

    #[error("workflow failed: {0}")]
    Failed(#[from] anyhow::Error),
}

#[async_trait]
pub trait Workflow: Send + Sync {
    /// Provision one grant per target of `group` for `subject`.
    async fn grant(
        &self,
        group: &AccessGroup,
        subject: &RequestedBy,
    ) -> Result<Vec<Grant>, WorkflowError>;

    /// Deprovision every active grant of `request`. Returns the revoked grants.
    async fn revoke(
        &self,
        request: &AccessRequest,
        actor_id: &str,
        actor_email: &str,
    ) -> Result<Vec<Grant>, WorkflowError>;
}

/// Workflow that records grants without calling out to a provider. Grant
/// windows start at the clock's `now`.
pub struct LocalWorkflow {
    clock: Arc<dyn Clock>,
}

impl LocalWorkflow {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl Workflow for LocalWorkflow {
    async fn grant(
        &self,
        group: &AccessGroup,
        subject: &RequestedBy,
    ) -> Result<Vec<Grant>, WorkflowError> {
        let start = self.clock.now();
        let end = start + group.duration();

        let grants = group
            .targets
            .iter()
            .map(|target| Grant {
                id: Uuid::new_v4().to_string(),
                access_group_id: group.id.clone(),
                target_id: target.id.clone(),
                target_group_id: target.target_group_id.clone(),
                with: target.fields.clone(),
                access_rule: group.access_rule.clone(),
                requested_by: subject.id.clone(),
                subject: subject.email.clone(),
                status: GrantStatus::Active,
                start,
                end,
                revoked_by: None,
            })
            .collect::<Vec<_>>();

        tracing::info!(
            access_group_id = %group.id,
            grants = grants.len(),
            "Provisioned grants"
        );
        Ok(grants)
    }

    async fn revoke(
        &self,
        request: &AccessRequest,
        actor_id: &str,
        actor_email: &str,
    ) -> Result<Vec<Grant>, WorkflowError> {
        if request.grants().next().is_none() {
            return Err(WorkflowError::NoGrant);
        }

        let mut revoked = Vec::new();
        for grant in request.grants().filter(|g| g.status == GrantStatus::Active) {
            let mut grant = grant.clone();
            grant
                .revoke(actor_id)
                .map_err(|e| WorkflowError::Failed(e.into()))?;
            revoked.push(grant);
        }

        if revoked.is_empty() {
            return Err(WorkflowError::GrantInactive);
        }

        tracing::info!(
            request_id = %request.id,
            actor = %actor_email,
            grants = revoked.len(),
            "Deprovisioned grants"
        );
        Ok(revoked)
    }
}
