//! Request/grant orchestration.
//!
//! A request consumes a preflight, turns each of its access groups into an
//! [`AccessGroup`] and asks the workflow for grants, one call per group. The
//! fan-out is not transactional: if group N fails, groups 1..N-1 keep their
//! grants, the request is not persisted and the preflight stays consumed.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use super::authz::Authorizer;
use super::clock::Clock;
use super::error::ServiceError;
use super::events::{AccessEvent, EventPutter};
use super::metrics;
use super::store::{Page, Store};
use super::workflow::Workflow;
use crate::config::GrantPolicy;
use crate::models::{
    filter_visible, AccessGroup, AccessRequest, AuthenticatedUser, CachedTarget, Preflight,
    RequestedBy,
};

/// Per-access-group options supplied with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOption {
    /// Id of a preflight access group.
    pub id: String,
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub preflight_id: String,
    pub reason: Option<String>,
    pub group_options: Vec<GroupOption>,
}

pub struct AccessService {
    store: Arc<dyn Store>,
    workflow: Arc<dyn Workflow>,
    authorizer: Arc<dyn Authorizer>,
    events: Arc<dyn EventPutter>,
    clock: Arc<dyn Clock>,
    grant_policy: GrantPolicy,
}

impl AccessService {
    pub fn new(
        store: Arc<dyn Store>,
        workflow: Arc<dyn Workflow>,
        authorizer: Arc<dyn Authorizer>,
        events: Arc<dyn EventPutter>,
        clock: Arc<dyn Clock>,
        grant_policy: GrantPolicy,
    ) -> Self {
        Self {
            store,
            workflow,
            authorizer,
            events,
            clock,
            grant_policy,
        }
    }

    pub async fn create_request(
        &self,
        user: &AuthenticatedUser,
        input: CreateRequest,
    ) -> Result<AccessRequest, ServiceError> {
        let preflight = self
            .store
            .get_preflight(&input.preflight_id, &user.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("preflight {}", input.preflight_id)))?;

        if let Err(e) = self.validate_group_options(&preflight, &input.group_options) {
            metrics::record_request("invalid");
            return Err(e);
        }

        let now = self.clock.now();
        let Some(preflight) = self
            .store
            .claim_preflight(&input.preflight_id, &user.id, now)
            .await?
        else {
            // Someone else consumed it between the read and the claim.
            metrics::record_request("preflight_consumed");
            return Err(ServiceError::NotFound(format!(
                "preflight {}",
                input.preflight_id
            )));
        };

        let request_id = uuid::Uuid::new_v4().to_string();
        let requested_by = RequestedBy::from(user);
        let mut groups = self.access_groups(&request_id, &preflight, &input.group_options);

        for index in 0..groups.len() {
            let outcome = self.workflow.grant(&groups[index], &requested_by).await;
            match outcome {
                Ok(grants) => groups[index].grants = grants,
                Err(e) => {
                    let granted: Vec<&str> =
                        groups[..index].iter().map(|g| g.id.as_str()).collect();
                    metrics::record_request("grant_failed");
                    tracing::error!(
                        request_id = %request_id,
                        preflight_id = %preflight.id,
                        failed_group = %groups[index].id,
                        granted_groups = ?granted,
                        error = %e,
                        "Grant fan-out failed; earlier groups keep their grants"
                    );
                    return Err(e.into());
                }
            }
        }

        let reviewers: BTreeSet<String> = groups
            .iter()
            .flat_map(|g| g.targets.iter())
            .flat_map(|t| t.reviewers.iter().cloned())
            .collect();

        let request = AccessRequest {
            id: request_id,
            preflight_id: preflight.id.clone(),
            requested_by,
            reason: input.reason,
            groups,
            reviewers,
            created_at: now,
            updated_at: now,
        };
        self.store.put_request(&request).await?;

        let grant_ids: Vec<String> = request.grants().map(|g| g.id.clone()).collect();
        metrics::record_request("created");
        metrics::record_grants_issued(grant_ids.len());
        tracing::info!(
            request_id = %request.id,
            user_id = %user.id,
            grants = grant_ids.len(),
            "Access request created"
        );

        self.emit(AccessEvent::RequestCreated {
            request_id: request.id.clone(),
            requested_by: user.id.clone(),
            grant_ids,
        })
        .await;

        Ok(request)
    }

    /// Revoke every active grant of a request. Callers who are not the
    /// requester, an administrator or a reviewer get `NotFound`.
    pub async fn revoke_request(
        &self,
        actor: &AuthenticatedUser,
        request_id: &str,
    ) -> Result<AccessRequest, ServiceError> {
        let mut request = self.visible_request(actor, request_id).await?;

        let now = self.clock.now();
        let expired = request.expire_elapsed_grants(now);

        let revoked = match self.workflow.revoke(&request, &actor.id, &actor.email).await {
            Ok(revoked) => revoked,
            Err(e) => {
                if expired {
                    self.store.put_request(&request).await?;
                }
                tracing::debug!(request_id = %request_id, error = %e, "Revoke rejected");
                return Err(e.into());
            }
        };

        request.apply_grant_updates(&revoked, now);
        self.store.put_request(&request).await?;

        metrics::record_grants_revoked(revoked.len());
        tracing::info!(
            request_id = %request.id,
            actor_id = %actor.id,
            grants = revoked.len(),
            "Access request revoked"
        );

        for grant in &revoked {
            self.emit(AccessEvent::GrantRevoked {
                request_id: request.id.clone(),
                grant_id: grant.id.clone(),
                revoked_by: actor.id.clone(),
            })
            .await;
        }

        Ok(request)
    }

    pub async fn get_request_for_user(
        &self,
        user: &AuthenticatedUser,
        request_id: &str,
    ) -> Result<AccessRequest, ServiceError> {
        let mut request = self.visible_request(user, request_id).await?;
        request.expire_elapsed_grants(self.clock.now());
        Ok(request)
    }

    pub async fn list_requests_for_user(
        &self,
        user: &AuthenticatedUser,
        page: Option<&str>,
    ) -> Result<Page<AccessRequest>, ServiceError> {
        let page = self.store.list_requests_for_user(&user.id, page).await?;
        Ok(self.with_current_status(page))
    }

    /// Every request. Callers check for administrator rights.
    pub async fn list_requests(
        &self,
        page: Option<&str>,
    ) -> Result<Page<AccessRequest>, ServiceError> {
        let page = self.store.list_requests(page).await?;
        Ok(self.with_current_status(page))
    }

    /// Targets `user` may request. Filtering happens after pagination, so a
    /// page may hold fewer items than the page size.
    pub async fn list_entitlement_targets(
        &self,
        user: &AuthenticatedUser,
        page: Option<&str>,
    ) -> Result<Page<CachedTarget>, ServiceError> {
        let page = self.store.list_cached_targets(page).await?;
        Ok(Page {
            items: filter_visible(page.items, &user.groups),
            next: page.next,
        })
    }

    /// Upsert one entry of the entitlement cache.
    pub async fn put_entitlement_target(
        &self,
        target: CachedTarget,
    ) -> Result<CachedTarget, ServiceError> {
        self.store.put_cached_target(&target).await?;
        tracing::info!(
            target_id = %target.id,
            target_group_id = %target.target_group_id,
            "Entitlement target cached"
        );
        Ok(target)
    }

    async fn visible_request(
        &self,
        user: &AuthenticatedUser,
        request_id: &str,
    ) -> Result<AccessRequest, ServiceError> {
        let not_found = || ServiceError::NotFound(format!("request {}", request_id));

        let request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(not_found)?;

        let allowed = request.requested_by.id == user.id
            || self.authorizer.is_admin(user).await?
            || self.authorizer.is_reviewer(user, &request).await?;

        if !allowed {
            tracing::debug!(
                request_id = %request_id,
                user_id = %user.id,
                "Request hidden from user"
            );
            return Err(not_found());
        }
        Ok(request)
    }

    fn validate_group_options(
        &self,
        preflight: &Preflight,
        options: &[GroupOption],
    ) -> Result<(), ServiceError> {
        let mut seen = HashSet::new();
        for option in options {
            if preflight.access_group(&option.id).is_none() {
                return Err(ServiceError::InvalidRequest(format!(
                    "access group {} is not part of preflight {}",
                    option.id, preflight.id
                )));
            }
            if !seen.insert(option.id.as_str()) {
                return Err(ServiceError::InvalidRequest(format!(
                    "access group {} has more than one set of options",
                    option.id
                )));
            }
            if let Some(duration) = option.duration_seconds {
                if duration <= 0 || duration > self.grant_policy.max_duration_secs {
                    return Err(ServiceError::InvalidRequest(format!(
                        "duration for access group {} must be between 1 and {} seconds",
                        option.id, self.grant_policy.max_duration_secs
                    )));
                }
            }
        }
        Ok(())
    }

    fn access_groups(
        &self,
        request_id: &str,
        preflight: &Preflight,
        options: &[GroupOption],
    ) -> Vec<AccessGroup> {
        preflight
            .access_groups
            .iter()
            .map(|group| {
                let duration_seconds = options
                    .iter()
                    .find(|o| o.id == group.id)
                    .and_then(|o| o.duration_seconds)
                    .unwrap_or(self.grant_policy.default_duration_secs);

                AccessGroup {
                    id: group.id.clone(),
                    request_id: request_id.to_string(),
                    access_rule: group.access_rule.clone(),
                    targets: group.targets.clone(),
                    duration_seconds,
                    grants: Vec::new(),
                }
            })
            .collect()
    }

    fn with_current_status(&self, page: Page<AccessRequest>) -> Page<AccessRequest> {
        let now = self.clock.now();
        page.map(|mut request| {
            request.expire_elapsed_grants(now);
            request
        })
    }

    async fn emit(&self, event: AccessEvent) {
        let name = event.name();
        if let Err(e) = self.events.put(event).await {
            tracing::error!(event = name, error = %e, "Failed to emit access event");
        }
    }
}
