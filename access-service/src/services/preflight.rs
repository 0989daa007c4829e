//! Preflight processor: validates a set of requested targets for a user and
//! stores the result as a single-use draft.

use std::collections::HashSet;
use std::sync::Arc;

use super::authz::Authorizer;
use super::clock::Clock;
use super::error::ServiceError;
use super::metrics;
use super::store::Store;
use crate::models::{AuthenticatedUser, Preflight};

pub struct PreflightService {
    store: Arc<dyn Store>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
}

impl PreflightService {
    pub fn new(
        store: Arc<dyn Store>,
        authorizer: Arc<dyn Authorizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            authorizer,
            clock,
        }
    }

    /// Validate `requested_targets` for `user` and persist a preflight.
    ///
    /// Nothing is written unless every target is unique and authorized. The
    /// returned preflight carries the resolved targets grouped by access rule.
    pub async fn create_preflight(
        &self,
        user: &AuthenticatedUser,
        requested_targets: Vec<String>,
    ) -> Result<Preflight, ServiceError> {
        if requested_targets.is_empty() {
            metrics::record_preflight("invalid");
            return Err(ServiceError::InvalidRequest(
                "at least one target must be requested".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(requested_targets.len());
        if !requested_targets.iter().all(|t| seen.insert(t.as_str())) {
            metrics::record_preflight("duplicate");
            tracing::debug!(user_id = %user.id, "Duplicate targets in preflight");
            return Err(ServiceError::DuplicateTargetsRequested);
        }

        let mut targets = Vec::with_capacity(requested_targets.len());
        for target_id in &requested_targets {
            if !self
                .authorizer
                .is_authorized_for_target(user, target_id)
                .await?
            {
                metrics::record_preflight("unauthorized");
                tracing::warn!(
                    user_id = %user.id,
                    target_id = %target_id,
                    "User not authorised for requested target"
                );
                return Err(ServiceError::UserNotAuthorisedForRequestedTarget {
                    target_id: target_id.clone(),
                });
            }

            let target = self
                .store
                .get_cached_target(target_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("target {}", target_id)))?;
            targets.push(target);
        }

        let preflight = Preflight::new(&user.id, targets, self.clock.now());
        self.store.put_preflight(&preflight).await?;

        metrics::record_preflight("created");
        tracing::info!(
            preflight_id = %preflight.id,
            user_id = %user.id,
            targets = preflight.requested_targets.len(),
            access_groups = preflight.access_groups.len(),
            "Preflight created"
        );
        Ok(preflight)
    }

    /// An unconsumed preflight owned by `user`.
    pub async fn get_preflight(
        &self,
        user: &AuthenticatedUser,
        preflight_id: &str,
    ) -> Result<Preflight, ServiceError> {
        self.store
            .get_preflight(preflight_id, &user.id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("preflight {}", preflight_id)))
    }
}
