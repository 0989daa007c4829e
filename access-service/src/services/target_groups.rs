//! Target group registry: creation, deployment registration and binding.

use std::sync::Arc;

use super::clock::Clock;
use super::compatibility::CompatibilityChecker;
use super::error::ServiceError;
use super::store::{AssignmentGuard, Page, Store, StoreError};
use crate::config::SchemaValidation;
use crate::models::{Deployment, Provider, TargetGroup, TargetSchema};

const REGISTER_ATTEMPTS: u32 = 3;

pub struct TargetGroupService {
    store: Arc<dyn Store>,
    checker: Arc<CompatibilityChecker>,
    clock: Arc<dyn Clock>,
    schema_validation: SchemaValidation,
}

impl TargetGroupService {
    pub fn new(
        store: Arc<dyn Store>,
        checker: Arc<CompatibilityChecker>,
        clock: Arc<dyn Clock>,
        schema_validation: SchemaValidation,
    ) -> Self {
        Self {
            store,
            checker,
            clock,
            schema_validation,
        }
    }

    /// Create a target group whose schema is resolved from the provider
    /// `target_schema_ref` (`publisher/name@version`). The schema is captured
    /// once and never rewritten.
    pub async fn create_target_group(
        &self,
        id: &str,
        target_schema_ref: &str,
    ) -> Result<TargetGroup, ServiceError> {
        if self.store.get_target_group(id).await?.is_some() {
            tracing::debug!(target_group_id = %id, "Target group already exists");
            return Err(ServiceError::AlreadyExists(format!("target group {}", id)));
        }

        let provider: Provider = target_schema_ref.parse()?;
        let schema = self.checker.target_schema(&provider).await?;

        let group = TargetGroup::new(
            id.to_string(),
            TargetSchema {
                from: target_schema_ref.to_string(),
                schema,
            },
            self.clock.now(),
        );

        match self.store.insert_target_group(&group).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed) => {
                tracing::warn!(target_group_id = %id, "Lost race creating target group");
                return Err(ServiceError::AlreadyExists(format!("target group {}", id)));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            target_group_id = %group.id,
            provider = %provider,
            "Target group created"
        );
        Ok(group)
    }

    pub async fn get_target_group(&self, id: &str) -> Result<TargetGroup, ServiceError> {
        self.store
            .get_target_group(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("target group {}", id)))
    }

    pub async fn list_target_groups(
        &self,
        page: Option<&str>,
    ) -> Result<Page<TargetGroup>, ServiceError> {
        Ok(self.store.list_target_groups(page).await?)
    }

    /// Record a running provider instance. Only the provider, function URL and
    /// diagnostics are written; an existing binding is left as it is. With
    /// enforced schema validation a bound deployment may only switch to a
    /// provider whose target schema still matches its group.
    pub async fn register_deployment(
        &self,
        deployment: Deployment,
    ) -> Result<Deployment, ServiceError> {
        for attempt in 1..=REGISTER_ATTEMPTS {
            let existing = self.store.get_deployment(&deployment.id).await?;
            let guard = self.registration_guard(existing.as_ref(), &deployment).await?;

            match self.store.upsert_deployment(&deployment, &guard).await {
                Ok(stored) => {
                    tracing::info!(
                        deployment_id = %stored.id,
                        provider = %stored.provider,
                        linked = stored.is_assigned(),
                        "Deployment registered"
                    );
                    return Ok(stored);
                }
                Err(StoreError::ConditionFailed) => {
                    tracing::debug!(
                        deployment_id = %deployment.id,
                        attempt,
                        "Deployment binding changed during registration, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(deployment_id = %deployment.id, "Deployment registration kept racing a link");
        Err(StoreError::ConditionFailed.into())
    }

    /// Condition under which a registration may be written, checked against the
    /// binding observed in `existing`.
    async fn registration_guard(
        &self,
        existing: Option<&Deployment>,
        deployment: &Deployment,
    ) -> Result<AssignmentGuard, ServiceError> {
        let provider_changed = existing.map_or(true, |e| e.provider != deployment.provider);
        if self.schema_validation != SchemaValidation::Enforced || !provider_changed {
            return Ok(AssignmentGuard::Any);
        }

        match existing.and_then(|e| e.target_group_assignment.as_ref()) {
            Some(assignment) => {
                let group = self.get_target_group(&assignment.target_group_id).await?;
                self.ensure_compatible(&group, &deployment.provider).await?;
                Ok(AssignmentGuard::AssignedTo(group.id))
            }
            None => Ok(AssignmentGuard::Unassigned),
        }
    }

    async fn ensure_compatible(
        &self,
        group: &TargetGroup,
        provider: &Provider,
    ) -> Result<(), ServiceError> {
        let provider_schema = self.checker.target_schema(provider).await?;
        if provider_schema != group.target_schema.schema {
            tracing::warn!(
                target_group_id = %group.id,
                provider = %provider,
                "Deployment provider schema does not match target group"
            );
            return Err(ServiceError::IncompatibleSchema {
                target_group_id: group.id.clone(),
                provider: provider.to_string(),
            });
        }
        Ok(())
    }

    /// Bind `deployment_id` to `target_group_id`. At most one deployment may be
    /// bound to a target group, and a deployment may be bound to only one
    /// target group. Relinking an existing binding fails `AlreadyLinked`.
    pub async fn link_deployment(
        &self,
        target_group_id: &str,
        deployment_id: &str,
        priority: i32,
    ) -> Result<TargetGroup, ServiceError> {
        let group = self.get_target_group(target_group_id).await?;
        let deployment = self
            .store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("deployment {}", deployment_id)))?;

        if self
            .store
            .find_deployment_for_target_group(target_group_id)
            .await?
            .is_some()
        {
            tracing::debug!(target_group_id = %target_group_id, "Target group already linked");
            return Err(ServiceError::AlreadyLinked {
                target_group_id: target_group_id.to_string(),
            });
        }

        if let Some(assignment) = &deployment.target_group_assignment {
            tracing::debug!(
                deployment_id = %deployment_id,
                assigned_to = %assignment.target_group_id,
                "Deployment already linked elsewhere"
            );
            return Err(ServiceError::AlreadyLinked {
                target_group_id: assignment.target_group_id.clone(),
            });
        }

        if self.schema_validation == SchemaValidation::Enforced {
            self.ensure_compatible(&group, &deployment.provider).await?;
        }

        let assignment = deployment.assignment_for(target_group_id, priority);
        // Fails if a concurrent registration replaced the provider checked above.
        match self
            .store
            .assign_deployment(deployment_id, &deployment.provider, &assignment)
            .await
        {
            Ok(_) => {}
            Err(StoreError::ConditionFailed) => {
                tracing::warn!(
                    target_group_id = %target_group_id,
                    deployment_id = %deployment_id,
                    "Lost race linking deployment"
                );
                return Err(ServiceError::AlreadyLinked {
                    target_group_id: target_group_id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            target_group_id = %target_group_id,
            deployment_id = %deployment_id,
            priority,
            "Deployment linked"
        );
        Ok(group)
    }

    /// Remove the binding of `deployment_id` to `target_group_id`.
    pub async fn unlink_deployment(
        &self,
        target_group_id: &str,
        deployment_id: &str,
    ) -> Result<Deployment, ServiceError> {
        let not_linked = || {
            ServiceError::NotFound(format!(
                "deployment {} linked to target group {}",
                deployment_id, target_group_id
            ))
        };

        match self
            .store
            .clear_deployment_assignment(deployment_id, target_group_id)
            .await
        {
            Ok(deployment) => {
                tracing::info!(
                    target_group_id = %target_group_id,
                    deployment_id = %deployment_id,
                    "Deployment unlinked"
                );
                Ok(deployment)
            }
            Err(StoreError::ConditionFailed) => Err(not_linked()),
            Err(e) => Err(e.into()),
        }
    }
}
