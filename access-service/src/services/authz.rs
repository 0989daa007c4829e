//! Authorization source.

use async_trait::async_trait;
use std::sync::Arc;

use super::store::Store;
use crate::models::{AccessRequest, AuthenticatedUser, GroupScoped};

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn is_authorized_for_target(
        &self,
        user: &AuthenticatedUser,
        target_id: &str,
    ) -> Result<bool, anyhow::Error>;

    async fn is_admin(&self, user: &AuthenticatedUser) -> Result<bool, anyhow::Error>;

    async fn is_reviewer(
        &self,
        user: &AuthenticatedUser,
        request: &AccessRequest,
    ) -> Result<bool, anyhow::Error>;
}

/// Decides from identity-group membership: a user may request a cached target
/// when they share one of its groups, and administrators are the members of
/// `admin_group`.
pub struct GroupAuthorizer {
    store: Arc<dyn Store>,
    admin_group: String,
}

impl GroupAuthorizer {
    pub fn new(store: Arc<dyn Store>, admin_group: impl Into<String>) -> Self {
        Self {
            store,
            admin_group: admin_group.into(),
        }
    }
}

#[async_trait]
impl Authorizer for GroupAuthorizer {
    async fn is_authorized_for_target(
        &self,
        user: &AuthenticatedUser,
        target_id: &str,
    ) -> Result<bool, anyhow::Error> {
        let target = self
            .store
            .get_cached_target(target_id)
            .await
            .map_err(anyhow::Error::new)?;

        Ok(target.is_some_and(|t| t.is_visible_to(&user.groups)))
    }

    async fn is_admin(&self, user: &AuthenticatedUser) -> Result<bool, anyhow::Error> {
        Ok(user.in_group(&self.admin_group))
    }

    async fn is_reviewer(
        &self,
        user: &AuthenticatedUser,
        request: &AccessRequest,
    ) -> Result<bool, anyhow::Error> {
        Ok(request.has_reviewer(user))
    }
}
