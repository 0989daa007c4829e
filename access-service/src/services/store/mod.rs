//! Keyed store contract.
//!
//! Lookups return `Ok(None)` when nothing matches. The store offers no
//! multi-key transactions; every invariant that spans a read and a write is
//! pushed down into a conditional write (`insert_target_group`,
//! `assign_deployment`, `upsert_deployment`, `claim_preflight`) that fails with
//! [`StoreError::ConditionFailed`] when another writer got there first.

mod memory;
mod mongo;

pub use memory::InMemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{
    AccessRequest, CachedArgOptions, CachedTarget, Deployment, Preflight, Provider, TargetGroup,
    TargetGroupAssignment,
};

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("conditional write failed")]
    ConditionFailed,

    #[error("invalid page token")]
    InvalidPageToken,

    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Condition on a deployment's assignment under which `upsert_deployment`
/// may write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentGuard {
    Any,
    /// Missing, or present and bound to no target group.
    Unassigned,
    /// Present and bound to this target group.
    AssignedTo(String),
}

/// One page of results plus the token for the next page, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next: self.next,
        }
    }
}

/// Opaque pagination token. Encodes the offset of the next page.
pub(crate) fn encode_page_token(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(offset.to_string())
}

pub(crate) fn decode_page_token(token: Option<&str>) -> Result<usize, StoreError> {
    let Some(token) = token else {
        return Ok(0);
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| StoreError::InvalidPageToken)?;
    String::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(StoreError::InvalidPageToken)
}

/// Slice `offset..offset+page_size` out of `items` (already in key order).
pub(crate) fn paginate<T>(items: Vec<T>, offset: usize, page_size: usize) -> Page<T> {
    let total = items.len();
    let items: Vec<T> = items.into_iter().skip(offset).take(page_size).collect();
    let next_offset = offset + items.len();
    Page {
        next: (next_offset < total).then(|| encode_page_token(next_offset)),
        items,
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    // Target groups
    async fn get_target_group(&self, id: &str) -> Result<Option<TargetGroup>, StoreError>;
    async fn list_target_groups(&self, page: Option<&str>) -> Result<Page<TargetGroup>, StoreError>;
    /// Insert only if no group with this id exists.
    async fn insert_target_group(&self, group: &TargetGroup) -> Result<(), StoreError>;

    // Deployments
    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, StoreError>;
    /// Insert a deployment, or update the provider, function URL and
    /// diagnostics of an existing one. The assignment is never written; a new
    /// deployment starts unassigned.
    async fn upsert_deployment(
        &self,
        deployment: &Deployment,
        guard: &AssignmentGuard,
    ) -> Result<Deployment, StoreError>;
    async fn find_deployment_for_target_group(
        &self,
        target_group_id: &str,
    ) -> Result<Option<Deployment>, StoreError>;
    /// Set the assignment only if the deployment is unassigned, still runs
    /// `provider`, and no other deployment is assigned to the same target group.
    async fn assign_deployment(
        &self,
        deployment_id: &str,
        provider: &Provider,
        assignment: &TargetGroupAssignment,
    ) -> Result<Deployment, StoreError>;
    /// Clear the assignment only if it currently points at `target_group_id`.
    async fn clear_deployment_assignment(
        &self,
        deployment_id: &str,
        target_group_id: &str,
    ) -> Result<Deployment, StoreError>;

    // Preflights
    async fn put_preflight(&self, preflight: &Preflight) -> Result<(), StoreError>;
    /// Unconsumed preflight owned by `user_id`.
    async fn get_preflight(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Preflight>, StoreError>;
    /// Atomically mark an unconsumed preflight owned by `user_id` as consumed.
    /// `None` if it does not exist, belongs to someone else or was already
    /// claimed.
    async fn claim_preflight(
        &self,
        id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Preflight>, StoreError>;

    // Requests
    async fn put_request(&self, request: &AccessRequest) -> Result<(), StoreError>;
    async fn get_request(&self, id: &str) -> Result<Option<AccessRequest>, StoreError>;
    async fn list_requests_for_user(
        &self,
        user_id: &str,
        page: Option<&str>,
    ) -> Result<Page<AccessRequest>, StoreError>;
    async fn list_requests(&self, page: Option<&str>) -> Result<Page<AccessRequest>, StoreError>;

    // Entitlement cache
    async fn get_cached_target(&self, id: &str) -> Result<Option<CachedTarget>, StoreError>;
    async fn put_cached_target(&self, target: &CachedTarget) -> Result<(), StoreError>;
    async fn list_cached_targets(
        &self,
        page: Option<&str>,
    ) -> Result<Page<CachedTarget>, StoreError>;

    // Provider argument options
    async fn get_arg_options(
        &self,
        provider_id: &str,
        arg_id: &str,
    ) -> Result<Option<CachedArgOptions>, StoreError>;
    async fn put_arg_options(&self, options: &CachedArgOptions) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_tokens_round_trip_offsets() {
        assert_eq!(decode_page_token(None).unwrap(), 0);
        let token = encode_page_token(150);
        assert_eq!(decode_page_token(Some(&token)).unwrap(), 150);
        assert!(matches!(
            decode_page_token(Some("not a token!")),
            Err(StoreError::InvalidPageToken)
        ));
    }

    #[test]
    fn paginate_emits_next_token_until_exhausted() {
        let first = paginate((0..5).collect::<Vec<_>>(), 0, 2);
        assert_eq!(first.items, vec![0, 1]);
        let offset = decode_page_token(first.next.as_deref()).unwrap();
        assert_eq!(offset, 2);

        let last = paginate((0..5).collect::<Vec<_>>(), 4, 2);
        assert_eq!(last.items, vec![4]);
        assert!(last.next.is_none());
    }
}
