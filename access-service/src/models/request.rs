//! Access requests, their access groups and the grants they produce.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use super::target::CachedTarget;
use super::user::AuthenticatedUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantStatus {
    Active,
    Expired,
    Revoked,
}

impl GrantStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GrantStatus::Active)
    }
}

impl std::fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrantStatus::Active => write!(f, "active"),
            GrantStatus::Expired => write!(f, "expired"),
            GrantStatus::Revoked => write!(f, "revoked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("grant {grant_id} is {status} and cannot change state")]
pub struct GrantTransitionError {
    pub grant_id: String,
    pub status: GrantStatus,
}

/// Realised, time-bound access to one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub id: String,
    pub access_group_id: String,
    pub target_id: String,
    pub target_group_id: String,
    /// Provider parameters the grant was issued with.
    pub with: BTreeMap<String, String>,
    pub access_rule: String,
    pub requested_by: String,
    /// Identity the access was provisioned for (the requester's email).
    pub subject: String,
    pub status: GrantStatus,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub revoked_by: Option<String>,
}

impl Grant {
    /// Active -> Revoked.
    pub fn revoke(&mut self, actor_id: &str) -> Result<(), GrantTransitionError> {
        self.ensure_active()?;
        self.status = GrantStatus::Revoked;
        self.revoked_by = Some(actor_id.to_string());
        Ok(())
    }

    /// Active -> Expired.
    pub fn expire(&mut self) -> Result<(), GrantTransitionError> {
        self.ensure_active()?;
        self.status = GrantStatus::Expired;
        Ok(())
    }

    /// Expire the grant if its window has closed. Returns whether it changed.
    pub fn expire_if_elapsed(&mut self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && self.end <= now && self.expire().is_ok()
    }

    fn ensure_active(&self) -> Result<(), GrantTransitionError> {
        if self.status.is_terminal() {
            return Err(GrantTransitionError {
                grant_id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }
}

/// Targets that are granted together under one access rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessGroup {
    pub id: String,
    pub request_id: String,
    pub access_rule: String,
    pub targets: Vec<CachedTarget>,
    pub duration_seconds: i64,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

impl AccessGroup {
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.duration_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedBy {
    pub id: String,
    pub email: String,
}

impl From<&AuthenticatedUser> for RequestedBy {
    fn from(user: &AuthenticatedUser) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub id: String,
    pub preflight_id: String,
    pub requested_by: RequestedBy,
    pub reason: Option<String>,
    pub groups: Vec<AccessGroup>,
    /// Users allowed to review (and therefore revoke) this request.
    #[serde(default)]
    pub reviewers: BTreeSet<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl AccessRequest {
    pub fn grants(&self) -> impl Iterator<Item = &Grant> {
        self.groups.iter().flat_map(|g| g.grants.iter())
    }

    pub fn grants_mut(&mut self) -> impl Iterator<Item = &mut Grant> {
        self.groups.iter_mut().flat_map(|g| g.grants.iter_mut())
    }

    pub fn has_reviewer(&self, user: &AuthenticatedUser) -> bool {
        self.reviewers.contains(&user.id) || self.reviewers.contains(&user.email)
    }

    /// Move every grant whose window has closed to Expired. Returns whether
    /// anything changed.
    pub fn expire_elapsed_grants(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for grant in self.grants_mut() {
            changed |= grant.expire_if_elapsed(now);
        }
        if changed {
            self.updated_at = now;
        }
        changed
    }

    /// Overwrite grants with the copies returned by the workflow, matched by id.
    /// Returns how many grants were replaced.
    pub fn apply_grant_updates(&mut self, updated: &[Grant], now: DateTime<Utc>) -> usize {
        let mut applied = 0;
        for grant in self.grants_mut() {
            if let Some(u) = updated.iter().find(|u| u.id == grant.id) {
                *grant = u.clone();
                applied += 1;
            }
        }
        if applied > 0 {
            self.updated_at = now;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(end: DateTime<Utc>) -> Grant {
        Grant {
            id: "g-1".to_string(),
            access_group_id: "ag-1".to_string(),
            target_id: "t-1".to_string(),
            target_group_id: "aws".to_string(),
            with: BTreeMap::new(),
            access_rule: "rule".to_string(),
            requested_by: "user-1".to_string(),
            subject: "user@example.com".to_string(),
            status: GrantStatus::Active,
            start: end - Duration::hours(1),
            end,
            revoked_by: None,
        }
    }

    #[test]
    fn revoke_is_terminal() {
        let mut g = grant(Utc::now() + Duration::hours(1));
        g.revoke("admin").unwrap();
        assert_eq!(g.status, GrantStatus::Revoked);
        assert_eq!(g.revoked_by.as_deref(), Some("admin"));

        let err = g.revoke("admin").unwrap_err();
        assert_eq!(err.status, GrantStatus::Revoked);
        assert!(g.expire().is_err());
    }

    #[test]
    fn expired_grants_cannot_be_revoked() {
        let mut g = grant(Utc::now() + Duration::hours(1));
        g.expire().unwrap();
        assert!(g.revoke("admin").is_err());
        assert_eq!(g.status, GrantStatus::Expired);
    }

    #[test]
    fn expire_if_elapsed_respects_end() {
        let now = Utc::now();
        let mut live = grant(now + Duration::minutes(5));
        assert!(!live.expire_if_elapsed(now));
        assert_eq!(live.status, GrantStatus::Active);

        let mut done = grant(now - Duration::minutes(5));
        assert!(done.expire_if_elapsed(now));
        assert_eq!(done.status, GrantStatus::Expired);
        assert!(!done.expire_if_elapsed(now));
    }
}
