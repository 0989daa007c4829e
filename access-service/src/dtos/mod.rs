use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use validator::Validate;

use crate::models::{
    AccessGroup, AccessRequest, CachedTarget, Diagnostic, Preflight, PreflightAccessGroup,
    RequestedBy, TargetGroup, TargetSchema,
};
use crate::services::{CreateRequest, GroupOption, Page};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTargetGroupRequest {
    #[validate(length(min = 1, max = 128, message = "Target group id is required"))]
    pub id: String,

    /// Provider reference in `publisher/name@version` form.
    #[validate(length(min = 1, message = "Target schema reference is required"))]
    pub target_schema: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LinkDeploymentRequest {
    #[validate(length(min = 1, message = "Deployment id is required"))]
    pub deployment_id: String,

    #[validate(range(min = 0, message = "Priority must not be negative"))]
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterDeploymentRequest {
    #[validate(length(min = 1, message = "Deployment id is required"))]
    pub id: String,

    /// Provider reference in `publisher/name@version` form.
    #[validate(length(min = 1, message = "Provider is required"))]
    pub provider: String,

    #[validate(url(message = "Function URL must be a valid URL"))]
    pub function_url: Option<String>,

    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PutTargetRequest {
    #[validate(length(min = 1, message = "Target group id is required"))]
    pub target_group_id: String,

    #[validate(length(min = 1, message = "Access rule is required"))]
    pub access_rule: String,

    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    #[serde(default)]
    pub groups: BTreeSet<String>,

    #[serde(default)]
    pub reviewers: BTreeSet<String>,
}

impl PutTargetRequest {
    pub fn into_target(self, id: String) -> CachedTarget {
        CachedTarget {
            id,
            target_group_id: self.target_group_id,
            access_rule: self.access_rule,
            fields: self.fields,
            groups: self.groups,
            reviewers: self.reviewers,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePreflightRequest {
    #[validate(length(min = 1, message = "At least one target is required"))]
    pub targets: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GroupOptionRequest {
    #[validate(length(min = 1, message = "Access group id is required"))]
    pub id: String,

    #[validate(range(min = 1, message = "Duration must be positive"))]
    pub duration_seconds: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccessRequest {
    #[validate(length(min = 1, message = "Preflight id is required"))]
    pub preflight_id: String,

    #[validate(length(max = 2048, message = "Reason is too long"))]
    pub reason: Option<String>,

    #[validate(nested)]
    #[serde(default)]
    pub group_options: Vec<GroupOptionRequest>,
}

impl From<CreateAccessRequest> for CreateRequest {
    fn from(req: CreateAccessRequest) -> Self {
        CreateRequest {
            preflight_id: req.preflight_id,
            reason: req.reason,
            group_options: req
                .group_options
                .into_iter()
                .map(|o| GroupOption {
                    id: o.id,
                    duration_seconds: o.duration_seconds,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub next_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ArgOptionsParams {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl<T, U: Into<T>> From<Page<U>> for ListResponse<T> {
    fn from(page: Page<U>) -> Self {
        Self {
            items: page.items.into_iter().map(Into::into).collect(),
            next_token: page.next,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TargetGroupResponse {
    pub id: String,
    pub target_schema: TargetSchema,
    pub created_at: String,
    pub updated_at: String,
}

impl From<TargetGroup> for TargetGroupResponse {
    fn from(group: TargetGroup) -> Self {
        Self {
            id: group.id,
            target_schema: group.target_schema,
            created_at: group.created_at.to_rfc3339(),
            updated_at: group.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PreflightResponse {
    pub id: String,
    pub user_id: String,
    pub requested_targets: Vec<String>,
    pub access_groups: Vec<PreflightAccessGroup>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<String>,
}

impl From<Preflight> for PreflightResponse {
    fn from(preflight: Preflight) -> Self {
        Self {
            id: preflight.id,
            user_id: preflight.user_id,
            requested_targets: preflight.requested_targets,
            access_groups: preflight.access_groups,
            created_at: preflight.created_at.to_rfc3339(),
            consumed_at: preflight.consumed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccessRequestResponse {
    pub id: String,
    pub preflight_id: String,
    pub requested_by: RequestedBy,
    pub reason: Option<String>,
    pub groups: Vec<AccessGroup>,
    pub reviewers: BTreeSet<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<AccessRequest> for AccessRequestResponse {
    fn from(request: AccessRequest) -> Self {
        Self {
            id: request.id,
            preflight_id: request.preflight_id,
            requested_by: request.requested_by,
            reason: request.reason,
            groups: request.groups,
            reviewers: request.reviewers,
            created_at: request.created_at.to_rfc3339(),
            updated_at: request.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LinkDeploymentResponse {
    pub target_group_id: String,
    pub deployment_id: String,
    pub priority: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_preflight_and_bad_durations() {
        let empty = CreatePreflightRequest { targets: vec![] };
        assert!(empty.validate().is_err());

        let req = CreateAccessRequest {
            preflight_id: "pf-1".to_string(),
            reason: None,
            group_options: vec![GroupOptionRequest {
                id: "ag-1".to_string(),
                duration_seconds: Some(0),
            }],
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn converts_into_service_input() {
        let req = CreateAccessRequest {
            preflight_id: "pf-1".to_string(),
            reason: Some("incident 42".to_string()),
            group_options: vec![GroupOptionRequest {
                id: "ag-1".to_string(),
                duration_seconds: Some(600),
            }],
        };
        assert!(req.validate().is_ok());

        let input = CreateRequest::from(req);
        assert_eq!(input.preflight_id, "pf-1");
        assert_eq!(input.group_options[0].duration_seconds, Some(600));
    }
}
