//! Target groups and the deployments bound to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::provider::Provider;

/// Target schema captured when a group is created. Never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSchema {
    /// Raw provider reference the schema was resolved from.
    pub from: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub id: String,
    pub target_schema: TargetSchema,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl TargetGroup {
    pub fn new(id: String, target_schema: TargetSchema, now: DateTime<Utc>) -> Self {
        Self {
            id,
            target_schema,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

/// Health message reported by a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
}

/// Binding of a deployment to a target group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGroupAssignment {
    pub target_group_id: String,
    /// Routing rank among deployments of the same group. Stored, not interpreted.
    pub priority: i32,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

/// A running provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub provider: Provider,
    pub function_url: Option<String>,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    pub target_group_assignment: Option<TargetGroupAssignment>,
}

impl Deployment {
    pub fn is_assigned(&self) -> bool {
        self.target_group_assignment.is_some()
    }

    pub fn assigned_to(&self, target_group_id: &str) -> bool {
        self.target_group_assignment
            .as_ref()
            .is_some_and(|a| a.target_group_id == target_group_id)
    }

    /// Assignment for `target_group_id`, carrying over this deployment's diagnostics.
    pub fn assignment_for(&self, target_group_id: &str, priority: i32) -> TargetGroupAssignment {
        TargetGroupAssignment {
            target_group_id: target_group_id.to_string(),
            priority,
            diagnostics: self.diagnostics.clone(),
        }
    }
}
