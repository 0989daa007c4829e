//! Preflight: a validated, single-use draft of a request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::target::CachedTarget;

/// Targets from one preflight that share an access rule and are granted together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightAccessGroup {
    pub id: String,
    pub access_rule: String,
    pub targets: Vec<CachedTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preflight {
    pub id: String,
    pub user_id: String,
    /// Target ids in the order the user asked for them. No duplicates.
    pub requested_targets: Vec<String>,
    pub access_groups: Vec<PreflightAccessGroup>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    /// Set once, when a request claims this preflight.
    #[serde(default, with = "opt_chrono_datetime_as_bson_datetime")]
    pub consumed_at: Option<DateTime<Utc>>,
}

// Optional DateTime<Utc> stored as a BSON datetime.
mod opt_chrono_datetime_as_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(dt) => bson::DateTime::from_chrono(*dt).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<bson::DateTime>::deserialize(deserializer)?.map(|dt| dt.to_chrono()))
    }
}

impl Preflight {
    /// Build a preflight from resolved targets, grouping them by access rule
    /// in first-seen order.
    pub fn new(user_id: &str, targets: Vec<CachedTarget>, now: DateTime<Utc>) -> Self {
        let requested_targets = targets.iter().map(|t| t.id.clone()).collect();

        let mut access_groups: Vec<PreflightAccessGroup> = Vec::new();
        for target in targets {
            match access_groups
                .iter_mut()
                .find(|g| g.access_rule == target.access_rule)
            {
                Some(group) => group.targets.push(target),
                None => access_groups.push(PreflightAccessGroup {
                    id: Uuid::new_v4().to_string(),
                    access_rule: target.access_rule.clone(),
                    targets: vec![target],
                }),
            }
        }

        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            requested_targets,
            access_groups,
            created_at: now,
            consumed_at: None,
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub fn access_group(&self, id: &str) -> Option<&PreflightAccessGroup> {
        self.access_groups.iter().find(|g| g.id == id)
    }
}
