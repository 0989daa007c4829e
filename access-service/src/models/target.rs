//! Entitlement targets and group-membership visibility.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Something whose visibility depends on the viewer's identity groups.
pub trait GroupScoped {
    fn is_visible_to(&self, user_groups: &BTreeSet<String>) -> bool;
}

/// Keep the items visible to `user_groups`, preserving order.
pub fn filter_visible<T>(items: Vec<T>, user_groups: &BTreeSet<String>) -> Vec<T>
where
    T: GroupScoped,
{
    items
        .into_iter()
        .filter(|item| item.is_visible_to(user_groups))
        .collect()
}

/// A single requestable entitlement, as cached from its provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTarget {
    pub id: String,
    pub target_group_id: String,
    /// Access rule that exposes this target.
    pub access_rule: String,
    /// Provider parameters identifying the target (e.g. `accountId`).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Identity groups the access rule grants this target to.
    #[serde(default)]
    pub groups: BTreeSet<String>,
    /// Users who may review requests for this target.
    #[serde(default)]
    pub reviewers: BTreeSet<String>,
}

impl GroupScoped for CachedTarget {
    /// A target is only visible through one of its groups; an ungrouped
    /// target is requestable by nobody.
    fn is_visible_to(&self, user_groups: &BTreeSet<String>) -> bool {
        !self.groups.is_disjoint(user_groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, groups: &[&str]) -> CachedTarget {
        CachedTarget {
            id: id.to_string(),
            target_group_id: "aws".to_string(),
            access_rule: "rule-1".to_string(),
            fields: BTreeMap::new(),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            reviewers: BTreeSet::new(),
        }
    }

    fn groups(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|g| g.to_string()).collect()
    }

    #[test]
    fn filters_by_membership_in_order() {
        let targets = vec![
            target("c", &["eng"]),
            target("a", &["ops"]),
            target("b", &["eng", "ops"]),
        ];
        let visible = filter_visible(targets, &groups(&["eng"]));
        let ids: Vec<&str> = visible.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn ungrouped_targets_are_hidden() {
        let visible = filter_visible(vec![target("a", &[])], &groups(&["eng"]));
        assert!(visible.is_empty());
    }
}
