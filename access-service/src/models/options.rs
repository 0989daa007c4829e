//! Provider argument options and their cached form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::target::GroupScoped;

/// One selectable value for a provider argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOption {
    pub value: String,
    pub label: String,
    pub description: Option<String>,
    /// Groups allowed to see this option. Empty means unrestricted.
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl GroupScoped for ProviderOption {
    fn is_visible_to(&self, user_groups: &BTreeSet<String>) -> bool {
        self.groups.is_empty() || !self.groups.is_disjoint(user_groups)
    }
}

/// Options bundled under a named grouping (e.g. an OU containing accounts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderArgGroupOption {
    pub id: String,
    pub title: String,
    pub options: Vec<ProviderOption>,
}

impl ProviderArgGroupOption {
    /// Copy of this group holding only the options visible to `user_groups`.
    /// `None` when nothing in the group is visible.
    pub fn visible_to(&self, user_groups: &BTreeSet<String>) -> Option<Self> {
        let options: Vec<ProviderOption> = self
            .options
            .iter()
            .filter(|o| o.is_visible_to(user_groups))
            .cloned()
            .collect();

        if options.is_empty() {
            return None;
        }

        Some(Self {
            id: self.id.clone(),
            title: self.title.clone(),
            options,
        })
    }
}

/// Options fetched from a provider, keyed by (provider_id, arg_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedArgOptions {
    pub provider_id: String,
    pub arg_id: String,
    pub options: Vec<ProviderOption>,
    pub grouped_options: Vec<ProviderArgGroupOption>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub fetched_at: DateTime<Utc>,
}

/// Result of a cache load or refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgOptions {
    #[serde(default)]
    pub options: Vec<ProviderOption>,
    #[serde(default)]
    pub grouped_options: Vec<ProviderArgGroupOption>,
}

impl ArgOptions {
    /// Membership filter over an already-loaded option set.
    pub fn visible_to(&self, user_groups: &BTreeSet<String>) -> Self {
        Self {
            options: super::target::filter_visible(self.options.clone(), user_groups),
            grouped_options: self
                .grouped_options
                .iter()
                .filter_map(|g| g.visible_to(user_groups))
                .collect(),
        }
    }
}

impl From<CachedArgOptions> for ArgOptions {
    fn from(cached: CachedArgOptions) -> Self {
        Self {
            options: cached.options,
            grouped_options: cached.grouped_options,
        }
    }
}
