//! Provider references and registry documents.
//!
//! Two textual forms are accepted:
//! - canonical: `publisher/name@version`
//! - schema target reference: `publisher/name/version`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseProviderError {
    #[error("provider reference '{input}' is not in the expected format")]
    InvalidFormat { input: String },
}

/// A specific provider build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provider {
    pub publisher: String,
    pub name: String,
    pub version: String,
}

impl Provider {
    pub fn new(
        publisher: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            publisher: publisher.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Parse the three-segment `publisher/name/version` form.
    pub fn parse_schema_ref(s: &str) -> Result<Self, ParseProviderError> {
        let segments: Vec<&str> = s.split('/').collect();
        match segments.as_slice() {
            [publisher, name, version] => Ok(Self::new(*publisher, *name, *version)),
            _ => Err(invalid(s)),
        }
    }

    /// Render as a schema target reference (`publisher/name/version`).
    pub fn schema_ref(&self) -> String {
        format!("{}/{}/{}", self.publisher, self.name, self.version)
    }
}

fn invalid(s: &str) -> ParseProviderError {
    ParseProviderError::InvalidFormat {
        input: s.to_string(),
    }
}

impl FromStr for Provider {
    type Err = ParseProviderError;

    /// Parse the canonical `publisher/name@version` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split_version: Vec<&str> = s.split('@').collect();
        let [name_path, version] = split_version.as_slice() else {
            return Err(invalid(s));
        };

        let split_name: Vec<&str> = name_path.split('/').collect();
        let [publisher, name] = split_name.as_slice() else {
            return Err(invalid(s));
        };

        Ok(Self::new(*publisher, *name, *version))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.publisher, self.name, self.version)
    }
}

/// Schema section of a registry provider document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSchema {
    /// Declared target schema. Compared structurally, never interpreted.
    pub target: serde_json::Value,
}

/// Provider document as returned by the provider registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDetail {
    pub publisher: String,
    pub name: String,
    pub version: String,
    pub schema: ProviderSchema,
}
