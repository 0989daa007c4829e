//! Structural comparison of provider target schemas.

use std::sync::Arc;

use super::error::ServiceError;
use super::registry_client::ProviderRegistry;
use crate::models::Provider;

pub struct CompatibilityChecker {
    registry: Arc<dyn ProviderRegistry>,
}

impl CompatibilityChecker {
    pub fn new(registry: Arc<dyn ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Compare two `publisher/name/version` references. Both must resolve;
    /// the declared target schemas must be exactly equal.
    pub async fn are_compatible(&self, a: &str, b: &str) -> Result<bool, ServiceError> {
        let a = Provider::parse_schema_ref(a)?;
        let b = Provider::parse_schema_ref(b)?;
        self.are_compatible_providers(&a, &b).await
    }

    pub async fn are_compatible_providers(
        &self,
        a: &Provider,
        b: &Provider,
    ) -> Result<bool, ServiceError> {
        let schema_a = self.target_schema(a).await?;
        let schema_b = self.target_schema(b).await?;

        let compatible = schema_a == schema_b;
        tracing::debug!(a = %a, b = %b, compatible, "Compared provider target schemas");
        Ok(compatible)
    }

    /// Resolved target schema of `provider`.
    pub async fn target_schema(
        &self,
        provider: &Provider,
    ) -> Result<serde_json::Value, ServiceError> {
        let response = self.registry.get_provider(provider).await?;
        match response.provider {
            Some(detail) if response.is_success() => Ok(detail.schema.target),
            _ => Err(ServiceError::UpstreamRegistry(format!(
                "lookup of {} returned status {}: {}",
                provider, response.status, response.body
            ))),
        }
    }
}
