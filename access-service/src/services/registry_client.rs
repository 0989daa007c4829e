//! Provider registry client.
//!
//! Looks up a provider build by `{publisher, name, version}` and returns its
//! declared schema together with the HTTP status the registry answered with.
//! Callers decide what a non-success status means for them.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Provider, ProviderDetail};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("provider registry request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider registry returned an unreadable document: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("provider registry client error: {0}")]
    Other(String),
}

/// Registry answer. `provider` is only set on a 2xx status.
#[derive(Debug, Clone)]
pub struct RegistryResponse {
    pub status: u16,
    pub provider: Option<ProviderDetail>,
    pub body: String,
}

impl RegistryResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    async fn get_provider(&self, provider: &Provider) -> Result<RegistryResponse, RegistryError>;
}

/// HTTP implementation against `{base_url}/v1/providers/{publisher}/{name}/{version}`.
#[derive(Clone)]
pub struct HttpProviderRegistry {
    client: Client,
    base_url: String,
}

impl HttpProviderRegistry {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder().timeout(timeout).build()?;
        tracing::info!(base_url = %base_url, "Provider registry client configured");
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ProviderRegistry for HttpProviderRegistry {
    async fn get_provider(&self, provider: &Provider) -> Result<RegistryResponse, RegistryError> {
        let url = format!(
            "{}/v1/providers/{}/{}/{}",
            self.base_url, provider.publisher, provider.name, provider.version
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        tracing::debug!(status = %status, provider = %provider, "Provider registry response");

        if !status.is_success() {
            tracing::warn!(
                status = %status,
                provider = %provider,
                "Provider registry lookup did not succeed"
            );
            return Ok(RegistryResponse {
                status: status.as_u16(),
                provider: None,
                body,
            });
        }

        let detail: ProviderDetail = serde_json::from_str(&body)?;
        Ok(RegistryResponse {
            status: status.as_u16(),
            provider: Some(detail),
            body,
        })
    }
}

/// In-process registry. Unknown providers answer 404.
pub struct MockProviderRegistry {
    pub providers: Mutex<HashMap<Provider, ProviderDetail>>,
    pub lookups: Mutex<Vec<Provider>>,
}

impl Default for MockProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            lookups: Mutex::new(Vec::new()),
        }
    }

    /// Register a provider whose target schema is `target`.
    pub fn with_provider(self, provider: Provider, target: serde_json::Value) -> Self {
        self.insert(provider, target);
        self
    }

    pub fn insert(&self, provider: Provider, target: serde_json::Value) {
        let detail = ProviderDetail {
            publisher: provider.publisher.clone(),
            name: provider.name.clone(),
            version: provider.version.clone(),
            schema: crate::models::ProviderSchema { target },
        };
        if let Ok(mut providers) = self.providers.lock() {
            providers.insert(provider, detail);
        }
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ProviderRegistry for MockProviderRegistry {
    async fn get_provider(&self, provider: &Provider) -> Result<RegistryResponse, RegistryError> {
        self.lookups
            .lock()
            .map_err(|e| RegistryError::Other(format!("mock registry mutex poisoned: {}", e)))?
            .push(provider.clone());

        let found = self
            .providers
            .lock()
            .map_err(|e| RegistryError::Other(format!("mock registry mutex poisoned: {}", e)))?
            .get(provider)
            .cloned();

        Ok(match found {
            Some(detail) => RegistryResponse {
                status: 200,
                provider: Some(detail),
                body: String::new(),
            },
            None => RegistryResponse {
                status: 404,
                provider: None,
                body: format!("provider {} not found", provider),
            },
        })
    }
}
