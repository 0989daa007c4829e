//! Provider argument option cache.
//!
//! Options are fetched from the provider on demand and cached per
//! `(provider_id, arg_id)`. Concurrent refreshes of the same key are not
//! coalesced; both write the same document.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::clock::Clock;
use super::error::ServiceError;
use super::metrics;
use super::store::Store;
use crate::models::{ArgOptions, AuthenticatedUser, CachedArgOptions};

#[async_trait]
pub trait ArgOptionSource: Send + Sync {
    /// `None` when the provider does not know the argument.
    async fn fetch_options(
        &self,
        provider_id: &str,
        arg_id: &str,
    ) -> Result<Option<ArgOptions>, anyhow::Error>;
}

/// Fetches from `{base_url}/v1/providers/{provider_id}/args/{arg_id}/options`.
#[derive(Clone)]
pub struct HttpArgOptionSource {
    client: Client,
    base_url: String,
}

impl HttpArgOptionSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, anyhow::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ArgOptionSource for HttpArgOptionSource {
    async fn fetch_options(
        &self,
        provider_id: &str,
        arg_id: &str,
    ) -> Result<Option<ArgOptions>, anyhow::Error> {
        let url = format!(
            "{}/v1/providers/{}/args/{}/options",
            self.base_url, provider_id, arg_id
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "option source returned {} for {}/{}: {}",
                status,
                provider_id,
                arg_id,
                body
            ));
        }

        Ok(Some(serde_json::from_str(&body)?))
    }
}

/// In-process option source keyed by `(provider_id, arg_id)`.
#[derive(Default)]
pub struct MockArgOptionSource {
    pub options: Mutex<HashMap<(String, String), ArgOptions>>,
    pub fetches: Mutex<usize>,
}

impl MockArgOptionSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, provider_id: &str, arg_id: &str, options: ArgOptions) {
        if let Ok(mut map) = self.options.lock() {
            map.insert((provider_id.to_string(), arg_id.to_string()), options);
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl ArgOptionSource for MockArgOptionSource {
    async fn fetch_options(
        &self,
        provider_id: &str,
        arg_id: &str,
    ) -> Result<Option<ArgOptions>, anyhow::Error> {
        *self
            .fetches
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock option source mutex poisoned: {}", e))? += 1;

        let key = (provider_id.to_string(), arg_id.to_string());
        Ok(self
            .options
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock option source mutex poisoned: {}", e))?
            .get(&key)
            .cloned())
    }
}

pub struct ArgOptionCache {
    store: Arc<dyn Store>,
    source: Arc<dyn ArgOptionSource>,
    clock: Arc<dyn Clock>,
}

impl ArgOptionCache {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn ArgOptionSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            source,
            clock,
        }
    }

    /// Cached options without contacting the provider. The flag is whether
    /// the cache held an entry.
    pub async fn load(
        &self,
        provider_id: &str,
        arg_id: &str,
    ) -> Result<(bool, ArgOptions), ServiceError> {
        match self.store.get_arg_options(provider_id, arg_id).await? {
            Some(cached) => Ok((true, cached.into())),
            None => Ok((false, ArgOptions::default())),
        }
    }

    /// Fetch from the provider and overwrite the cache. The flag is whether
    /// the provider returned options.
    pub async fn refresh(
        &self,
        provider_id: &str,
        arg_id: &str,
    ) -> Result<(bool, ArgOptions), ServiceError> {
        let fetched = match self.source.fetch_options(provider_id, arg_id).await {
            Ok(fetched) => fetched,
            Err(e) => {
                metrics::record_arg_option_refresh("error");
                tracing::error!(
                    provider_id = %provider_id,
                    arg_id = %arg_id,
                    error = %e,
                    "Failed to fetch provider argument options"
                );
                return Err(ServiceError::Internal(e));
            }
        };

        let Some(options) = fetched else {
            metrics::record_arg_option_refresh("missing");
            return Ok((false, ArgOptions::default()));
        };

        self.store
            .put_arg_options(&CachedArgOptions {
                provider_id: provider_id.to_string(),
                arg_id: arg_id.to_string(),
                options: options.options.clone(),
                grouped_options: options.grouped_options.clone(),
                fetched_at: self.clock.now(),
            })
            .await?;

        metrics::record_arg_option_refresh("refreshed");
        tracing::info!(
            provider_id = %provider_id,
            arg_id = %arg_id,
            options = options.options.len(),
            grouped = options.grouped_options.len(),
            "Refreshed provider argument options"
        );
        Ok((true, options))
    }

    /// Options `user` may see. Refreshes on a cache miss or when asked to.
    pub async fn list_for_user(
        &self,
        user: &AuthenticatedUser,
        provider_id: &str,
        arg_id: &str,
        force_refresh: bool,
    ) -> Result<ArgOptions, ServiceError> {
        let (found, options) = if force_refresh {
            self.refresh(provider_id, arg_id).await?
        } else {
            match self.load(provider_id, arg_id).await? {
                (true, options) => (true, options),
                (false, _) => self.refresh(provider_id, arg_id).await?,
            }
        };

        if !found {
            return Err(ServiceError::NotFound(format!(
                "options for argument {} of provider {}",
                arg_id, provider_id
            )));
        }

        Ok(options.visible_to(&user.groups))
    }
}
