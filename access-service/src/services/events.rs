//! Domain events handed to the notification layer.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccessEvent {
    RequestCreated {
        request_id: String,
        requested_by: String,
        grant_ids: Vec<String>,
    },
    GrantRevoked {
        request_id: String,
        grant_id: String,
        revoked_by: String,
    },
}

impl AccessEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AccessEvent::RequestCreated { .. } => "request_created",
            AccessEvent::GrantRevoked { .. } => "grant_revoked",
        }
    }
}

#[async_trait]
pub trait EventPutter: Send + Sync {
    async fn put(&self, event: AccessEvent) -> Result<(), anyhow::Error>;
}

/// Writes events to the log stream, where the notification pipeline picks
/// them up.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventPutter;

#[async_trait]
impl EventPutter for TracingEventPutter {
    async fn put(&self, event: AccessEvent) -> Result<(), anyhow::Error> {
        let payload = serde_json::to_string(&event)?;
        tracing::info!(event = event.name(), payload = %payload, "Access event emitted");
        Ok(())
    }
}

/// Records every event. Can be told to fail.
#[derive(Default)]
pub struct MockEventPutter {
    pub events: Mutex<Vec<AccessEvent>>,
    pub fail: bool,
}

impl MockEventPutter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn recorded(&self) -> Vec<AccessEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventPutter for MockEventPutter {
    async fn put(&self, event: AccessEvent) -> Result<(), anyhow::Error> {
        if self.fail {
            return Err(anyhow::anyhow!("event bus unavailable"));
        }
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock event putter mutex poisoned: {}", e))?
            .push(event);
        Ok(())
    }
}
