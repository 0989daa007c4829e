//! Test helper module for access-service integration tests.
//!
//! Wires the services to the in-memory store and in-process collaborators so
//! every test runs without MongoDB or network access.

#![allow(dead_code)]

use access_service::{
    config::{GrantPolicy, SchemaValidation},
    models::{
        AccessGroup, AccessRequest, AuthenticatedUser, CachedTarget, Deployment, Grant, Provider,
        RequestedBy,
    },
    router,
    services::{
        Clock, GroupAuthorizer, InMemoryStore, LocalWorkflow, MockArgOptionSource, MockClock,
        MockEventPutter, MockProviderRegistry, Store, Workflow, WorkflowError,
    },
    AppState, Collaborators,
};
use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const ADMIN_GROUP: &str = "access_admins";

pub fn ec2_v1() -> Provider {
    Provider::new("acme", "ec2", "1.0.0")
}

/// Same target schema as [`ec2_v1`].
pub fn ec2_v1_1() -> Provider {
    Provider::new("acme", "ec2", "1.1.0")
}

pub fn ec2_v2() -> Provider {
    Provider::new("acme", "ec2", "2.0.0")
}

pub fn ec2_schema() -> serde_json::Value {
    json!({ "accountId": { "type": "string", "title": "Account" } })
}

/// Delegates to [`LocalWorkflow`] and fails the grant call whose zero-based
/// index equals `fail_on_call`.
pub struct ScriptedWorkflow {
    inner: LocalWorkflow,
    fail_on_call: Option<usize>,
    pub grant_calls: AtomicUsize,
}

impl ScriptedWorkflow {
    pub fn new(clock: Arc<dyn Clock>, fail_on_call: Option<usize>) -> Self {
        Self {
            inner: LocalWorkflow::new(clock),
            fail_on_call,
            grant_calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.grant_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Workflow for ScriptedWorkflow {
    async fn grant(
        &self,
        group: &AccessGroup,
        subject: &RequestedBy,
    ) -> Result<Vec<Grant>, WorkflowError> {
        let call = self.grant_calls.fetch_add(1, Ordering::SeqCst);
        if Some(call) == self.fail_on_call {
            return Err(WorkflowError::Failed(anyhow::anyhow!(
                "provider rejected access group {}",
                group.id
            )));
        }
        self.inner.grant(group, subject).await
    }

    async fn revoke(
        &self,
        request: &AccessRequest,
        actor_id: &str,
        actor_email: &str,
    ) -> Result<Vec<Grant>, WorkflowError> {
        self.inner.revoke(request, actor_id, actor_email).await
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<MockProviderRegistry>,
    pub arg_source: Arc<MockArgOptionSource>,
    pub events: Arc<MockEventPutter>,
    pub clock: Arc<MockClock>,
    pub workflow: Arc<ScriptedWorkflow>,
}

pub struct TestAppBuilder {
    schema_validation: SchemaValidation,
    fail_grant_on_call: Option<usize>,
    failing_events: bool,
    page_size: usize,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self {
            schema_validation: SchemaValidation::Deferred,
            fail_grant_on_call: None,
            failing_events: false,
            page_size: 50,
        }
    }
}

impl TestAppBuilder {
    pub fn schema_validation(mut self, mode: SchemaValidation) -> Self {
        self.schema_validation = mode;
        self
    }

    pub fn fail_grant_on_call(mut self, call: usize) -> Self {
        self.fail_grant_on_call = Some(call);
        self
    }

    pub fn failing_events(mut self) -> Self {
        self.failing_events = true;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn build(self) -> TestApp {
        let store = Arc::new(InMemoryStore::with_page_size(self.page_size));
        let registry = Arc::new(
            MockProviderRegistry::new()
                .with_provider(ec2_v1(), ec2_schema())
                .with_provider(ec2_v1_1(), ec2_schema())
                .with_provider(
                    ec2_v2(),
                    json!({ "accountId": { "type": "string" }, "region": { "type": "string" } }),
                ),
        );
        let arg_source = Arc::new(MockArgOptionSource::new());
        let events = Arc::new(if self.failing_events {
            MockEventPutter::failing()
        } else {
            MockEventPutter::new()
        });
        let clock = Arc::new(MockClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        ));
        let workflow = Arc::new(ScriptedWorkflow::new(
            clock.clone(),
            self.fail_grant_on_call,
        ));

        let state = AppState::new(
            Collaborators {
                store: store.clone(),
                registry: registry.clone(),
                arg_source: arg_source.clone(),
                workflow: workflow.clone(),
                authorizer: Arc::new(GroupAuthorizer::new(store.clone(), ADMIN_GROUP)),
                events: events.clone(),
                clock: clock.clone(),
            },
            self.schema_validation,
            GrantPolicy::default(),
        );

        TestApp {
            state,
            store,
            registry,
            arg_source,
            events,
            clock,
            workflow,
        }
    }
}

impl TestApp {
    pub fn spawn() -> Self {
        TestAppBuilder::default().build()
    }

    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Cache a requestable target visible to `groups`.
    pub async fn seed_target(&self, id: &str, access_rule: &str, groups: &[&str]) -> CachedTarget {
        let target = CachedTarget {
            id: id.to_string(),
            target_group_id: "aws-accounts".to_string(),
            access_rule: access_rule.to_string(),
            fields: BTreeMap::from([("accountId".to_string(), id.to_string())]),
            groups: groups.iter().map(|g| g.to_string()).collect(),
            reviewers: BTreeSet::from(["reviewer@example.com".to_string()]),
        };
        self.store
            .put_cached_target(&target)
            .await
            .expect("Failed to seed target");
        target
    }

    pub async fn seed_deployment(&self, id: &str, provider: Provider) -> Deployment {
        self.state
            .target_groups
            .register_deployment(deployment(id, provider))
            .await
            .expect("Failed to seed deployment")
    }
}

pub fn deployment(id: &str, provider: Provider) -> Deployment {
    Deployment {
        id: id.to_string(),
        provider,
        function_url: Some(format!("https://{}.example.com", id)),
        diagnostics: vec![],
        target_group_assignment: None,
    }
}

pub fn user(id: &str, groups: &[&str]) -> AuthenticatedUser {
    AuthenticatedUser::new(id, format!("{}@example.com", id)).with_groups(groups.iter().copied())
}

pub fn admin() -> AuthenticatedUser {
    user("admin", &[ADMIN_GROUP])
}
