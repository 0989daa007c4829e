//! Services layer for access-service.
//!
//! Business logic for the target group registry, argument option cache,
//! preflight processing and request/grant orchestration, plus the
//! collaborator seams they are built on.

pub mod access;
pub mod arg_options;
pub mod authz;
pub mod clock;
pub mod compatibility;
pub mod error;
pub mod events;
pub mod metrics;
pub mod preflight;
pub mod registry_client;
pub mod store;
pub mod target_groups;
pub mod workflow;

pub use access::{AccessService, CreateRequest, GroupOption};
pub use arg_options::{ArgOptionCache, ArgOptionSource, HttpArgOptionSource, MockArgOptionSource};
pub use authz::{Authorizer, GroupAuthorizer};
pub use clock::{Clock, MockClock, SystemClock};
pub use compatibility::CompatibilityChecker;
pub use error::ServiceError;
pub use events::{AccessEvent, EventPutter, MockEventPutter, TracingEventPutter};
pub use preflight::PreflightService;
pub use registry_client::{
    HttpProviderRegistry, MockProviderRegistry, ProviderRegistry, RegistryError, RegistryResponse,
};
pub use store::{AssignmentGuard, InMemoryStore, MongoStore, Page, Store, StoreError};
pub use target_groups::TargetGroupService;
pub use workflow::{LocalWorkflow, Workflow, WorkflowError};
