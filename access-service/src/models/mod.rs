pub mod options;
pub mod preflight;
pub mod provider;
pub mod request;
pub mod target;
pub mod target_group;
pub mod user;

pub use options::{ArgOptions, CachedArgOptions, ProviderArgGroupOption, ProviderOption};
pub use preflight::{Preflight, PreflightAccessGroup};
pub use provider::{ParseProviderError, Provider, ProviderDetail, ProviderSchema};
pub use request::{
    AccessGroup, AccessRequest, Grant, GrantStatus, GrantTransitionError, RequestedBy,
};
pub use target::{filter_visible, CachedTarget, GroupScoped};
pub use target_group::{
    Deployment, Diagnostic, DiagnosticLevel, TargetGroup, TargetGroupAssignment, TargetSchema,
};
pub use user::AuthenticatedUser;
