use service_core::error::AppError;
use thiserror::Error;

use super::registry_client::RegistryError;
use super::store::StoreError;
use super::workflow::WorkflowError;
use crate::models::ParseProviderError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("target group {target_group_id} already has a linked deployment")]
    AlreadyLinked { target_group_id: String },

    #[error(transparent)]
    InvalidFormat(#[from] ParseProviderError),

    #[error("provider registry error: {0}")]
    UpstreamRegistry(String),

    #[error("deployment provider {provider} does not match the target schema of {target_group_id}")]
    IncompatibleSchema {
        target_group_id: String,
        provider: String,
    },

    #[error("duplicate target ids requested")]
    DuplicateTargetsRequested,

    #[error("user is not authorised for requested target {target_id}")]
    UserNotAuthorisedForRequestedTarget { target_id: String },

    #[error("grant is inactive")]
    GrantInactive,

    #[error("no grant to revoke")]
    NoGrant,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<RegistryError> for ServiceError {
    fn from(err: RegistryError) -> Self {
        ServiceError::UpstreamRegistry(err.to_string())
    }
}

impl From<WorkflowError> for ServiceError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::GrantInactive => ServiceError::GrantInactive,
            WorkflowError::NoGrant => ServiceError::NoGrant,
            WorkflowError::Failed(e) => ServiceError::Internal(e),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            ServiceError::AlreadyExists(_) | ServiceError::AlreadyLinked { .. } => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            ServiceError::InvalidFormat(_)
            | ServiceError::IncompatibleSchema { .. }
            | ServiceError::DuplicateTargetsRequested
            | ServiceError::GrantInactive
            | ServiceError::NoGrant
            | ServiceError::InvalidRequest(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            ServiceError::UserNotAuthorisedForRequestedTarget { .. } => {
                AppError::Unauthorized(anyhow::anyhow!(err.to_string()))
            }
            ServiceError::UpstreamRegistry(e) => AppError::BadGateway(anyhow::anyhow!(e)),
            ServiceError::Store(StoreError::InvalidPageToken) => {
                AppError::BadRequest(anyhow::anyhow!("invalid page token"))
            }
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn status(err: ServiceError) -> StatusCode {
        AppError::from(err).status_code()
    }

    #[test]
    fn maps_taxonomy_to_categories() {
        assert_eq!(status(ServiceError::NotFound("request".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(ServiceError::AlreadyExists("target group aws".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(ServiceError::AlreadyLinked {
                target_group_id: "aws".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status(ServiceError::DuplicateTargetsRequested), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(ServiceError::UserNotAuthorisedForRequestedTarget {
                target_id: "t".into()
            }),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status(ServiceError::GrantInactive), StatusCode::BAD_REQUEST);
        assert_eq!(status(ServiceError::NoGrant), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(ServiceError::UpstreamRegistry("503".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(ServiceError::Store(StoreError::ConditionFailed)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn workflow_errors_keep_their_kind() {
        assert!(matches!(
            ServiceError::from(WorkflowError::GrantInactive),
            ServiceError::GrantInactive
        ));
        assert!(matches!(
            ServiceError::from(WorkflowError::NoGrant),
            ServiceError::NoGrant
        ));
    }
}
