//! Target group and deployment endpoints. All but listing require the admin group.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use super::require_admin;
use crate::dtos::{
    CreateTargetGroupRequest, LinkDeploymentRequest, LinkDeploymentResponse, ListResponse,
    PageParams, RegisterDeploymentRequest, TargetGroupResponse,
};
use crate::models::{AuthenticatedUser, Deployment, Provider};
use crate::services::ServiceError;
use crate::startup::AppState;
use crate::utils::ValidatedJson;

pub async fn create_target_group(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ValidatedJson(req): ValidatedJson<CreateTargetGroupRequest>,
) -> Result<(StatusCode, Json<TargetGroupResponse>), AppError> {
    require_admin(&state, &user).await?;

    tracing::info!(
        target_group_id = %req.id,
        target_schema = %req.target_schema,
        user_id = %user.id,
        "Creating target group"
    );

    let group = state
        .target_groups
        .create_target_group(&req.id, &req.target_schema)
        .await?;

    Ok((StatusCode::CREATED, Json(group.into())))
}

pub async fn get_target_group(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<TargetGroupResponse>, AppError> {
    require_admin(&state, &user).await?;
    Ok(Json(state.target_groups.get_target_group(&id).await?.into()))
}

/// Open to any authenticated caller; served under both `/v1` and `/v1/admin`.
pub async fn list_target_groups(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(params): Query<PageParams>,
) -> Result<Json<ListResponse<TargetGroupResponse>>, AppError> {
    let page = state
        .target_groups
        .list_target_groups(params.next_token.as_deref())
        .await?;
    Ok(Json(page.into()))
}

pub async fn link_deployment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target_group_id): Path<String>,
    ValidatedJson(req): ValidatedJson<LinkDeploymentRequest>,
) -> Result<Json<LinkDeploymentResponse>, AppError> {
    require_admin(&state, &user).await?;

    let group = state
        .target_groups
        .link_deployment(&target_group_id, &req.deployment_id, req.priority)
        .await?;

    Ok(Json(LinkDeploymentResponse {
        target_group_id: group.id,
        deployment_id: req.deployment_id,
        priority: req.priority,
    }))
}

pub async fn unlink_deployment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((target_group_id, deployment_id)): Path<(String, String)>,
) -> Result<Json<Deployment>, AppError> {
    require_admin(&state, &user).await?;

    let deployment = state
        .target_groups
        .unlink_deployment(&target_group_id, &deployment_id)
        .await?;

    Ok(Json(deployment))
}

pub async fn register_deployment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ValidatedJson(req): ValidatedJson<RegisterDeploymentRequest>,
) -> Result<(StatusCode, Json<Deployment>), AppError> {
    require_admin(&state, &user).await?;

    let provider = req
        .provider
        .parse::<Provider>()
        .map_err(ServiceError::from)?;
    let deployment = state
        .target_groups
        .register_deployment(Deployment {
            id: req.id,
            provider,
            function_url: req.function_url,
            diagnostics: req.diagnostics,
            target_group_assignment: None,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(deployment)))
}
