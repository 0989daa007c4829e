//! Requestable targets and provider argument options.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;

use super::require_admin;
use crate::dtos::{ArgOptionsParams, ListResponse, PageParams, PutTargetRequest};
use crate::models::{ArgOptions, AuthenticatedUser, CachedTarget};
use crate::startup::AppState;
use crate::utils::ValidatedJson;

pub async fn list_targets(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<PageParams>,
) -> Result<Json<ListResponse<CachedTarget>>, AppError> {
    let page = state
        .access
        .list_entitlement_targets(&user, params.next_token.as_deref())
        .await?;
    Ok(Json(page.into()))
}

pub async fn put_target(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<PutTargetRequest>,
) -> Result<Json<CachedTarget>, AppError> {
    require_admin(&state, &user).await?;
    let target = state.access.put_entitlement_target(req.into_target(id)).await?;
    Ok(Json(target))
}

pub async fn list_arg_options(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((provider_id, arg_id)): Path<(String, String)>,
    Query(params): Query<ArgOptionsParams>,
) -> Result<Json<ArgOptions>, AppError> {
    let options = state
        .arg_options
        .list_for_user(&user, &provider_id, &arg_id, params.refresh)
        .await?;
    Ok(Json(options))
}
