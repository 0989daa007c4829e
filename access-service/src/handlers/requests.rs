//! Access request submission, lookup and revocation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use super::require_admin;
use crate::dtos::{AccessRequestResponse, CreateAccessRequest, ListResponse, PageParams};
use crate::models::AuthenticatedUser;
use crate::startup::AppState;
use crate::utils::ValidatedJson;

pub async fn create_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ValidatedJson(req): ValidatedJson<CreateAccessRequest>,
) -> Result<(StatusCode, Json<AccessRequestResponse>), AppError> {
    tracing::info!(
        preflight_id = %req.preflight_id,
        user_id = %user.id,
        "Creating access request"
    );

    let request = state.access.create_request(&user, req.into()).await?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

pub async fn get_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<AccessRequestResponse>, AppError> {
    Ok(Json(state.access.get_request_for_user(&user, &id).await?.into()))
}

pub async fn list_my_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<PageParams>,
) -> Result<Json<ListResponse<AccessRequestResponse>>, AppError> {
    let page = state
        .access
        .list_requests_for_user(&user, params.next_token.as_deref())
        .await?;
    Ok(Json(page.into()))
}

pub async fn revoke_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<AccessRequestResponse>, AppError> {
    tracing::info!(request_id = %id, user_id = %user.id, "Revoking access request");
    Ok(Json(state.access.revoke_request(&user, &id).await?.into()))
}

pub async fn list_all_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<PageParams>,
) -> Result<Json<ListResponse<AccessRequestResponse>>, AppError> {
    require_admin(&state, &user).await?;
    let page = state
        .access
        .list_requests(params.next_token.as_deref())
        .await?;
    Ok(Json(page.into()))
}
