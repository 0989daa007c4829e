use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::dtos::{CreatePreflightRequest, PreflightResponse};
use crate::models::AuthenticatedUser;
use crate::startup::AppState;
use crate::utils::ValidatedJson;

pub async fn create_preflight(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ValidatedJson(req): ValidatedJson<CreatePreflightRequest>,
) -> Result<(StatusCode, Json<PreflightResponse>), AppError> {
    let preflight = state.preflights.create_preflight(&user, req.targets).await?;
    Ok((StatusCode::CREATED, Json(preflight.into())))
}

pub async fn get_preflight(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
) -> Result<Json<PreflightResponse>, AppError> {
    Ok(Json(state.preflights.get_preflight(&user, &id).await?.into()))
}
