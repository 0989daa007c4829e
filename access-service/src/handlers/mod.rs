pub mod entitlements;
pub mod health;
pub mod preflight;
pub mod requests;
pub mod target_groups;

use service_core::error::AppError;

use crate::models::AuthenticatedUser;
use crate::startup::AppState;

/// Reject callers outside the administrator group.
pub(crate) async fn require_admin(
    state: &AppState,
    user: &AuthenticatedUser,
) -> Result<(), AppError> {
    if state.authorizer.is_admin(user).await? {
        return Ok(());
    }
    tracing::warn!(user_id = %user.id, "Administrator access denied");
    Err(AppError::Forbidden(anyhow::anyhow!(
        "Administrator access required"
    )))
}
