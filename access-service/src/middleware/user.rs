//! Caller identity extracted from request headers.
//!
//! The gateway authenticates the user and forwards their id, email and
//! identity groups. This service trusts those headers and never sees a
//! session itself.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

use crate::models::AuthenticatedUser;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_EMAIL_HEADER: &str = "X-User-Email";
/// Comma-separated identity group names.
pub const USER_GROUPS_HEADER: &str = "X-User-Groups";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, USER_ID_HEADER).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing {} header", USER_ID_HEADER))
        })?;

        let email = header(parts, USER_EMAIL_HEADER).ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing {} header", USER_EMAIL_HEADER))
        })?;

        let groups: Vec<&str> = header(parts, USER_GROUPS_HEADER)
            .map(|g| {
                g.split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        tracing::Span::current().record("user_id", id);

        Ok(AuthenticatedUser::new(id, email).with_groups(groups))
    }
}
