//! Caller identity extractor.
//!
//! The gateway sits behind an authenticating proxy that forwards the
//! user name in `X-Caller-Id` and a comma-separated group list in
//! `X-Caller-Groups`. Membership in the configured admin group grants the
//! administrator role. A request without `X-Caller-Id` is treated as an
//! anonymous, non-administrator caller.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::app_state::AppState;
use crate::domain::Caller;
use crate::error::GatewayError;

/// Header carrying the authenticated user name.
pub const CALLER_ID_HEADER: &str = "x-caller-id";

/// Header carrying the caller's comma-separated group memberships.
pub const CALLER_GROUPS_HEADER: &str = "x-caller-groups";

impl FromRequestParts<AppState> for Caller {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let username = header(parts, CALLER_ID_HEADER)?
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let is_admin = header(parts, CALLER_GROUPS_HEADER)?.is_some_and(|groups| {
            groups
                .split(',')
                .any(|group| group.trim() == state.admin_group_name.as_ref())
        });

        Ok(Self { username, is_admin })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, GatewayError> {
    parts
        .headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| GatewayError::ClientError(format!("Invalid {name} header")))
        })
        .transpose()
}

/// Rejects non-administrators.
///
/// # Errors
///
/// Returns [`GatewayError::Unauthorized`] if `caller` is not an
/// administrator.
pub fn require_admin(caller: &Caller) -> Result<(), GatewayError> {
    if caller.is_admin {
        return Ok(());
    }
    Err(GatewayError::Unauthorized(format!(
        "User {} is not an administrator",
        caller.username.as_deref().unwrap_or("anonymous")
    )))
}
