//! Handshake authentication.
//!
//! The credential travels either in the configured session cookie or as an
//! `Authorization: Bearer` header. It must carry a valid signature, must not
//! be expired, and its identity must map to a staff profile.

use axum::http::{header, HeaderMap};
use tracing::{debug, warn};

use huddle_shared::session;
use huddle_store::StaffProfile;

use crate::api::AppState;
use crate::error::ChatError;

/// Pull the raw credential out of the request headers. The bearer header
/// wins when both are present.
pub fn extract_credential(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Resolve the request's staff profile, or fail with
/// [`ChatError::AuthenticationFailure`].
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<StaffProfile, ChatError> {
    let Some(token) = extract_credential(headers, &state.config.session_cookie) else {
        debug!("Request carries no session credential");
        return Err(ChatError::AuthenticationFailure);
    };

    let claims = session::verify(&token, &state.config.session_key).map_err(|e| {
        warn!(error = %e, "Session credential rejected");
        ChatError::AuthenticationFailure
    })?;

    let identity = claims.sub;
    match state.store.call(move |db| db.staff_profile(identity)).await {
        Ok(Some(profile)) => Ok(profile),
        Ok(None) => {
            warn!(%identity, "Identity has no staff profile");
            Err(ChatError::AuthenticationFailure)
        }
        // Already logged by the store bridge.
        Err(_) => Err(ChatError::AuthenticationFailure),
    }
}
