//! Authenticated principal extraction.
//!
//! Flow Overview: read the session cookie, resolve it to a live user and hand
//! that user to the handler. Role checks happen in the workflows themselves.

use axum::http::HeaderMap;

use crate::account::User;
use crate::error::{Error, Result};
use crate::now_unix;
use crate::state::AppState;

/// Resolve the session cookie to its user, or fail with `not_logged_in`.
///
/// # Errors
/// [`Error::NotLoggedIn`] for missing, expired or orphaned sessions.
pub async fn require_user(headers: &HeaderMap, state: &AppState) -> Result<User> {
    state
        .sessions()
        .resolve_user(headers, now_unix())
        .await
        .map_err(|err| match err {
            Error::NoSession => Error::NotLoggedIn,
            other => other,
        })
}

/// Like [`require_user`], but anonymous callers resolve to `None`.
///
/// # Errors
/// Store failures only.
pub async fn optional_user(headers: &HeaderMap, state: &AppState) -> Result<Option<User>> {
    match require_user(headers, state).await {
        Ok(user) => Ok(Some(user)),
        Err(Error::NotLoggedIn) => Ok(None),
        Err(err) => Err(err),
    }
}
