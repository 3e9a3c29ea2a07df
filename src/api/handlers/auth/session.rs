//! Session endpoints: login, logout and the current identity.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, SET_COOKIE},
        HeaderMap, HeaderName, HeaderValue,
    },
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::{
    principal::require_user,
    types::{EmptyReply, LoginReply, LoginRequest},
};
use crate::api::{csrf::csrf_cookie, error::ErrorReply, handlers::require_payload};
use crate::error::{Error, Result};
use crate::now_unix;
use crate::session::{csrf::generate_csrf_token, csrf::CSRF_HEADER_NAME, SESSION_COOKIE_NAME};
use crate::state::{AppState, AuthConfig};

#[utoipa::path(
    post,
    path = "/api/v1/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session created", body = LoginReply),
        (status = 400, description = "Invalid credentials, locked, deactivated or unverified", body = ErrorReply)
    ),
    tag = "auth"
)]
pub async fn login(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response> {
    let request = require_payload(payload)?;
    let now = now_unix();
    let outcome = state
        .accounts()
        .login(&request.email, &request.password, now)
        .await?;
    let handle = state.sessions().create_session(outcome.user.id, now).await?;

    // A new session also gets a new anti-forgery token.
    let csrf_token = generate_csrf_token().map_err(Error::Internal)?;
    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, session_cookie(state.config(), &handle.token).map_err(header_error)?);
    headers.append(SET_COOKIE, csrf_cookie(state.config(), &csrf_token).map_err(header_error)?);
    headers.insert(
        HeaderName::from_static(CSRF_HEADER_NAME),
        HeaderValue::from_str(&csrf_token).map_err(header_error)?,
    );

    let reply = LoginReply::new(&outcome.user, outcome.previous_login_time, handle.max_age);
    Ok((headers, Json(reply)).into_response())
}

#[utoipa::path(
    post,
    path = "/api/v1/logout",
    responses(
        (status = 200, description = "Session cleared", body = EmptyReply)
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, state: Extension<Arc<AppState>>) -> Result<Response> {
    state.sessions().destroy_session(&headers).await?;

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((response_headers, Json(EmptyReply::default())).into_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/user/me",
    responses(
        (status = 200, description = "Session is active", body = LoginReply),
        (status = 401, description = "No active session", body = ErrorReply)
    ),
    tag = "auth"
)]
pub async fn me(headers: HeaderMap, state: Extension<Arc<AppState>>) -> Result<Json<LoginReply>> {
    let user = require_user(&headers, &state).await?;
    Ok(Json(LoginReply::new(
        &user,
        user.last_login_time,
        state.sessions().ttl_seconds(),
    )))
}

fn header_error(err: InvalidHeaderValue) -> Error {
    Error::Internal(anyhow::Error::new(err))
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(crate) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> std::result::Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(config: &AuthConfig) -> std::result::Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}
