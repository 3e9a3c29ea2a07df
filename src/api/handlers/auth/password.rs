//! Password reset and password change endpoints.

use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;

use super::{
    principal::require_user,
    types::{ChangePasswordRequest, EmptyReply, ResetPasswordRequest},
};
use crate::api::{error::ErrorReply, handlers::require_payload};
use crate::error::{Error, Result};
use crate::now_unix;
use crate::state::AppState;

/// Two-phase reset on one route: `email` alone asks for a token, `email` plus
/// `verification_token` and `new_password` redeems it.
#[utoipa::path(
    post,
    path = "/api/v1/user/password/reset",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Token issued or password reset", body = EmptyReply),
        (status = 400, description = "Invalid or expired token, or password policy violation", body = ErrorReply)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<Json<EmptyReply>> {
    let request = require_payload(payload)?;
    let now = now_unix();
    match (request.verification_token, request.new_password) {
        (None, None) => {
            state
                .accounts()
                .request_password_reset(&request.email, now)
                .await?;
        }
        (Some(token), Some(new_password)) => {
            state
                .accounts()
                .reset_password(&request.email, token.trim(), &new_password, now)
                .await?;
        }
        _ => {
            return Err(Error::InvalidInput(
                "verification_token and new_password must be sent together".to_string(),
            ))
        }
    }
    Ok(Json(EmptyReply::default()))
}

#[utoipa::path(
    post,
    path = "/api/v1/user/password/change",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = EmptyReply),
        (status = 400, description = "Wrong current password or policy violation", body = ErrorReply),
        (status = 401, description = "Not logged in", body = ErrorReply)
    ),
    tag = "auth"
)]
pub async fn change_password(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> Result<Json<EmptyReply>> {
    let user = require_user(&headers, &state).await?;
    let request = require_payload(payload)?;
    state
        .accounts()
        .change_password(user.id, &request.current_password, &request.new_password)
        .await?;
    Ok(Json(EmptyReply::default()))
}
