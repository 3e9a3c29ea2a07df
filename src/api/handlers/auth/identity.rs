//! Identity key rotation endpoints.

use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;

use super::{
    principal::require_user,
    types::{EmptyReply, UpdateKeyRequest, VerifyUpdateKeyReply, VerifyUpdateKeyRequest},
};
use crate::api::{error::ErrorReply, handlers::require_payload};
use crate::error::Result;
use crate::now_unix;
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/api/v1/user/key",
    request_body = UpdateKeyRequest,
    responses(
        (status = 200, description = "Key staged; verification token sent", body = EmptyReply),
        (status = 400, description = "Invalid or duplicate key", body = ErrorReply),
        (status = 401, description = "Not logged in", body = ErrorReply)
    ),
    tag = "auth"
)]
pub async fn update_key(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<UpdateKeyRequest>>,
) -> Result<Json<EmptyReply>> {
    let user = require_user(&headers, &state).await?;
    let request = require_payload(payload)?;
    state
        .accounts()
        .request_key_update(user.id, &request.public_key, now_unix())
        .await?;
    Ok(Json(EmptyReply::default()))
}

#[utoipa::path(
    post,
    path = "/api/v1/user/key/verify",
    request_body = VerifyUpdateKeyRequest,
    responses(
        (status = 200, description = "New key active", body = VerifyUpdateKeyReply),
        (status = 400, description = "Invalid or expired token", body = ErrorReply),
        (status = 401, description = "Not logged in", body = ErrorReply)
    ),
    tag = "auth"
)]
pub async fn verify_update_key(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<VerifyUpdateKeyRequest>>,
) -> Result<Json<VerifyUpdateKeyReply>> {
    let user = require_user(&headers, &state).await?;
    let request = require_payload(payload)?;
    let public_key = state
        .accounts()
        .verify_key_update(user.id, request.verification_token.trim(), now_unix())
        .await?;
    Ok(Json(VerifyUpdateKeyReply { public_key }))
}
