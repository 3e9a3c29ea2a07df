//! Signup and new-account verification endpoints.

use axum::{
    extract::{Extension, Query},
    Json,
};
use std::sync::Arc;

use super::types::{
    EmptyReply, NewUserReply, NewUserRequest, ResendVerificationRequest, VerifyNewUserQuery,
    VerifyNewUserReply,
};
use crate::account::NewUser;
use crate::api::{
    error::ErrorReply,
    handlers::{require_payload, require_query},
};
use crate::error::{Error, Result};
use crate::now_unix;
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/api/v1/user/new",
    request_body = NewUserRequest,
    responses(
        (status = 200, description = "Pending account created; verification token sent", body = NewUserReply),
        (status = 400, description = "Policy violation or duplicate", body = ErrorReply)
    ),
    tag = "auth"
)]
pub async fn new_user(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<NewUserRequest>>,
) -> Result<Json<NewUserReply>> {
    let request = require_payload(payload)?;
    let user = state
        .accounts()
        .new_user(
            NewUser {
                email: request.email,
                username: request.username,
                password: request.password,
                public_key: request.public_key,
            },
            now_unix(),
        )
        .await?;
    Ok(Json(NewUserReply {
        user_id: user.id,
        paywall_address: user.paywall_address,
        paywall_amount: user.paywall_amount,
        paywall_tx_not_before: user.paywall_tx_not_before,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/user/verify",
    params(
        ("email" = String, Query, description = "Registered email"),
        ("verification_token" = String, Query, description = "Token from the verification email")
    ),
    responses(
        (status = 200, description = "Email verified", body = VerifyNewUserReply),
        (status = 400, description = "Invalid or expired token", body = ErrorReply)
    ),
    tag = "auth"
)]
pub async fn verify_new_user(
    state: Extension<Arc<AppState>>,
    query: Option<Query<VerifyNewUserQuery>>,
) -> Result<Json<VerifyNewUserReply>> {
    let query = require_query(query)?;
    let (Some(email), Some(token)) = (query.email, query.verification_token) else {
        return Err(Error::InvalidInput(
            "email and verification_token are required".to_string(),
        ));
    };
    let user = state
        .accounts()
        .verify_new_user(&email, token.trim(), now_unix())
        .await?;
    Ok(Json(VerifyNewUserReply { user_id: user.id }))
}

/// Resend the new-account token. Unknown and verified emails get the same reply.
#[utoipa::path(
    post,
    path = "/api/v1/user/verify/resend",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Resend accepted", body = EmptyReply),
        (status = 400, description = "Previous token has not expired yet", body = ErrorReply)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> Result<Json<EmptyReply>> {
    let request = require_payload(payload)?;
    state
        .accounts()
        .resend_verification(
            &request.email,
            request.new_email.as_deref(),
            request.public_key.as_deref(),
            now_unix(),
        )
        .await?;
    Ok(Json(EmptyReply::default()))
}
