//! User profile endpoints.
//!
//! Flow Overview: anyone can look up a user's public profile (username and
//! identity keys). The user themselves and admins also get the private view:
//! email, account flags, paywall state and token expiries. The admin log is
//! only shown to admins.

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    auth::{optional_user, require_user, types::EmptyReply},
    require_payload,
};
use crate::account::{AdminLogEntry, Identity, TokenPurpose, User};
use crate::api::error::ErrorReply;
use crate::error::{Error, Result};
use crate::paywall::PaymentStatus;
use crate::state::AppState;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserDetails {
    pub id: Uuid,
    pub username: String,
    pub identities: Vec<Identity>,
    /// Present only for the user themselves and for admins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<PrivateUserDetails>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PrivateUserDetails {
    pub email: String,
    pub is_admin: bool,
    pub email_verified: bool,
    pub locked: bool,
    pub deactivated: bool,
    pub failed_login_attempts: u32,
    pub last_login_time: i64,
    pub payment: PaymentStatus,
    pub new_user_verification_expiry: Option<i64>,
    pub update_key_verification_expiry: Option<i64>,
    pub reset_password_verification_expiry: Option<i64>,
    pub email_notifications: u64,
    pub proposal_credits: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub admin_log: Vec<AdminLogEntry>,
}

impl UserDetails {
    /// Render `user` as seen by `viewer`.
    #[must_use]
    pub fn for_viewer(user: &User, viewer: Option<&User>) -> Self {
        let is_self = viewer.is_some_and(|viewer| viewer.id == user.id);
        let is_admin = viewer.is_some_and(|viewer| viewer.admin);
        let private = (is_self || is_admin).then(|| PrivateUserDetails {
            email: user.email.clone(),
            is_admin: user.admin,
            email_verified: user.email_verified,
            locked: user.locked,
            deactivated: user.deactivated,
            failed_login_attempts: user.failed_login_attempts,
            last_login_time: user.last_login_time,
            payment: PaymentStatus::from(user),
            new_user_verification_expiry: token_expiry(user, TokenPurpose::NewUser),
            update_key_verification_expiry: token_expiry(user, TokenPurpose::UpdateKey),
            reset_password_verification_expiry: token_expiry(user, TokenPurpose::ResetPassword),
            email_notifications: user.email_notifications,
            proposal_credits: user.proposal_credits,
            admin_log: if is_admin {
                user.admin_log.clone()
            } else {
                Vec::new()
            },
        });
        Self {
            id: user.id,
            username: user.username.clone(),
            identities: user.identities.clone(),
            private,
        }
    }
}

fn token_expiry(user: &User, purpose: TokenPurpose) -> Option<i64> {
    user.token(purpose).map(|token| token.expiry)
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChangeUsernameRequest {
    pub password: String,
    pub new_username: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChangeUsernameReply {
    pub username: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct EditUserRequest {
    /// Bit flags selecting which notification emails the user receives.
    pub email_notifications: u64,
}

#[utoipa::path(
    get,
    path = "/api/v1/user/{user_id}",
    params(
        ("user_id" = Uuid, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User details", body = UserDetails),
        (status = 400, description = "Unknown user", body = ErrorReply)
    ),
    tag = "users"
)]
pub async fn user_details(
    Path(user_id): Path<String>,
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<UserDetails>> {
    let user_id = Uuid::parse_str(user_id.trim())
        .map_err(|_| Error::InvalidInput("invalid user id".to_string()))?;
    let viewer = optional_user(&headers, &state).await?;
    let user = state.accounts().get(user_id).await?;
    Ok(Json(UserDetails::for_viewer(&user, viewer.as_ref())))
}

#[utoipa::path(
    post,
    path = "/api/v1/user/username/change",
    request_body = ChangeUsernameRequest,
    responses(
        (status = 200, description = "Username changed", body = ChangeUsernameReply),
        (status = 400, description = "Wrong password, malformed or taken username", body = ErrorReply),
        (status = 401, description = "Not logged in", body = ErrorReply)
    ),
    tag = "users"
)]
pub async fn change_username(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ChangeUsernameRequest>>,
) -> Result<Json<ChangeUsernameReply>> {
    let user = require_user(&headers, &state).await?;
    let request = require_payload(payload)?;
    let user = state
        .accounts()
        .change_username(user.id, &request.password, &request.new_username)
        .await?;
    Ok(Json(ChangeUsernameReply {
        username: user.username,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/user/edit",
    request_body = EditUserRequest,
    responses(
        (status = 200, description = "Preferences saved", body = EmptyReply),
        (status = 401, description = "Not logged in", body = ErrorReply)
    ),
    tag = "users"
)]
pub async fn edit_user(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<EditUserRequest>>,
) -> Result<Json<EmptyReply>> {
    let user = require_user(&headers, &state).await?;
    let request = require_payload(payload)?;
    state
        .accounts()
        .edit_preferences(user.id, request.email_notifications)
        .await?;
    Ok(Json(EmptyReply::default()))
}
