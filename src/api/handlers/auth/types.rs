//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::account::User;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NewUserRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    /// Hex-encoded 32-byte identity key.
    pub public_key: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NewUserReply {
    pub user_id: Uuid,
    pub paywall_address: String,
    pub paywall_amount: u64,
    pub paywall_tx_not_before: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyNewUserQuery {
    pub email: Option<String>,
    pub verification_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyNewUserReply {
    pub user_id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendVerificationRequest {
    pub email: String,
    /// Move the pending account to another address before resending.
    #[serde(default)]
    pub new_email: Option<String>,
    /// Replace the pending identity key.
    #[serde(default)]
    pub public_key: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Session identity returned by login and `/user/me`.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginReply {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub public_key: String,
    pub is_admin: bool,
    pub last_login_time: i64,
    pub paywall_address: String,
    pub paywall_amount: u64,
    pub paywall_tx_not_before: i64,
    pub session_max_age: i64,
}

impl LoginReply {
    #[must_use]
    pub fn new(user: &User, last_login_time: i64, session_max_age: i64) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            public_key: user.public_key().unwrap_or_default().to_string(),
            is_admin: user.admin,
            last_login_time,
            paywall_address: user.paywall_address.clone(),
            paywall_amount: user.paywall_amount,
            paywall_tx_not_before: user.paywall_tx_not_before,
            session_max_age,
        }
    }
}

/// Request a reset token with only `email`; redeem it by adding the other two fields.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub email: String,
    #[serde(default)]
    pub verification_token: Option<String>,
    #[serde(default)]
    pub new_password: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UpdateKeyRequest {
    pub public_key: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyUpdateKeyRequest {
    pub verification_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyUpdateKeyReply {
    pub public_key: String,
}

/// Empty JSON object for endpoints with nothing to report.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct EmptyReply {}
