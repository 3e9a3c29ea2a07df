//! Admin endpoints: user listing, forced payment rescans and user management.

use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{auth::require_user, require_payload, require_query, users::UserDetails};
use crate::account::User;
use crate::admin::{ManageAction, UserFilter};
use crate::api::error::ErrorReply;
use crate::error::Result;
use crate::now_unix;
use crate::paywall::PaymentStatus;
use crate::state::AppState;

#[derive(IntoParams, ToSchema, Serialize, Deserialize, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct ListUsersQuery {
    /// Substring of the email.
    pub email: Option<String>,
    /// Substring of the username.
    pub username: Option<String>,
    /// Exact public key.
    pub public_key: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub deactivated: bool,
    #[serde(default)]
    pub unverified: bool,
    #[serde(default)]
    pub unpaid: bool,
    /// Cursor from the previous page.
    pub cursor: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AbridgedUser {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub is_admin: bool,
    pub email_verified: bool,
    pub locked: bool,
    pub deactivated: bool,
    pub has_paid: bool,
}

impl From<&User> for AbridgedUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            is_admin: user.admin,
            email_verified: user.email_verified,
            locked: user.locked,
            deactivated: user.deactivated,
            has_paid: user.is_paid(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ListUsersReply {
    pub total_matches: usize,
    pub users: Vec<AbridgedUser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RescanRequest {
    pub user_id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ManageUserRequest {
    pub user_id: Uuid,
    pub action: ManageAction,
    /// Why the admin is doing this; required and kept in the admin log.
    pub reason: String,
    /// Only for `adjust_credits`.
    #[serde(default)]
    pub credits_delta: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ManageUserReply {
    pub user: UserDetails,
}

#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "One page of matching users", body = ListUsersReply),
        (status = 403, description = "Caller is not an admin", body = ErrorReply)
    ),
    tag = "admin"
)]
pub async fn list_users(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    query: Option<Query<ListUsersQuery>>,
) -> Result<Json<ListUsersReply>> {
    let actor = require_user(&headers, &state).await?;
    let query = require_query(query)?;
    let filter = UserFilter {
        email: query.email,
        username: query.username,
        public_key: query.public_key,
        locked: query.locked,
        deactivated: query.deactivated,
        unverified: query.unverified,
        unpaid: query.unpaid,
    };
    let page = state
        .admin()
        .list_users(&actor, filter, query.cursor.as_deref())
        .await?;
    Ok(Json(ListUsersReply {
        total_matches: page.total_matches,
        users: page.users.iter().map(AbridgedUser::from).collect(),
        next_cursor: page.next_cursor,
    }))
}

#[utoipa::path(
    put,
    path = "/api/v1/user/payments/rescan",
    request_body = RescanRequest,
    responses(
        (status = 200, description = "User is paid", body = PaymentStatus),
        (status = 400, description = "No qualifying payment", body = ErrorReply),
        (status = 403, description = "Caller is not an admin", body = ErrorReply)
    ),
    tag = "admin"
)]
pub async fn rescan_payments(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<RescanRequest>>,
) -> Result<Json<PaymentStatus>> {
    let actor = require_user(&headers, &state).await?;
    let request = require_payload(payload)?;
    let status = state.admin().rescan_payments(&actor, request.user_id).await?;
    Ok(Json(status))
}

#[utoipa::path(
    post,
    path = "/api/v1/user/manage",
    request_body = ManageUserRequest,
    responses(
        (status = 200, description = "Action applied", body = ManageUserReply),
        (status = 400, description = "Missing reason or invalid action", body = ErrorReply),
        (status = 403, description = "Caller is not an admin", body = ErrorReply)
    ),
    tag = "admin"
)]
pub async fn manage_user(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    payload: Option<Json<ManageUserRequest>>,
) -> Result<Json<ManageUserReply>> {
    let actor = require_user(&headers, &state).await?;
    let request = require_payload(payload)?;
    let user = state
        .admin()
        .manage_user(
            &actor,
            request.user_id,
            request.action,
            request.credits_delta,
            &request.reason,
            now_unix(),
        )
        .await?;
    Ok(Json(ManageUserReply {
        user: UserDetails::for_viewer(&user, Some(&actor)),
    }))
}
