use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;

use super::auth::require_user;
use crate::api::error::ErrorReply;
use crate::error::Result;
use crate::now_unix;
use crate::paywall::PaymentStatus;
use crate::state::AppState;

/// Ask the payment backend whether the registration fee has arrived.
#[utoipa::path(
    get,
    path = "/api/v1/user/payments/registration",
    responses(
        (status = 200, description = "Current payment status", body = PaymentStatus),
        (status = 401, description = "Not logged in", body = ErrorReply)
    ),
    tag = "payments"
)]
pub async fn registration_payment(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<PaymentStatus>> {
    let user = require_user(&headers, &state).await?;
    let status = state.paywall().check_payment(user.id, now_unix()).await?;
    Ok(Json(status))
}
