use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use crate::state::AppState;
use crate::GIT_COMMIT_HASH;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VersionReply {
    pub name: String,
    pub version: String,
    pub build: String,
    pub paywall_enabled: bool,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Credential store is healthy", body = Health),
        (status = 503, description = "Credential store is unhealthy", body = Health)
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health(state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let database = match state.users().ping().await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!("Failed to ping credential store: {err:#}");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if database.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let status = database.err().unwrap_or(StatusCode::OK);
    (status, app_header(), Json(health))
}

/// Build info plus the anti-forgery seed, which the middleware attaches to
/// every safe request.
#[utoipa::path(
    get,
    path = "/api/v1/version",
    responses(
        (status = 200, description = "Service version", body = VersionReply)
    ),
    tag = "health"
)]
pub async fn version(state: Extension<Arc<AppState>>) -> impl IntoResponse {
    let reply = VersionReply {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: GIT_COMMIT_HASH.to_string(),
        paywall_enabled: state.paywall().config().enabled(),
    };
    (app_header(), Json(reply))
}

fn app_header() -> HeaderMap {
    let short_hash = GIT_COMMIT_HASH.get(0..7).unwrap_or("");
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )) {
        headers.insert("X-App", value);
    }
    headers
}
