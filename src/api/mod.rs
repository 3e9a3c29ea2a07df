//! HTTP surface.
//!
//! Every route except `/health` lives under `/api/v1`. Handlers receive the
//! shared [`AppState`] through an `Extension` and return the crate [`Error`]
//! type, which renders as a JSON error reply.
//!
//! [`Error`]: crate::Error

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method, Request},
    middleware,
    routing::{get, post, put},
    Extension, Router,
};
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

use crate::session::csrf::CSRF_HEADER_NAME;
use crate::state::AppState;

pub mod csrf;
pub mod error;
pub mod handlers;
mod openapi;

pub use openapi::openapi;

use handlers::{admin, auth, health, payments, users};

/// Routes mounted under `/api/v1`.
fn api_routes() -> Router {
    Router::new()
        .route("/version", get(health::version))
        .route("/user/new", post(auth::signup::new_user))
        .route("/user/verify", get(auth::signup::verify_new_user))
        .route("/user/verify/resend", post(auth::signup::resend_verification))
        .route("/login", post(auth::session::login))
        .route("/logout", post(auth::session::logout))
        .route("/user/password/reset", post(auth::password::reset_password))
        .route("/user/password/change", post(auth::password::change_password))
        .route("/user/me", get(auth::session::me))
        .route("/user/key", post(auth::identity::update_key))
        .route("/user/key/verify", post(auth::identity::verify_update_key))
        .route("/user/username/change", post(users::change_username))
        .route("/user/edit", post(users::edit_user))
        .route("/user/payments/registration", get(payments::registration_payment))
        .route("/user/payments/rescan", put(admin::rescan_payments))
        .route("/user/manage", post(admin::manage_user))
        .route("/user/:user_id", get(users::user_details))
        .route("/users", get(admin::list_users))
}

/// Build the full application: routes, anti-forgery checks, request ids,
/// tracing and CORS.
///
/// # Errors
/// Returns an error when the configured frontend URL has no usable origin.
pub fn app(state: Arc<AppState>) -> Result<Router> {
    let frontend_origin = frontend_origin(state.config().frontend_base_url())?;
    let csrf_header = HeaderName::from_static(CSRF_HEADER_NAME);
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, csrf_header.clone()])
        .expose_headers([csrf_header])
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = Router::new()
        .nest("/api/v1", api_routes())
        .route("/health", get(health::health))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            csrf::require_csrf,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state)),
        );
    Ok(app)
}

/// Start the server and run until `shutdown` resolves.
///
/// # Errors
/// Return error if failed to bind or serve
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = app(state)?;
    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
