//! Double-submit anti-forgery middleware.
//!
//! Safe requests get the current token echoed in the `X-Csrf-Token` response
//! header, and a fresh `turnstile_csrf` cookie when the caller has none yet.
//! Every other request must send the cookie value back in the header.

use axum::{
    extract::{Request, State},
    http::{
        header::{InvalidHeaderValue, SET_COOKIE},
        HeaderName, HeaderValue, Method,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::error::Error;
use crate::session::{
    csrf::{csrf_tokens_match, generate_csrf_token, CSRF_COOKIE_NAME, CSRF_HEADER_NAME},
    extract_cookie,
};
use crate::state::{AppState, AuthConfig};

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

pub async fn require_csrf(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let cookie = extract_cookie(request.headers(), CSRF_COOKIE_NAME).filter(|v| !v.is_empty());

    if is_safe(request.method()) {
        let (token, fresh) = match cookie {
            Some(token) => (token, false),
            None => match generate_csrf_token() {
                Ok(token) => (token, true),
                Err(err) => return Error::Internal(err).into_response(),
            },
        };
        let mut response = next.run(request).await;
        if let Ok(value) = HeaderValue::from_str(&token) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(CSRF_HEADER_NAME), value);
        }
        if fresh {
            if let Ok(cookie) = csrf_cookie(state.config(), &token) {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
        }
        return response;
    }

    let header = request
        .headers()
        .get(CSRF_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    match cookie {
        Some(cookie) if csrf_tokens_match(&cookie, header) => next.run(request).await,
        _ => {
            debug!(method = %request.method(), path = request.uri().path(), "rejected request without anti-forgery token");
            Error::CsrfTokenInvalid.into_response()
        }
    }
}

/// Cookie carrying the anti-forgery token; it lives as long as a session.
pub(crate) fn csrf_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = config.session_ttl_seconds();
    let mut cookie = format!(
        "{CSRF_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_methods() {
        assert!(is_safe(&Method::GET));
        assert!(is_safe(&Method::OPTIONS));
        assert!(!is_safe(&Method::POST));
        assert!(!is_safe(&Method::PUT));
    }

    #[test]
    fn cookie_is_secure_only_over_https() -> anyhow::Result<()> {
        let plain = csrf_cookie(&AuthConfig::new("http://localhost".to_string()), "abc")?;
        let plain = plain.to_str()?;
        assert!(plain.starts_with("turnstile_csrf=abc;"));
        assert!(!plain.contains("Secure"));

        let secure = csrf_cookie(&AuthConfig::new("https://turnstile.dev".to_string()), "abc")?;
        assert!(secure.to_str()?.ends_with("; Secure"));
        Ok(())
    }
}
