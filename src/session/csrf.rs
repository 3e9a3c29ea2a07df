//! Double-submit anti-forgery tokens.
//!
//! The token travels in the `turnstile_csrf` cookie and must be echoed in the
//! `X-Csrf-Token` header on every state-changing request. A cross-site page can
//! make the browser send the cookie but cannot read it to fill in the header.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;

pub const CSRF_COOKIE_NAME: &str = "turnstile_csrf";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_csrf_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate anti-forgery token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Constant-time comparison of the cookie and header values. Empty never matches.
#[must_use]
pub fn csrf_tokens_match(cookie: &str, header: &str) -> bool {
    !cookie.is_empty() && bool::from(cookie.as_bytes().ct_eq(header.as_bytes()))
}
