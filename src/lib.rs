//! # Turnstile (Account Authentication & Identity Verification)
//!
//! `turnstile` proves who a caller is across stateless HTTP requests, gates
//! privileged actions behind login and admin roles, and drives the workflows that
//! need out-of-band confirmation: email verification, password reset, identity-key
//! rotation and payment-based account activation.
//!
//! ## Accounts
//!
//! A user starts `Pending/Unpaid`. Redeeming the new-account token marks it
//! `Verified`; a qualifying registration payment marks it `Paid`. `Locked` and
//! `Deactivated` are orthogonal flags. Locking is recovered through password
//! reset, deactivation only through an admin.
//!
//! ## Verification Tokens
//!
//! Each user holds at most one outstanding token per purpose (new user, key
//! update, password reset). Issuing overwrites the previous token. Only the
//! SHA-256 of a token is stored and redemption compares hashes in constant time.
//! Expired redemptions clear the token, so the caller must ask for a new one.
//!
//! ## Sessions
//!
//! Sessions are opaque random cookies whose hashes map to a user id. Every
//! state-changing request also carries a double-submit anti-forgery token.
//! A session bound to a deactivated user is destroyed the next time it is used.
//!
//! ## Errors
//!
//! Every failure maps to a stable `error_code` so remote callers can branch on
//! it. Login collapses unknown email and wrong password into
//! `invalid_credentials` on purpose.

pub mod account;
pub mod admin;
pub mod api;
pub mod cli;
pub mod error;
pub mod notify;
pub mod paywall;
pub mod session;
pub mod state;

pub use error::{Error, ErrorCode, Result};
pub use state::{AppState, AuthConfig, Backends};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Current wall-clock time as unix seconds.
#[must_use]
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}
