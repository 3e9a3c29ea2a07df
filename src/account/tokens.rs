//! Verification token ledger.
//!
//! Tokens live inside the user record, one slot per [`TokenPurpose`]. Issuing
//! overwrites the slot, so there is never more than one outstanding token per
//! purpose. Only the SHA-256 of the raw token is kept and comparison runs in
//! constant time.

use anyhow::Context;
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::models::{TokenPurpose, User, VerificationToken};
use crate::error::{Error, Result};

const TOKEN_BYTES: usize = 32;

/// Create a new random token for email links. Only the hash is stored.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate verification token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Hash a token so the raw value never reaches storage.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Raw token handed to the notifier; never persisted.
#[derive(Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expiry: i64,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Outcome of a hash match. An expired token is cleared either way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Redemption {
    Accepted,
    Expired,
}

/// Put a fresh token in the slot for `purpose`, replacing whatever was there.
///
/// # Errors
/// Returns [`Error::Internal`] if token generation fails.
pub fn issue(user: &mut User, purpose: TokenPurpose, ttl_seconds: i64, now: i64) -> Result<IssuedToken> {
    let token = generate_token().map_err(Error::Internal)?;
    let expiry = now.saturating_add(ttl_seconds);
    *user.token_slot(purpose) = Some(VerificationToken {
        hash: hash_token(&token),
        expiry,
    });
    Ok(IssuedToken { token, expiry })
}

/// Whether an unexpired token is outstanding for `purpose`.
#[must_use]
pub fn outstanding(user: &User, purpose: TokenPurpose, now: i64) -> bool {
    user.token(purpose).is_some_and(|token| token.expiry > now)
}

/// Compare the presented token with the stored hash and consume it on a match.
///
/// On [`Redemption::Expired`] the slot is already cleared and the caller must
/// persist the user before reporting the expiry.
///
/// # Errors
/// Returns [`Error::VerificationTokenInvalid`] when no token is outstanding or
/// the hash does not match; the user is left untouched.
pub fn redeem(user: &mut User, purpose: TokenPurpose, presented: &str, now: i64) -> Result<Redemption> {
    let Some(stored) = user.token(purpose) else {
        return Err(Error::VerificationTokenInvalid);
    };
    let presented_hash = hash_token(presented.trim());
    if !bool::from(stored.hash.as_slice().ct_eq(presented_hash.as_slice())) {
        return Err(Error::VerificationTokenInvalid);
    }
    let expired = stored.expiry <= now;
    *user.token_slot(purpose) = None;
    if expired {
        Ok(Redemption::Expired)
    } else {
        Ok(Redemption::Accepted)
    }
}

/// Force a token past its expiry without removing it.
pub fn expire(user: &mut User, purpose: TokenPurpose, now: i64) {
    if let Some(token) = user.token_slot(purpose).as_mut() {
        token.expiry = token.expiry.min(now.saturating_sub(1));
    }
}
