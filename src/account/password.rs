//! Argon2id password hashing.
//!
//! Hashing runs on the blocking pool so a burst of logins does not stall the
//! async workers. Unknown-email logins still pay for one verification against a
//! throwaway hash so response timing does not reveal which emails exist.

use anyhow::{anyhow, Context};
use argon2::{
    password_hash::SaltString, Algorithm, Argon2, Params, PasswordHash, PasswordHasher,
    PasswordVerifier, Version,
};
use rand::{rngs::OsRng, RngCore};
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};

pub const DEFAULT_MEMORY_KIB: u32 = 19 * 1024;
pub const DEFAULT_ITERATIONS: u32 = 2;

#[derive(Clone, Debug)]
pub struct PasswordHasherConfig {
    params: Params,
    dummy_hash: Arc<OnceLock<Option<String>>>,
}

impl PasswordHasherConfig {
    /// # Errors
    /// Returns an error when the Argon2 cost parameters are out of range.
    pub fn new(memory_kib: u32, iterations: u32) -> anyhow::Result<Self> {
        let params = Params::new(memory_kib, iterations, 1, None)
            .map_err(|err| anyhow!("invalid argon2 parameters: {err}"))?;
        Ok(Self {
            params,
            dummy_hash: Arc::new(OnceLock::new()),
        })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password into a PHC string.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if salt generation or hashing fails.
    pub async fn hash(&self, password: &str) -> Result<String> {
        let hasher = self.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash_blocking(&password))
            .await
            .map_err(|err| Error::Internal(anyhow!("password hashing task failed: {err}")))?
            .map_err(Error::Internal)
    }

    /// Check a password against a stored PHC string. Malformed hashes never match.
    pub async fn verify(&self, password: &str, hashword: &str) -> bool {
        let hasher = self.clone();
        let password = password.to_string();
        let hashword = hashword.to_string();
        tokio::task::spawn_blocking(move || hasher.verify_blocking(&password, &hashword))
            .await
            .unwrap_or(false)
    }

    /// Burn the same work as a real verification for an account that does not exist.
    pub async fn verify_dummy(&self, password: &str) {
        let hasher = self.clone();
        let password = password.to_string();
        let _ = tokio::task::spawn_blocking(move || {
            let dummy = hasher
                .dummy_hash
                .get_or_init(|| hasher.hash_blocking("turnstile-dummy-password").ok());
            if let Some(dummy) = dummy {
                let _ = hasher.verify_blocking(&password, dummy);
            }
        })
        .await;
    }

    fn hash_blocking(&self, password: &str) -> anyhow::Result<String> {
        let mut bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("failed to generate password salt")?;
        let salt = SaltString::encode_b64(&bytes).map_err(|err| anyhow!("salt: {err}"))?;
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| anyhow!("failed to hash password: {err}"))
    }

    fn verify_blocking(&self, password: &str, hashword: &str) -> bool {
        PasswordHash::new(hashword).is_ok_and(|hash| {
            self.argon2()
                .verify_password(password.as_bytes(), &hash)
                .is_ok()
        })
    }
}
