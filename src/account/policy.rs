//! Input policy for emails, usernames, passwords and identity keys.

use regex::Regex;

use crate::error::{Error, Result};

pub const USERNAME_MIN_LENGTH: usize = 3;
pub const USERNAME_MAX_LENGTH: usize = 30;
pub const PASSWORD_MAX_LENGTH: usize = 1024;
/// Hex-encoded ed25519 public key length.
pub const PUBLIC_KEY_HEX_LENGTH: usize = 64;

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Normalize and validate an email in one step.
///
/// # Errors
/// Returns [`Error::MalformedEmail`] when the address does not look like one.
pub fn parse_email(email: &str) -> Result<String> {
    let email = normalize_email(email);
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(Error::MalformedEmail)
    }
}

#[must_use]
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Normalize and validate a username.
///
/// # Errors
/// Returns [`Error::MalformedUsername`] with the violated rule as context.
pub fn parse_username(username: &str) -> Result<String> {
    let username = normalize_username(username);
    let length = username.chars().count();
    if !(USERNAME_MIN_LENGTH..=USERNAME_MAX_LENGTH).contains(&length) {
        return Err(Error::MalformedUsername(format!(
            "username must be between {USERNAME_MIN_LENGTH} and {USERNAME_MAX_LENGTH} characters"
        )));
    }
    let allowed = Regex::new(r"^[a-z0-9._\-]+$").is_ok_and(|regex| regex.is_match(&username));
    if !allowed {
        return Err(Error::MalformedUsername(
            "username may only contain a-z, 0-9, '.', '_' and '-'".to_string(),
        ));
    }
    Ok(username)
}

/// # Errors
/// Returns [`Error::MalformedPassword`] when the password is too short or too long.
pub fn validate_password(password: &str, min_length: usize) -> Result<()> {
    let length = password.chars().count();
    if length < min_length {
        return Err(Error::MalformedPassword(format!(
            "password must be at least {min_length} characters"
        )));
    }
    if length > PASSWORD_MAX_LENGTH {
        return Err(Error::MalformedPassword(format!(
            "password must be at most {PASSWORD_MAX_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Normalize a hex public key to lowercase and check its shape.
///
/// # Errors
/// Returns [`Error::InvalidPublicKey`] unless the key is exactly 32 hex-encoded bytes.
pub fn parse_public_key(public_key: &str) -> Result<String> {
    let public_key = public_key.trim().to_lowercase();
    if public_key.len() == PUBLIC_KEY_HEX_LENGTH
        && public_key.chars().all(|c| c.is_ascii_hexdigit())
    {
        Ok(public_key)
    } else {
        Err(Error::InvalidPublicKey)
    }
}
