//! User list filters and opaque pagination cursors.

use base64ct::{Base64UrlUnpadded, Encoding};
use uuid::Uuid;

use crate::account::models::User;
use crate::error::{Error, Result};

pub const PAGE_SIZE: usize = 20;

/// Conjunctive filter over users. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserFilter {
    /// Substring of the normalized email.
    pub email: Option<String>,
    /// Substring of the username.
    pub username: Option<String>,
    /// Exact match on any key in the identity history.
    pub public_key: Option<String>,
    pub locked: bool,
    pub deactivated: bool,
    pub unverified: bool,
    pub unpaid: bool,
}

impl UserFilter {
    /// Lowercase the text predicates so they compare against normalized fields.
    #[must_use]
    pub fn normalized(self) -> Self {
        let clean = |value: Option<String>| {
            value
                .map(|value| value.trim().to_lowercase())
                .filter(|value| !value.is_empty())
        };
        Self {
            email: clean(self.email),
            username: clean(self.username),
            public_key: clean(self.public_key),
            ..self
        }
    }

    #[must_use]
    pub fn matches(&self, user: &User) -> bool {
        self.email
            .as_deref()
            .map_or(true, |email| user.email.contains(email))
            && self
                .username
                .as_deref()
                .map_or(true, |username| user.username.contains(username))
            && self
                .public_key
                .as_deref()
                .map_or(true, |key| user.has_public_key(key))
            && (!self.locked || user.locked)
            && (!self.deactivated || user.deactivated)
            && (!self.unverified || !user.email_verified)
            && (!self.unpaid || !user.is_paid())
    }
}

/// Cursor pointing just past `user_id` in id order.
#[must_use]
pub fn encode_cursor(user_id: Uuid) -> String {
    Base64UrlUnpadded::encode_string(user_id.as_bytes())
}

/// # Errors
/// [`Error::InvalidInput`] when the cursor was not produced by [`encode_cursor`].
pub fn decode_cursor(cursor: &str) -> Result<Uuid> {
    let bytes = Base64UrlUnpadded::decode_vec(cursor.trim())
        .map_err(|_| Error::InvalidInput("invalid cursor".to_string()))?;
    Uuid::from_slice(&bytes).map_err(|_| Error::InvalidInput("invalid cursor".to_string()))
}
