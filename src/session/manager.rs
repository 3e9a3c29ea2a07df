//! Session issuance and resolution.
//!
//! Flow Overview: login creates a random 32-byte token, stores its SHA-256 with
//! the user id and hands the raw value back for the cookie. Resolution decodes
//! the cookie, looks the hash up and checks expiry; anything that does not decode
//! is treated as no session. Resolving to a deactivated user destroys the
//! session on the spot.

use anyhow::anyhow;
use axum::http::{header::COOKIE, HeaderMap};
use base64ct::{Base64UrlUnpadded, Encoding};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::store::{SessionRecord, SessionStore};
use crate::account::{models::User, store::UserStore, tokens};
use crate::error::{Error, Result};

pub const SESSION_COOKIE_NAME: &str = "turnstile_session";
const SESSION_TOKEN_BYTES: usize = 32;

/// Raw session token plus its lifetime, for the `Set-Cookie` header.
#[derive(Clone)]
pub struct SessionHandle {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: i64,
    pub max_age: i64,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    ttl_seconds: i64,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, users: Arc<dyn UserStore>, ttl_seconds: i64) -> Self {
        Self {
            store,
            users,
            ttl_seconds,
        }
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Bind `user_id` to a fresh session.
    ///
    /// # Errors
    /// [`Error::SessionStore`] when the backing store fails.
    pub async fn create_session(&self, user_id: Uuid, now: i64) -> Result<SessionHandle> {
        let record = SessionRecord {
            user_id,
            created_at: now,
            expires_at: now.saturating_add(self.ttl_seconds),
        };
        for _ in 0..3 {
            let token = tokens::generate_token().map_err(Error::SessionStore)?;
            let inserted = self
                .store
                .insert(&tokens::hash_token(&token), record)
                .await
                .map_err(Error::SessionStore)?;
            if inserted {
                debug!(user_id = %user_id, "session created");
                return Ok(SessionHandle {
                    token,
                    user_id,
                    expires_at: record.expires_at,
                    max_age: self.ttl_seconds,
                });
            }
        }
        Err(Error::SessionStore(anyhow!("failed to generate unique session token")))
    }

    /// Resolve the session cookie to the bound user id.
    ///
    /// # Errors
    /// [`Error::NoSession`] for a missing, malformed, unknown or expired session.
    pub async fn resolve_session(&self, headers: &HeaderMap, now: i64) -> Result<Uuid> {
        let token = extract_session_token(headers).ok_or(Error::NoSession)?;
        let record = self
            .store
            .get(&tokens::hash_token(&token))
            .await
            .map_err(Error::SessionStore)?
            .ok_or(Error::NoSession)?;
        if record.expires_at <= now {
            return Err(Error::NoSession);
        }
        Ok(record.user_id)
    }

    /// Resolve the session and load its user.
    ///
    /// # Errors
    /// [`Error::NoSession`] without a valid session; [`Error::NotLoggedIn`] when
    /// the user is gone or deactivated, in which case the session is destroyed.
    pub async fn resolve_user(&self, headers: &HeaderMap, now: i64) -> Result<User> {
        let user_id = self.resolve_session(headers, now).await?;
        let user = self.users.get_by_id(user_id).await.map_err(Error::Store)?;
        match user {
            Some(user) if !user.deactivated => Ok(user),
            Some(_) | None => {
                self.destroy_session(headers).await?;
                info!(user_id = %user_id, "destroyed session bound to inactive user");
                Err(Error::NotLoggedIn)
            }
        }
    }

    /// Expire the current session. Without one this is a no-op.
    ///
    /// # Errors
    /// [`Error::SessionStore`] when the backing store fails.
    pub async fn destroy_session(&self, headers: &HeaderMap) -> Result<()> {
        let Some(token) = extract_session_token(headers) else {
            return Ok(());
        };
        self.store
            .delete(&tokens::hash_token(&token))
            .await
            .map_err(Error::SessionStore)
    }
}

/// Session token from the cookie header, if it has the expected shape.
#[must_use]
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let token = extract_cookie(headers, SESSION_COOKIE_NAME)?;
    let decoded = Base64UrlUnpadded::decode_vec(&token).ok()?;
    (decoded.len() == SESSION_TOKEN_BYTES).then_some(token)
}

/// Value of cookie `name` across every `Cookie` header.
#[must_use]
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == name {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::store::MemoryUserStore;
    use crate::error::ErrorCode;
    use crate::session::store::MemorySessionStore;
    use axum::http::HeaderValue;

    const NOW: i64 = 1_700_000_000;

    fn cookie_headers(token: &str) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("other=1; {SESSION_COOKIE_NAME}={token}"))?,
        );
        Ok(headers)
    }

    async fn setup() -> anyhow::Result<(SessionManager, Arc<MemoryUserStore>, User)> {
        let users = Arc::new(MemoryUserStore::new());
        let user = User::new_pending(
            "a@x.com".to_string(),
            "alice".to_string(),
            String::new(),
            "ab".repeat(32),
            NOW,
        );
        users.insert(&user).await?;
        let manager = SessionManager::new(Arc::new(MemorySessionStore::new()), users.clone(), 60);
        Ok((manager, users, user))
    }

    #[tokio::test]
    async fn created_session_resolves_to_user() -> anyhow::Result<()> {
        let (manager, _, user) = setup().await?;
        let handle = manager.create_session(user.id, NOW).await?;
        assert_eq!(handle.max_age, 60);
        let headers = cookie_headers(&handle.token)?;
        assert_eq!(manager.resolve_session(&headers, NOW).await?, user.id);
        assert_eq!(manager.resolve_user(&headers, NOW).await?.id, user.id);
        Ok(())
    }

    #[tokio::test]
    async fn missing_malformed_and_expired_sessions_fail_closed() -> anyhow::Result<()> {
        let (manager, _, user) = setup().await?;
        let empty = HeaderMap::new();
        let err = manager.resolve_session(&empty, NOW).await.err();
        assert!(matches!(err, Some(Error::NoSession)));

        let garbage = cookie_headers("not-base64!!")?;
        let err = manager.resolve_session(&garbage, NOW).await.err();
        assert!(matches!(err, Some(Error::NoSession)));

        let unknown = cookie_headers(&tokens::generate_token()?)?;
        let err = manager.resolve_session(&unknown, NOW).await.err();
        assert!(matches!(err, Some(Error::NoSession)));

        let handle = manager.create_session(user.id, NOW).await?;
        let headers = cookie_headers(&handle.token)?;
        let err = manager.resolve_session(&headers, NOW + 60).await.err();
        assert!(matches!(err, Some(Error::NoSession)));
        Ok(())
    }

    #[tokio::test]
    async fn deactivated_user_loses_session_on_resolution() -> anyhow::Result<()> {
        let (manager, users, mut user) = setup().await?;
        let handle = manager.create_session(user.id, NOW).await?;
        let headers = cookie_headers(&handle.token)?;

        user.deactivate();
        users.update(&user).await?;

        let err = manager.resolve_user(&headers, NOW).await.err().map(|e| e.code());
        assert_eq!(err, Some(ErrorCode::NotLoggedIn));
        // Destroyed as a side effect, so even reactivation does not revive it.
        user.reactivate();
        users.update(&user).await?;
        let err = manager.resolve_session(&headers, NOW).await.err();
        assert!(matches!(err, Some(Error::NoSession)));
        Ok(())
    }

    #[tokio::test]
    async fn destroy_is_idempotent() -> anyhow::Result<()> {
        let (manager, _, user) = setup().await?;
        manager.destroy_session(&HeaderMap::new()).await?;
        let handle = manager.create_session(user.id, NOW).await?;
        let headers = cookie_headers(&handle.token)?;
        manager.destroy_session(&headers).await?;
        manager.destroy_session(&headers).await?;
        assert!(manager.resolve_session(&headers, NOW).await.is_err());
        Ok(())
    }

    #[test]
    fn extract_cookie_finds_named_pair() -> anyhow::Result<()> {
        let headers = cookie_headers("abc")?;
        assert_eq!(extract_cookie(&headers, "other").as_deref(), Some("1"));
        assert_eq!(extract_cookie(&headers, SESSION_COOKIE_NAME).as_deref(), Some("abc"));
        assert_eq!(extract_cookie(&headers, "missing"), None);
        Ok(())
    }
}
