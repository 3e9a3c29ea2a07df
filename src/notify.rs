//! Outbound notifications (verification links, lockout notices).
//!
//! Workflows hand a [`Notification`] to a [`Notifier`] after the user record is
//! persisted and the per-user lock is released. Delivery is someone else's job:
//! the default [`LogNotifier`] only logs that a message would have gone out.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use url::Url;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    VerifyNewUser,
    ResetPassword,
    UpdateKey,
    UserLocked,
    PasswordChanged,
}

impl NotificationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VerifyNewUser => "verify_new_user",
            Self::ResetPassword => "reset_password",
            Self::UpdateKey => "update_key",
            Self::UserLocked => "user_locked",
            Self::PasswordChanged => "password_changed",
        }
    }
}

#[derive(Clone)]
pub struct Notification {
    pub to_email: String,
    pub username: String,
    pub kind: NotificationKind,
    /// Verification link, when the message carries a token.
    pub link: Option<String>,
    /// Raw token, kept so non-browser clients can redeem it directly.
    pub token: Option<String>,
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("to_email", &self.to_email)
            .field("username", &self.username)
            .field("kind", &self.kind)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Delivery abstraction used by the verification workflows.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a message or return an error; the caller logs and moves on.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Local dev notifier that logs instead of sending real email.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            to_email = %notification.to_email,
            username = %notification.username,
            kind = notification.kind.as_str(),
            has_link = notification.link.is_some(),
            "notification send stub"
        );
        Ok(())
    }
}

/// Build a frontend link such as `{base}/user/verify?email=..&verification_token=..`.
///
/// # Errors
/// Returns an error when `frontend_base_url` is not an absolute URL.
pub fn verify_link(frontend_base_url: &str, path: &str, email: &str, token: &str) -> Result<String> {
    let base = frontend_base_url.trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}{path}"))
        .with_context(|| format!("invalid frontend base url: {frontend_base_url}"))?;
    url.query_pairs_mut()
        .append_pair("email", email)
        .append_pair("verification_token", token);
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_link_encodes_query() -> Result<()> {
        let link = verify_link("https://turnstile.dev/", "/user/verify", "a+b@x.com", "tok_en")?;
        assert_eq!(
            link,
            "https://turnstile.dev/user/verify?email=a%2Bb%40x.com&verification_token=tok_en"
        );
        Ok(())
    }

    #[test]
    fn verify_link_rejects_relative_base() {
        assert!(verify_link("not a url", "/user/verify", "a@x.com", "t").is_err());
    }

    #[test]
    fn debug_hides_token() {
        let notification = Notification {
            to_email: "a@x.com".to_string(),
            username: "alice".to_string(),
            kind: NotificationKind::ResetPassword,
            link: None,
            token: Some("super-secret".to_string()),
        };
        assert!(!format!("{notification:?}").contains("super-secret"));
    }

    #[tokio::test]
    async fn log_notifier_accepts_everything() -> Result<()> {
        let notification = Notification {
            to_email: "a@x.com".to_string(),
            username: "alice".to_string(),
            kind: NotificationKind::UserLocked,
            link: None,
            token: None,
        };
        LogNotifier.send(&notification).await
    }
}
