//! User record and the types embedded in it.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

/// Which out-of-band action a verification token authorizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    NewUser,
    UpdateKey,
    ResetPassword,
}

impl TokenPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewUser => "new_user",
            Self::UpdateKey => "update_key",
            Self::ResetPassword => "reset_password",
        }
    }
}

/// Stored half of a verification token: the SHA-256 of the raw value plus expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationToken {
    pub hash: Vec<u8>,
    pub expiry: i64,
}

impl fmt::Debug for VerificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationToken")
            .field("hash", &"<redacted>")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// A public key the user has registered, with its activation window.
///
/// `activated == 0` marks a key that is still pending verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub public_key: String,
    pub activated: i64,
    pub deactivated: i64,
}

impl Identity {
    #[must_use]
    pub fn pending(public_key: String) -> Self {
        Self {
            public_key,
            activated: 0,
            deactivated: 0,
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.activated != 0 && self.deactivated == 0
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.activated == 0 && self.deactivated == 0
    }
}

/// One admin mutation, kept on the target user for auditing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AdminLogEntry {
    pub admin_id: Uuid,
    pub action: String,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub hashed_password: String,
    pub admin: bool,
    pub email_verified: bool,
    pub locked: bool,
    pub deactivated: bool,
    pub failed_login_attempts: u32,
    pub last_login_time: i64,
    pub identities: Vec<Identity>,
    pub new_user_token: Option<VerificationToken>,
    pub update_key_token: Option<VerificationToken>,
    pub reset_password_token: Option<VerificationToken>,
    pub paywall_address: String,
    pub paywall_amount: u64,
    pub paywall_tx_not_before: i64,
    pub paywall_poll_expiry: i64,
    pub paywall_tx_id: Option<String>,
    pub email_notifications: u64,
    pub proposal_credits: u64,
    pub admin_log: Vec<AdminLogEntry>,
    pub created_at: i64,
}

impl User {
    /// Fresh pending account. Paywall fields are filled in by the payment gate.
    #[must_use]
    pub fn new_pending(
        email: String,
        username: String,
        hashed_password: String,
        public_key: String,
        now: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            username,
            hashed_password,
            admin: false,
            email_verified: false,
            locked: false,
            deactivated: false,
            failed_login_attempts: 0,
            last_login_time: 0,
            identities: vec![Identity::pending(public_key)],
            new_user_token: None,
            update_key_token: None,
            reset_password_token: None,
            paywall_address: String::new(),
            paywall_amount: 0,
            paywall_tx_not_before: 0,
            paywall_poll_expiry: 0,
            paywall_tx_id: None,
            email_notifications: 0,
            proposal_credits: 0,
            admin_log: Vec::new(),
            created_at: now,
        }
    }

    #[must_use]
    pub fn active_identity(&self) -> Option<&Identity> {
        self.identities.iter().find(|identity| identity.is_active())
    }

    #[must_use]
    pub fn pending_identity(&self) -> Option<&Identity> {
        self.identities.iter().find(|identity| identity.is_pending())
    }

    /// Active key, or the pending one for accounts that never verified.
    #[must_use]
    pub fn public_key(&self) -> Option<&str> {
        self.active_identity()
            .or_else(|| self.pending_identity())
            .map(|identity| identity.public_key.as_str())
    }

    #[must_use]
    pub fn has_public_key(&self, public_key: &str) -> bool {
        self.identities
            .iter()
            .any(|identity| identity.public_key == public_key)
    }

    #[must_use]
    pub const fn token(&self, purpose: TokenPurpose) -> Option<&VerificationToken> {
        match purpose {
            TokenPurpose::NewUser => self.new_user_token.as_ref(),
            TokenPurpose::UpdateKey => self.update_key_token.as_ref(),
            TokenPurpose::ResetPassword => self.reset_password_token.as_ref(),
        }
    }

    pub fn token_slot(&mut self, purpose: TokenPurpose) -> &mut Option<VerificationToken> {
        match purpose {
            TokenPurpose::NewUser => &mut self.new_user_token,
            TokenPurpose::UpdateKey => &mut self.update_key_token,
            TokenPurpose::ResetPassword => &mut self.reset_password_token,
        }
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("hashed_password", &"<redacted>")
            .field("admin", &self.admin)
            .field("email_verified", &self.email_verified)
            .field("locked", &self.locked)
            .field("deactivated", &self.deactivated)
            .field("failed_login_attempts", &self.failed_login_attempts)
            .field("last_login_time", &self.last_login_time)
            .field("identities", &self.identities)
            .field("new_user_token", &self.new_user_token)
            .field("update_key_token", &self.update_key_token)
            .field("reset_password_token", &self.reset_password_token)
            .field("paywall_address", &self.paywall_address)
            .field("paywall_amount", &self.paywall_amount)
            .field("paywall_tx_id", &self.paywall_tx_id)
            .finish_non_exhaustive()
    }
}
