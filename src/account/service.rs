//! Self-service account workflows.
//!
//! Flow Overview: every mutation takes the user's advisory lock, re-reads the
//! record, validates, mutates in memory and persists the whole record. Input is
//! validated before the lock is taken wherever possible so a rejected request
//! never writes. Notifications go out after the lock is released and run under
//! a timeout.
//!
//! Login deliberately answers `invalid_credentials` for both unknown emails and
//! wrong passwords. Only locked, deactivated and unverified accounts get
//! distinct codes, and the last two only after the password matched.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    locks::UserLocks,
    models::{Identity, TokenPurpose, User},
    password::PasswordHasherConfig,
    policy,
    store::UserStore,
    tokens::{self, IssuedToken, Redemption},
};
use crate::error::{Error, Result};
use crate::notify::{verify_link, Notification, NotificationKind, Notifier};
use crate::paywall::PaymentGate;
use crate::state::AuthConfig;

const VERIFY_NEW_USER_PATH: &str = "/user/verify";
const RESET_PASSWORD_PATH: &str = "/user/password/reset";
const VERIFY_KEY_PATH: &str = "/user/key/verify";

#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password: String,
    pub public_key: String,
}

/// Result of a successful login.
#[derive(Clone, Debug)]
pub struct LoginOutcome {
    pub user: User,
    /// Login time before this one; 0 on first login.
    pub previous_login_time: i64,
}

pub struct AccountService {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    locks: UserLocks,
    passwords: PasswordHasherConfig,
    notifier: Arc<dyn Notifier>,
    paywall: Arc<PaymentGate>,
}

impl AccountService {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        locks: UserLocks,
        passwords: PasswordHasherConfig,
        notifier: Arc<dyn Notifier>,
        paywall: Arc<PaymentGate>,
    ) -> Self {
        Self {
            config,
            users,
            locks,
            passwords,
            notifier,
            paywall,
        }
    }

    /// Fetch a user by id.
    ///
    /// # Errors
    /// [`Error::UserNotFound`] or a store failure.
    pub async fn get(&self, user_id: Uuid) -> Result<User> {
        self.users
            .get_by_id(user_id)
            .await
            .map_err(Error::Store)?
            .ok_or(Error::UserNotFound)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.users.get_by_email(email).await.map_err(Error::Store)
    }

    /// Create a `Pending/Unpaid` account and send the new-user verification token.
    ///
    /// # Errors
    /// Policy violations, duplicate email/username/public key, or backend failures.
    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn new_user(&self, request: NewUser, now: i64) -> Result<User> {
        let email = policy::parse_email(&request.email)?;
        let username = policy::parse_username(&request.username)?;
        policy::validate_password(&request.password, self.config.min_password_length())?;
        let public_key = policy::parse_public_key(&request.public_key)?;

        if self.find_by_email(&email).await?.is_some() {
            return Err(Error::DuplicateEmail);
        }
        if self
            .users
            .get_by_username(&username)
            .await
            .map_err(Error::Store)?
            .is_some()
        {
            return Err(Error::DuplicateUsername);
        }
        self.ensure_public_key_unused(&public_key, None).await?;

        let hashed_password = self.passwords.hash(&request.password).await?;
        let mut user = User::new_pending(email, username, hashed_password, public_key, now);
        self.paywall.assign(&mut user, now).await?;
        let issued = tokens::issue(
            &mut user,
            TokenPurpose::NewUser,
            self.config.verification_token_ttl_seconds(),
            now,
        )?;
        self.users.insert(&user).await?;
        info!(user_id = %user.id, "created pending user");

        self.notify_token(&user, NotificationKind::VerifyNewUser, VERIFY_NEW_USER_PATH, &issued)
            .await?;
        Ok(user)
    }

    /// Redeem the new-user token: `Pending -> Verified`.
    ///
    /// # Errors
    /// [`Error::VerificationTokenInvalid`] or [`Error::VerificationTokenExpired`].
    #[instrument(skip(self, token))]
    pub async fn verify_new_user(&self, email: &str, token: &str, now: i64) -> Result<User> {
        let email = policy::normalize_email(email);
        let Some(user) = self.find_by_email(&email).await? else {
            return Err(Error::VerificationTokenInvalid);
        };

        let _guard = self.locks.lock(user.id).await;
        let mut user = self.get(user.id).await?;
        match tokens::redeem(&mut user, TokenPurpose::NewUser, token, now)? {
            Redemption::Expired => {
                self.users.update(&user).await?;
                Err(Error::VerificationTokenExpired)
            }
            Redemption::Accepted => {
                user.mark_verified(now);
                self.users.update(&user).await?;
                info!(user_id = %user.id, "email verified");
                Ok(user)
            }
        }
    }

    /// Re-issue the new-user token once the previous one has expired.
    ///
    /// Unknown and already verified emails succeed silently. `new_email` moves
    /// the pending account to another address and `public_key` replaces the
    /// pending identity.
    ///
    /// # Errors
    /// [`Error::VerificationTokenUnexpired`] while the current token is still valid.
    #[instrument(skip(self, public_key))]
    pub async fn resend_verification(
        &self,
        email: &str,
        new_email: Option<&str>,
        public_key: Option<&str>,
        now: i64,
    ) -> Result<()> {
        let email = policy::normalize_email(email);
        let new_email = new_email.map(policy::parse_email).transpose()?;
        let public_key = public_key.map(policy::parse_public_key).transpose()?;

        let Some(user) = self.find_by_email(&email).await? else {
            return Ok(());
        };
        if user.email_verified {
            return Ok(());
        }
        if let Some(new_email) = new_email.as_deref() {
            if new_email != email && self.find_by_email(new_email).await?.is_some() {
                return Err(Error::DuplicateEmail);
            }
        }
        if let Some(public_key) = public_key.as_deref() {
            self.ensure_public_key_unused(public_key, Some(user.id)).await?;
        }

        let (user, issued) = {
            let _guard = self.locks.lock(user.id).await;
            let mut user = self.get(user.id).await?;
            if user.email_verified {
                return Ok(());
            }
            if tokens::outstanding(&user, TokenPurpose::NewUser, now) {
                return Err(Error::VerificationTokenUnexpired);
            }
            if let Some(new_email) = new_email {
                if new_email != user.email {
                    warn!(
                        user_id = %user.id,
                        "pending account email changed through resend; this doubles as re-registration"
                    );
                    user.email = new_email;
                }
            }
            if let Some(public_key) = public_key {
                user.identities.retain(|identity| !identity.is_pending());
                user.identities.push(Identity::pending(public_key));
            }
            let issued = tokens::issue(
                &mut user,
                TokenPurpose::NewUser,
                self.config.verification_token_ttl_seconds(),
                now,
            )?;
            self.users.update(&user).await?;
            (user, issued)
        };

        self.notify_token(&user, NotificationKind::VerifyNewUser, VERIFY_NEW_USER_PATH, &issued)
            .await
    }

    /// Check credentials and apply the lockout policy.
    ///
    /// # Errors
    /// [`Error::InvalidCredentials`] for unknown email or wrong password,
    /// [`Error::UserLocked`], [`Error::UserDeactivated`] or [`Error::EmailNotVerified`].
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str, now: i64) -> Result<LoginOutcome> {
        let email = policy::normalize_email(email);
        let Some(user) = self.find_by_email(&email).await? else {
            self.passwords.verify_dummy(password).await;
            return Err(Error::InvalidCredentials);
        };

        let guard = self.locks.lock(user.id).await;
        let mut user = self.get(user.id).await?;

        if user.deactivated {
            drop(guard);
            if !self.passwords.verify(password, &user.hashed_password).await {
                return Err(Error::InvalidCredentials);
            }
            return Err(Error::UserDeactivated);
        }

        if user.locked {
            let issued = if tokens::outstanding(&user, TokenPurpose::ResetPassword, now) {
                None
            } else {
                let issued = tokens::issue(
                    &mut user,
                    TokenPurpose::ResetPassword,
                    self.config.verification_token_ttl_seconds(),
                    now,
                )?;
                self.users.update(&user).await?;
                Some(issued)
            };
            drop(guard);
            if let Some(issued) = issued {
                info!(user_id = %user.id, "issued reset token for locked account");
                if let Err(err) = self
                    .notify_token(&user, NotificationKind::UserLocked, RESET_PASSWORD_PATH, &issued)
                    .await
                {
                    warn!(user_id = %user.id, "failed to send lockout notification: {err}");
                }
            }
            return Err(Error::UserLocked);
        }

        if !self.passwords.verify(password, &user.hashed_password).await {
            return Err(self.reject_password(&mut user).await);
        }

        user.ensure_can_login()?;
        let previous_login_time = user.record_successful_login(now);
        self.users.update(&user).await?;
        drop(guard);
        info!(user_id = %user.id, "login succeeded");
        Ok(LoginOutcome {
            user,
            previous_login_time,
        })
    }

    /// Issue a password reset token. Unknown and deactivated emails succeed silently.
    ///
    /// # Errors
    /// Store or notification failures.
    #[instrument(skip(self))]
    pub async fn request_password_reset(&self, email: &str, now: i64) -> Result<()> {
        let email = policy::normalize_email(email);
        let Some(user) = self.find_by_email(&email).await? else {
            return Ok(());
        };
        let (user, issued) = {
            let _guard = self.locks.lock(user.id).await;
            let mut user = self.get(user.id).await?;
            if user.deactivated {
                return Ok(());
            }
            let issued = tokens::issue(
                &mut user,
                TokenPurpose::ResetPassword,
                self.config.verification_token_ttl_seconds(),
                now,
            )?;
            self.users.update(&user).await?;
            (user, issued)
        };
        self.notify_token(&user, NotificationKind::ResetPassword, RESET_PASSWORD_PATH, &issued)
            .await
    }

    /// Redeem a reset token and set a new password. Unlocks the account.
    ///
    /// # Errors
    /// [`Error::MalformedPassword`], [`Error::VerificationTokenInvalid`],
    /// [`Error::VerificationTokenExpired`] or [`Error::UserDeactivated`].
    #[instrument(skip(self, token, new_password))]
    pub async fn reset_password(
        &self,
        email: &str,
        token: &str,
        new_password: &str,
        now: i64,
    ) -> Result<()> {
        policy::validate_password(new_password, self.config.min_password_length())?;
        let email = policy::normalize_email(email);
        let Some(user) = self.find_by_email(&email).await? else {
            return Err(Error::VerificationTokenInvalid);
        };
        let hashed_password = self.passwords.hash(new_password).await?;

        let user = {
            let _guard = self.locks.lock(user.id).await;
            let mut user = self.get(user.id).await?;
            if user.deactivated {
                return Err(Error::UserDeactivated);
            }
            match tokens::redeem(&mut user, TokenPurpose::ResetPassword, token, now)? {
                Redemption::Expired => {
                    self.users.update(&user).await?;
                    return Err(Error::VerificationTokenExpired);
                }
                Redemption::Accepted => {
                    user.hashed_password = hashed_password;
                    user.unlock();
                    self.users.update(&user).await?;
                }
            }
            user
        };
        info!(user_id = %user.id, "password reset");
        self.notify(&user, NotificationKind::PasswordChanged, None, None)
            .await
    }

    /// Stage a new identity key and send the key-update token.
    ///
    /// # Errors
    /// [`Error::InvalidPublicKey`], [`Error::DuplicatePublicKey`] or backend failures.
    #[instrument(skip(self, public_key))]
    pub async fn request_key_update(&self, user_id: Uuid, public_key: &str, now: i64) -> Result<()> {
        let public_key = policy::parse_public_key(public_key)?;
        self.ensure_public_key_unused(&public_key, Some(user_id)).await?;

        let (user, issued) = {
            let _guard = self.locks.lock(user_id).await;
            let mut user = self.get(user_id).await?;
            if user.active_identity().is_some_and(|identity| identity.public_key == public_key) {
                return Err(Error::DuplicatePublicKey);
            }
            user.identities.retain(|identity| !identity.is_pending());
            user.identities.push(Identity::pending(public_key));
            let issued = tokens::issue(
                &mut user,
                TokenPurpose::UpdateKey,
                self.config.verification_token_ttl_seconds(),
                now,
            )?;
            self.users.update(&user).await?;
            (user, issued)
        };
        self.notify_token(&user, NotificationKind::UpdateKey, VERIFY_KEY_PATH, &issued)
            .await
    }

    /// Redeem the key-update token, archiving the previous active key.
    ///
    /// # Errors
    /// [`Error::VerificationTokenInvalid`] or [`Error::VerificationTokenExpired`].
    #[instrument(skip(self, token))]
    pub async fn verify_key_update(&self, user_id: Uuid, token: &str, now: i64) -> Result<String> {
        let _guard = self.locks.lock(user_id).await;
        let mut user = self.get(user_id).await?;
        if user.pending_identity().is_none() {
            return Err(Error::VerificationTokenInvalid);
        }
        match tokens::redeem(&mut user, TokenPurpose::UpdateKey, token, now)? {
            Redemption::Expired => {
                self.users.update(&user).await?;
                Err(Error::VerificationTokenExpired)
            }
            Redemption::Accepted => {
                for identity in &mut user.identities {
                    if identity.is_active() {
                        identity.deactivated = now;
                    }
                }
                let mut activated = String::new();
                if let Some(identity) = user.identities.iter_mut().find(|i| i.is_pending()) {
                    identity.activated = now;
                    activated.clone_from(&identity.public_key);
                }
                self.users.update(&user).await?;
                info!(user_id = %user.id, "identity key rotated");
                Ok(activated)
            }
        }
    }

    /// A wrong password counts toward the lockout like a failed login.
    ///
    /// # Errors
    /// [`Error::InvalidCredentials`], [`Error::MalformedUsername`] or [`Error::DuplicateUsername`].
    #[instrument(skip(self, password))]
    pub async fn change_username(&self, user_id: Uuid, password: &str, new_username: &str) -> Result<User> {
        let username = policy::parse_username(new_username)?;
        let _guard = self.locks.lock(user_id).await;
        let mut user = self.get(user_id).await?;
        if !self.passwords.verify(password, &user.hashed_password).await {
            return Err(self.reject_password(&mut user).await);
        }
        if user.username == username {
            return Ok(user);
        }
        user.username = username;
        self.users.update(&user).await?;
        Ok(user)
    }

    /// A wrong current password counts toward the lockout like a failed login.
    ///
    /// # Errors
    /// [`Error::InvalidCredentials`] or [`Error::MalformedPassword`].
    #[instrument(skip(self, current_password, new_password))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        policy::validate_password(new_password, self.config.min_password_length())?;
        let user = {
            let _guard = self.locks.lock(user_id).await;
            let mut user = self.get(user_id).await?;
            if !self.passwords.verify(current_password, &user.hashed_password).await {
                return Err(self.reject_password(&mut user).await);
            }
            user.hashed_password = self.passwords.hash(new_password).await?;
            self.users.update(&user).await?;
            user
        };
        self.notify(&user, NotificationKind::PasswordChanged, None, None)
            .await
    }

    /// Replace the user's email notification bit flags.
    ///
    /// # Errors
    /// Store failures.
    pub async fn edit_preferences(&self, user_id: Uuid, email_notifications: u64) -> Result<User> {
        let _guard = self.locks.lock(user_id).await;
        let mut user = self.get(user_id).await?;
        user.email_notifications = email_notifications;
        self.users.update(&user).await?;
        Ok(user)
    }

    /// Count a wrong password against the lockout threshold. The caller holds
    /// the user's lock.
    async fn reject_password(&self, user: &mut User) -> Error {
        if user.record_failed_login(self.config.max_failed_logins()) {
            warn!(user_id = %user.id, "account locked after repeated failed password checks");
        }
        match self.users.update(user).await {
            Ok(()) => Error::InvalidCredentials,
            Err(err) => err.into(),
        }
    }

    async fn ensure_public_key_unused(&self, public_key: &str, owner: Option<Uuid>) -> Result<()> {
        let existing = self
            .users
            .get_by_public_key(public_key)
            .await
            .map_err(Error::Store)?;
        match existing {
            Some(other) if Some(other.id) != owner => Err(Error::DuplicatePublicKey),
            Some(_) | None => Ok(()),
        }
    }

    async fn notify_token(
        &self,
        user: &User,
        kind: NotificationKind,
        path: &str,
        issued: &IssuedToken,
    ) -> Result<()> {
        let link = verify_link(self.config.frontend_base_url(), path, &user.email, &issued.token)
            .map_err(Error::Internal)?;
        self.notify(user, kind, Some(link), Some(issued.token.clone()))
            .await
    }

    async fn notify(
        &self,
        user: &User,
        kind: NotificationKind,
        link: Option<String>,
        token: Option<String>,
    ) -> Result<()> {
        let notification = Notification {
            to_email: user.email.clone(),
            username: user.username.clone(),
            kind,
            link,
            token,
        };
        tokio::time::timeout(self.config.notify_timeout(), self.notifier.send(&notification))
            .await
            .map_err(|_| Error::External(anyhow::anyhow!("notification timed out")))?
            .map_err(Error::External)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::store::MemoryUserStore;
    use crate::error::ErrorCode;
    use crate::paywall::{tests::FakeWallet, PaywallConfig};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const NOW: i64 = 1_700_000_000;
    const TTL: i64 = 3_600;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        fn last_token(&self, kind: NotificationKind) -> Option<String> {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .iter()
                .rev()
                .find(|notification| notification.kind == kind)
                .and_then(|notification| notification.token.clone())
        }

        fn count(&self, kind: NotificationKind) -> usize {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .iter()
                .filter(|notification| notification.kind == kind)
                .count()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(notification.clone());
            Ok(())
        }
    }

    struct Fixture {
        service: AccountService,
        store: Arc<MemoryUserStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> anyhow::Result<Fixture> {
        fixture_with(
            AuthConfig::new("https://turnstile.dev".to_string())
                .with_verification_token_ttl_seconds(TTL)
                .with_max_failed_logins(3)
                .with_password_cost(8, 1),
        )
    }

    fn fixture_with(config: AuthConfig) -> anyhow::Result<Fixture> {
        let store = Arc::new(MemoryUserStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let wallet = Arc::new(FakeWallet::default());
        let locks = UserLocks::new();
        let paywall = Arc::new(PaymentGate::new(
            PaywallConfig::disabled(),
            store.clone(),
            locks.clone(),
            wallet.clone(),
            wallet,
        ));
        let service = AccountService::new(
            config.clone(),
            store.clone(),
            locks,
            config.password_hasher()?,
            notifier.clone(),
            paywall,
        );
        Ok(Fixture {
            service,
            store,
            notifier,
        })
    }

    fn new_user(n: u8) -> NewUser {
        NewUser {
            email: format!("User{n}@Example.com"),
            username: format!("user{n}"),
            password: "correct horse".to_string(),
            public_key: format!("{n:02x}").repeat(32),
        }
    }

    async fn verified(f: &Fixture, n: u8) -> anyhow::Result<User> {
        let user = f.service.new_user(new_user(n), NOW).await?;
        let token = f
            .notifier
            .last_token(NotificationKind::VerifyNewUser)
            .ok_or_else(|| anyhow::anyhow!("no verification token sent"))?;
        Ok(f.service.verify_new_user(&user.email, &token, NOW).await?)
    }

    #[tokio::test]
    async fn new_user_is_normalized_and_stores_only_the_token_hash() -> anyhow::Result<()> {
        let f = fixture()?;
        let user = f.service.new_user(new_user(1), NOW).await?;
        assert_eq!(user.email, "user1@example.com");
        assert!(!user.email_verified);

        let token = f.notifier.last_token(NotificationKind::VerifyNewUser);
        let stored = f.service.get(user.id).await?;
        let hash = stored.new_user_token.as_ref().map(|t| t.hash.clone());
        assert_eq!(hash, token.as_deref().map(tokens::hash_token));
        assert_ne!(hash.as_deref(), token.as_deref().map(str::as_bytes));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_is_case_insensitive() -> anyhow::Result<()> {
        let f = fixture()?;
        f.service.new_user(new_user(1), NOW).await?;
        let mut again = new_user(2);
        again.email = "USER1@example.com".to_string();
        let err = f.service.new_user(again, NOW).await.err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::DuplicateEmail));
        Ok(())
    }

    #[tokio::test]
    async fn expired_new_user_token_is_cleared() -> anyhow::Result<()> {
        let f = fixture()?;
        let user = f.service.new_user(new_user(1), NOW).await?;
        let token = f
            .notifier
            .last_token(NotificationKind::VerifyNewUser)
            .unwrap_or_default();

        let err = f
            .service
            .verify_new_user(&user.email, &token, NOW + TTL)
            .await
            .err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::VerificationTokenExpired));

        // The stale token is gone, so the same value is now simply invalid.
        let err = f
            .service
            .verify_new_user(&user.email, &token, NOW + TTL)
            .await
            .err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::VerificationTokenInvalid));
        Ok(())
    }

    #[tokio::test]
    async fn resend_waits_for_expiry() -> anyhow::Result<()> {
        let f = fixture()?;
        let user = f.service.new_user(new_user(1), NOW).await?;

        let err = f
            .service
            .resend_verification(&user.email, None, None, NOW + 10)
            .await
            .err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::VerificationTokenUnexpired));

        f.service
            .resend_verification(&user.email, None, None, NOW + TTL)
            .await?;
        assert_eq!(f.notifier.count(NotificationKind::VerifyNewUser), 2);

        let token = f
            .notifier
            .last_token(NotificationKind::VerifyNewUser)
            .unwrap_or_default();
        let user = f.service.verify_new_user(&user.email, &token, NOW + TTL).await?;
        assert!(user.email_verified);
        Ok(())
    }

    #[tokio::test]
    async fn resend_for_unknown_email_is_silent() -> anyhow::Result<()> {
        let f = fixture()?;
        f.service
            .resend_verification("nobody@example.com", None, None, NOW)
            .await?;
        assert_eq!(f.notifier.count(NotificationKind::VerifyNewUser), 0);
        Ok(())
    }

    #[tokio::test]
    async fn lockout_then_reset_unlocks() -> anyhow::Result<()> {
        let f = fixture()?;
        let user = verified(&f, 1).await?;

        for _ in 0..3 {
            let err = f.service.login(&user.email, "wrong password", NOW).await.err();
            assert_eq!(err.map(|e| e.code()), Some(ErrorCode::InvalidCredentials));
        }
        assert!(f.service.get(user.id).await?.locked);

        // Even the right password is refused, and a reset token goes out once.
        for _ in 0..2 {
            let err = f.service.login(&user.email, "correct horse", NOW).await.err();
            assert_eq!(err.map(|e| e.code()), Some(ErrorCode::UserLocked));
        }
        assert_eq!(f.notifier.count(NotificationKind::UserLocked), 1);

        let token = f
            .notifier
            .last_token(NotificationKind::UserLocked)
            .unwrap_or_default();
        f.service
            .reset_password(&user.email, &token, "battery staple", NOW + 1)
            .await?;

        let outcome = f.service.login(&user.email, "battery staple", NOW + 2).await?;
        assert!(!outcome.user.locked);
        assert_eq!(outcome.user.failed_login_attempts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_alike() -> anyhow::Result<()> {
        let f = fixture()?;
        let user = verified(&f, 1).await?;
        let unknown = f.service.login("ghost@example.com", "whatever", NOW).await.err();
        let wrong = f.service.login(&user.email, "whatever", NOW).await.err();
        assert_eq!(unknown.map(|e| e.code()), Some(ErrorCode::InvalidCredentials));
        assert_eq!(wrong.map(|e| e.code()), Some(ErrorCode::InvalidCredentials));
        Ok(())
    }

    #[tokio::test]
    async fn unverified_login_is_revealed_only_with_the_right_password() -> anyhow::Result<()> {
        let f = fixture()?;
        let user = f.service.new_user(new_user(1), NOW).await?;
        let wrong = f.service.login(&user.email, "nope nope", NOW).await.err();
        assert_eq!(wrong.map(|e| e.code()), Some(ErrorCode::InvalidCredentials));
        let right = f.service.login(&user.email, "correct horse", NOW).await.err();
        assert_eq!(right.map(|e| e.code()), Some(ErrorCode::EmailNotVerified));
        Ok(())
    }

    #[tokio::test]
    async fn login_reports_previous_login_time() -> anyhow::Result<()> {
        let f = fixture()?;
        let user = verified(&f, 1).await?;
        let first = f.service.login(&user.email, "correct horse", NOW).await?;
        assert_eq!(first.previous_login_time, 0);
        let second = f.service.login(&user.email, "correct horse", NOW + 60).await?;
        assert_eq!(second.previous_login_time, NOW);
        Ok(())
    }

    #[tokio::test]
    async fn key_rotation_retires_the_old_key() -> anyhow::Result<()> {
        let f = fixture()?;
        let user = verified(&f, 1).await?;
        let old_key = "01".repeat(32);
        let new_key = "aa".repeat(32);

        f.service.request_key_update(user.id, &new_key, NOW).await?;
        let token = f
            .notifier
            .last_token(NotificationKind::UpdateKey)
            .unwrap_or_default();
        let activated = f.service.verify_key_update(user.id, &token, NOW + 5).await?;
        assert_eq!(activated, new_key);

        let user = f.service.get(user.id).await?;
        assert_eq!(
            user.active_identity().map(|identity| identity.public_key.clone()),
            Some(new_key)
        );
        assert!(user
            .identities
            .iter()
            .any(|identity| identity.public_key == old_key && identity.deactivated == NOW + 5));
        Ok(())
    }

    #[tokio::test]
    async fn retired_keys_stay_claimed() -> anyhow::Result<()> {
        let f = fixture()?;
        let first = verified(&f, 1).await?;
        let second = verified(&f, 2).await?;

        let err = f
            .service
            .request_key_update(second.id, &"01".repeat(32), NOW)
            .await
            .err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::DuplicatePublicKey));

        f.service.request_key_update(first.id, &"bb".repeat(32), NOW).await?;
        let token = f
            .notifier
            .last_token(NotificationKind::UpdateKey)
            .unwrap_or_default();
        f.service.verify_key_update(first.id, &token, NOW).await?;

        let err = f
            .service
            .request_key_update(second.id, &"01".repeat(32), NOW)
            .await
            .err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::DuplicatePublicKey));
        Ok(())
    }

    #[tokio::test]
    async fn change_username_requires_password_and_uniqueness() -> anyhow::Result<()> {
        let f = fixture()?;
        let first = verified(&f, 1).await?;
        verified(&f, 2).await?;

        let err = f
            .service
            .change_username(first.id, "wrong password", "renamed")
            .await
            .err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::InvalidCredentials));

        let err = f
            .service
            .change_username(first.id, "correct horse", "user2")
            .await
            .err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::DuplicateUsername));

        let user = f
            .service
            .change_username(first.id, "correct horse", "Renamed")
            .await?;
        assert_eq!(user.username, "renamed");
        Ok(())
    }

    #[tokio::test]
    async fn change_password_notifies() -> anyhow::Result<()> {
        let f = fixture()?;
        let user = verified(&f, 1).await?;
        let err = f.service.change_password(user.id, "correct horse", "short").await.err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::MalformedPassword));

        f.service
            .change_password(user.id, "correct horse", "battery staple")
            .await?;
        assert_eq!(f.notifier.count(NotificationKind::PasswordChanged), 1);
        f.service.login(&user.email, "battery staple", NOW).await?;
        Ok(())
    }

    #[tokio::test]
    async fn reset_request_for_deactivated_user_is_silent() -> anyhow::Result<()> {
        let f = fixture()?;
        let mut user = verified(&f, 1).await?;
        user.deactivated = true;
        f.store.update(&user).await?;

        f.service.request_password_reset(&user.email, NOW).await?;
        f.service.request_password_reset("ghost@example.com", NOW).await?;
        assert_eq!(f.notifier.count(NotificationKind::ResetPassword), 0);
        Ok(())
    }

    #[tokio::test]
    async fn default_threshold_locks_after_five_failures() -> anyhow::Result<()> {
        let f = fixture_with(AuthConfig::new("https://turnstile.dev".to_string()).with_password_cost(8, 1))?;
        let user = verified(&f, 1).await?;

        for attempt in 1..=5 {
            let err = f.service.login(&user.email, "wrong password", NOW).await.err();
            assert_eq!(err.map(|e| e.code()), Some(ErrorCode::InvalidCredentials));
            assert_eq!(f.service.get(user.id).await?.locked, attempt == 5);
        }

        let err = f.service.login(&user.email, "correct horse", NOW).await.err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::UserLocked));

        let token = f
            .notifier
            .last_token(NotificationKind::UserLocked)
            .unwrap_or_default();
        f.service
            .reset_password(&user.email, &token, "battery staple", NOW + 1)
            .await?;
        let user = f.service.get(user.id).await?;
        assert!(!user.locked);
        assert_eq!(user.failed_login_attempts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn deactivated_user_gets_no_lockout_token_and_cannot_reset() -> anyhow::Result<()> {
        let f = fixture()?;
        let user = verified(&f, 1).await?;
        f.service
            .request_password_reset(&user.email, NOW)
            .await?;
        let token = f
            .notifier
            .last_token(NotificationKind::ResetPassword)
            .unwrap_or_default();

        let mut stored = f.service.get(user.id).await?;
        stored.deactivated = true;
        stored.locked = true;
        f.store.update(&stored).await?;

        let err = f.service.login(&user.email, "correct horse", NOW).await.err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::UserDeactivated));
        let err = f.service.login(&user.email, "wrong password", NOW).await.err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::InvalidCredentials));
        assert_eq!(f.notifier.count(NotificationKind::UserLocked), 0);

        let err = f
            .service
            .reset_password(&user.email, &token, "battery staple", NOW + 1)
            .await
            .err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::UserDeactivated));
        let stored = f.service.get(user.id).await?;
        assert!(stored.locked);
        assert!(stored.deactivated);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_on_profile_changes_counts_toward_lockout() -> anyhow::Result<()> {
        let f = fixture()?;
        let user = verified(&f, 1).await?;

        for _ in 0..2 {
            let err = f
                .service
                .change_username(user.id, "wrong password", "renamed")
                .await
                .err();
            assert_eq!(err.map(|e| e.code()), Some(ErrorCode::InvalidCredentials));
        }
        assert_eq!(f.service.get(user.id).await?.failed_login_attempts, 2);

        let err = f
            .service
            .change_password(user.id, "wrong password", "battery staple")
            .await
            .err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::InvalidCredentials));
        assert!(f.service.get(user.id).await?.locked);

        let err = f.service.login(&user.email, "correct horse", NOW).await.err();
        assert_eq!(err.map(|e| e.code()), Some(ErrorCode::UserLocked));
        Ok(())
    }
}
