//! Service context built once at startup and shared with every handler.

use std::sync::Arc;
use std::time::Duration;

use crate::account::{
    locks::UserLocks, password::PasswordHasherConfig, store::UserStore, AccountService,
};
use crate::admin::AdminProcessor;
use crate::notify::Notifier;
use crate::paywall::{AddressDeriver, PaymentGate, PaywallConfig, TxLookup};
use crate::session::{store::SessionStore, SessionManager};

const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_MAX_FAILED_LOGINS: u32 = 5;
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
const DEFAULT_NOTIFY_TIMEOUT_SECONDS: u64 = 10;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
    verification_token_ttl_seconds: i64,
    max_failed_logins: u32,
    min_password_length: usize,
    notify_timeout: Duration,
    password_memory_kib: u32,
    password_iterations: u32,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            verification_token_ttl_seconds: DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS,
            max_failed_logins: DEFAULT_MAX_FAILED_LOGINS,
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            notify_timeout: Duration::from_secs(DEFAULT_NOTIFY_TIMEOUT_SECONDS),
            password_memory_kib: crate::account::password::DEFAULT_MEMORY_KIB,
            password_iterations: crate::account::password::DEFAULT_ITERATIONS,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verification_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verification_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_failed_logins(mut self, attempts: u32) -> Self {
        self.max_failed_logins = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_min_password_length(mut self, length: usize) -> Self {
        self.min_password_length = length;
        self
    }

    #[must_use]
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Argon2 cost; tests turn this down so hashing stays fast.
    #[must_use]
    pub fn with_password_cost(mut self, memory_kib: u32, iterations: u32) -> Self {
        self.password_memory_kib = memory_kib;
        self.password_iterations = iterations;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn verification_token_ttl_seconds(&self) -> i64 {
        self.verification_token_ttl_seconds
    }

    #[must_use]
    pub fn max_failed_logins(&self) -> u32 {
        self.max_failed_logins
    }

    #[must_use]
    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    #[must_use]
    pub fn notify_timeout(&self) -> Duration {
        self.notify_timeout
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }

    /// # Errors
    /// Returns an error when the configured Argon2 cost is out of range.
    pub fn password_hasher(&self) -> anyhow::Result<PasswordHasherConfig> {
        PasswordHasherConfig::new(self.password_memory_kib, self.password_iterations)
    }
}

/// External collaborators the core talks to.
#[derive(Clone)]
pub struct Backends {
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub notifier: Arc<dyn Notifier>,
    pub deriver: Arc<dyn AddressDeriver>,
    pub lookup: Arc<dyn TxLookup>,
}

pub struct AppState {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    sessions: SessionManager,
    accounts: AccountService,
    paywall: Arc<PaymentGate>,
    admin: AdminProcessor,
}

impl AppState {
    /// Wire every workflow around one shared set of stores and per-user locks.
    ///
    /// # Errors
    /// Returns an error when the password hashing parameters are invalid.
    pub fn new(
        config: AuthConfig,
        paywall_config: PaywallConfig,
        backends: Backends,
    ) -> anyhow::Result<Self> {
        let locks = UserLocks::new();
        let passwords = config.password_hasher()?;
        let paywall = Arc::new(PaymentGate::new(
            paywall_config,
            Arc::clone(&backends.users),
            locks.clone(),
            backends.deriver,
            backends.lookup,
        ));
        let sessions = SessionManager::new(
            backends.sessions,
            Arc::clone(&backends.users),
            config.session_ttl_seconds(),
        );
        let accounts = AccountService::new(
            config.clone(),
            Arc::clone(&backends.users),
            locks.clone(),
            passwords,
            backends.notifier,
            Arc::clone(&paywall),
        );
        let admin = AdminProcessor::new(Arc::clone(&backends.users), locks, Arc::clone(&paywall));
        Ok(Self {
            config,
            users: backends.users,
            sessions,
            accounts,
            paywall,
            admin,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn accounts(&self) -> &AccountService {
        &self.accounts
    }

    #[must_use]
    pub fn paywall(&self) -> &Arc<PaymentGate> {
        &self.paywall
    }

    #[must_use]
    pub fn admin(&self) -> &AdminProcessor {
        &self.admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_defaults() {
        let config = AuthConfig::new("http://localhost:8080".to_string());
        assert_eq!(config.session_ttl_seconds(), DEFAULT_SESSION_TTL_SECONDS);
        assert_eq!(
            config.verification_token_ttl_seconds(),
            DEFAULT_VERIFICATION_TOKEN_TTL_SECONDS
        );
        assert_eq!(config.max_failed_logins(), 5);
        assert_eq!(config.min_password_length(), 8);
        assert!(!config.session_cookie_secure());
    }

    #[test]
    fn auth_config_overrides() {
        let config = AuthConfig::new("https://turnstile.dev".to_string())
            .with_session_ttl_seconds(60)
            .with_verification_token_ttl_seconds(120)
            .with_max_failed_logins(0)
            .with_min_password_length(12)
            .with_notify_timeout(Duration::from_secs(1));
        assert_eq!(config.session_ttl_seconds(), 60);
        assert_eq!(config.verification_token_ttl_seconds(), 120);
        assert_eq!(config.max_failed_logins(), 1);
        assert_eq!(config.min_password_length(), 12);
        assert_eq!(config.notify_timeout(), Duration::from_secs(1));
        assert!(config.session_cookie_secure());
    }

    #[test]
    fn password_cost_is_validated() {
        let config = AuthConfig::new("http://localhost".to_string()).with_password_cost(0, 0);
        assert!(config.password_hasher().is_err());
    }
}
