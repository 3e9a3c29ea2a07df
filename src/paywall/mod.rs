//! Payment gate for registration fees.
//!
//! Flow Overview: at signup the gate derives a payment address for the user and
//! opens a poll window. `check_payment` (user-triggered or from the poller) asks
//! the transaction backend whether a qualifying payment reached that address;
//! `rescan` does the same on admin request and ignores the poll window. A
//! qualifying transaction pays at least the required amount, has enough
//! confirmations and was seen no earlier than the signup time.
//!
//! Backend calls run with a timeout and never while holding a user lock. Once a
//! transaction id is recorded the user stays paid.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::account::{locks::UserLocks, models::User, store::UserStore};
use crate::error::{Error, Result};

pub mod backend;
pub mod poller;

pub use backend::{AddressDeriver, HttpPaywallBackend, Transaction, TxLookup, UnconfiguredPaywall};
pub use poller::spawn_paywall_poller;

const DEFAULT_CONFIRMATIONS: u32 = 2;
const DEFAULT_POLL_WINDOW_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Clone, Copy, Debug)]
pub struct PaywallConfig {
    amount: u64,
    confirmations: u32,
    poll_window_seconds: i64,
    poll_interval: Duration,
    timeout: Duration,
}

impl PaywallConfig {
    /// Paywall with the given fee; an amount of 0 disables it.
    #[must_use]
    pub fn new(amount: u64) -> Self {
        Self {
            amount,
            confirmations: DEFAULT_CONFIRMATIONS,
            poll_window_seconds: DEFAULT_POLL_WINDOW_SECONDS,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0)
    }

    #[must_use]
    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations;
        self
    }

    #[must_use]
    pub fn with_poll_window_seconds(mut self, seconds: i64) -> Self {
        self.poll_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds.max(1));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn amount(&self) -> u64 {
        self.amount
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.amount > 0
    }

    #[must_use]
    pub fn confirmations(&self) -> u32 {
        self.confirmations
    }

    #[must_use]
    pub fn poll_window_seconds(&self) -> i64 {
        self.poll_window_seconds
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for PaywallConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Registration payment state as reported to the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentStatus {
    pub has_paid: bool,
    pub paywall_address: String,
    pub paywall_amount: u64,
    pub paywall_tx_not_before: i64,
    pub paywall_tx_id: Option<String>,
}

impl From<&User> for PaymentStatus {
    fn from(user: &User) -> Self {
        Self {
            has_paid: user.is_paid(),
            paywall_address: user.paywall_address.clone(),
            paywall_amount: user.paywall_amount,
            paywall_tx_not_before: user.paywall_tx_not_before,
            paywall_tx_id: user.paywall_tx_id.clone(),
        }
    }
}

pub struct PaymentGate {
    config: PaywallConfig,
    users: Arc<dyn UserStore>,
    locks: UserLocks,
    deriver: Arc<dyn AddressDeriver>,
    lookup: Arc<dyn TxLookup>,
}

impl PaymentGate {
    #[must_use]
    pub fn new(
        config: PaywallConfig,
        users: Arc<dyn UserStore>,
        locks: UserLocks,
        deriver: Arc<dyn AddressDeriver>,
        lookup: Arc<dyn TxLookup>,
    ) -> Self {
        Self {
            config,
            users,
            locks,
            deriver,
            lookup,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PaywallConfig {
        &self.config
    }

    /// Fill the paywall fields of a user that is about to be created.
    ///
    /// # Errors
    /// [`Error::External`] when address derivation fails or times out.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn assign(&self, user: &mut User, now: i64) -> Result<()> {
        if !self.config.enabled() {
            user.paywall_amount = 0;
            user.paywall_address.clear();
            user.paywall_poll_expiry = 0;
            return Ok(());
        }
        let address = tokio::time::timeout(self.config.timeout(), self.deriver.derive(user.id))
            .await
            .map_err(|_| Error::External(anyhow::anyhow!("paywall address derivation timed out")))?
            .map_err(Error::External)?;
        user.paywall_address = address;
        user.paywall_amount = self.config.amount();
        user.paywall_tx_not_before = now;
        user.paywall_poll_expiry = now.saturating_add(self.config.poll_window_seconds());
        Ok(())
    }

    /// Look for a qualifying payment. Reopens an expired poll window first.
    ///
    /// # Errors
    /// [`Error::UserNotFound`], store failures, or [`Error::External`] on backend failure.
    #[instrument(skip(self))]
    pub async fn check_payment(&self, user_id: Uuid, now: i64) -> Result<PaymentStatus> {
        let user = self.load(user_id).await?;
        if user.is_paid() {
            return Ok(PaymentStatus::from(&user));
        }
        let user = if user.paywall_poll_expiry <= now {
            self.reopen_poll_window(user_id, now).await?
        } else {
            user
        };
        match self.find_qualifying(&user).await? {
            Some(tx) => self.record_payment(user_id, &tx).await,
            None => Ok(PaymentStatus::from(&user)),
        }
    }

    /// Forced lookup ignoring the poll window.
    ///
    /// # Errors
    /// [`Error::PaymentNotFound`] when no qualifying transaction exists yet; the
    /// user stays unpaid and the caller may retry later.
    #[instrument(skip(self))]
    pub async fn rescan(&self, user_id: Uuid) -> Result<PaymentStatus> {
        let user = self.load(user_id).await?;
        if user.is_paid() {
            return Ok(PaymentStatus::from(&user));
        }
        match self.find_qualifying(&user).await? {
            Some(tx) => self.record_payment(user_id, &tx).await,
            None => Err(Error::PaymentNotFound),
        }
    }

    /// One poller pass over unpaid users with an open poll window.
    /// Returns how many users became paid.
    ///
    /// # Errors
    /// Only when the list of unpaid users cannot be loaded; per-user failures are logged.
    pub async fn poll_once(&self, now: i64) -> Result<usize> {
        let unpaid = self.users.unpaid_users(now).await.map_err(Error::Store)?;
        let mut paid = 0;
        for user in unpaid {
            match self.find_qualifying(&user).await {
                Ok(Some(tx)) => match self.record_payment(user.id, &tx).await {
                    Ok(_) => paid += 1,
                    Err(err) => warn!(user_id = %user.id, "failed to record payment: {err}"),
                },
                Ok(None) => {}
                Err(err) => warn!(user_id = %user.id, "paywall lookup failed: {err}"),
            }
        }
        Ok(paid)
    }

    async fn load(&self, user_id: Uuid) -> Result<User> {
        self.users
            .get_by_id(user_id)
            .await
            .map_err(Error::Store)?
            .ok_or(Error::UserNotFound)
    }

    async fn reopen_poll_window(&self, user_id: Uuid, now: i64) -> Result<User> {
        let _guard = self.locks.lock(user_id).await;
        let mut user = self.load(user_id).await?;
        if user.is_paid() || user.paywall_poll_expiry > now {
            return Ok(user);
        }
        user.paywall_poll_expiry = now.saturating_add(self.config.poll_window_seconds());
        self.users.update(&user).await?;
        debug!(user_id = %user_id, "reopened paywall poll window");
        Ok(user)
    }

    async fn find_qualifying(&self, user: &User) -> Result<Option<Transaction>> {
        if user.paywall_address.is_empty() {
            return Ok(None);
        }
        let transactions = tokio::time::timeout(
            self.config.timeout(),
            self.lookup.transactions(&user.paywall_address),
        )
        .await
        .map_err(|_| Error::External(anyhow::anyhow!("paywall lookup timed out")))?
        .map_err(Error::External)?;
        Ok(transactions
            .into_iter()
            .filter(|tx| {
                tx.amount >= user.paywall_amount
                    && tx.confirmations >= self.config.confirmations()
                    && tx.timestamp >= user.paywall_tx_not_before
            })
            .min_by_key(|tx| tx.timestamp))
    }

    async fn record_payment(&self, user_id: Uuid, tx: &Transaction) -> Result<PaymentStatus> {
        let _guard = self.locks.lock(user_id).await;
        let mut user = self.load(user_id).await?;
        if user.mark_paid(&tx.txid) {
            self.users.update(&user).await?;
            info!(user_id = %user_id, txid = %tx.txid, "registration payment confirmed");
        }
        Ok(PaymentStatus::from(&user))
    }
}
