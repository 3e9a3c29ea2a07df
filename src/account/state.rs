//! Account state machine.
//!
//! Verification (`Pending -> Verified`) and payment (`Unpaid -> Paid`) are
//! one-way. `Locked` and `Deactivated` are flags layered on top: a locked user
//! gets back in through password reset, a deactivated one only through an admin.

use serde::Serialize;
use utoipa::ToSchema;

use super::models::User;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verification {
    Pending,
    Verified,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Payment {
    Unpaid,
    Paid,
}

/// Snapshot of where a user sits in the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct AccountStatus {
    pub verification: Verification,
    pub payment: Payment,
    pub locked: bool,
    pub deactivated: bool,
}

impl User {
    #[must_use]
    pub fn status(&self) -> AccountStatus {
        AccountStatus {
            verification: if self.email_verified {
                Verification::Verified
            } else {
                Verification::Pending
            },
            payment: if self.is_paid() {
                Payment::Paid
            } else {
                Payment::Unpaid
            },
            locked: self.locked,
            deactivated: self.deactivated,
        }
    }

    /// Paid once a registration transaction is on record, or when no fee was due.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.paywall_amount == 0 || self.paywall_tx_id.is_some()
    }

    /// `Pending -> Verified`, promoting the pending identity to active.
    pub fn mark_verified(&mut self, now: i64) {
        self.email_verified = true;
        if self.active_identity().is_none() {
            if let Some(identity) = self
                .identities
                .iter_mut()
                .find(|identity| identity.is_pending())
            {
                identity.activated = now;
            }
        }
    }

    /// Count a wrong password. Returns `true` when this attempt locked the account.
    pub fn record_failed_login(&mut self, max_failed_logins: u32) -> bool {
        self.failed_login_attempts = self.failed_login_attempts.saturating_add(1);
        if !self.locked && self.failed_login_attempts >= max_failed_logins {
            self.locked = true;
            return true;
        }
        false
    }

    /// Reset the failure counter and stamp the login. Returns the previous login time.
    pub fn record_successful_login(&mut self, now: i64) -> i64 {
        self.failed_login_attempts = 0;
        std::mem::replace(&mut self.last_login_time, now)
    }

    /// `Locked -> Verified` after a password reset or an admin unlock.
    pub fn unlock(&mut self) {
        self.locked = false;
        self.failed_login_attempts = 0;
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn deactivate(&mut self) {
        self.deactivated = true;
    }

    pub fn reactivate(&mut self) {
        self.deactivated = false;
    }

    /// `Unpaid -> Paid`. An existing transaction id is never replaced.
    pub fn mark_paid(&mut self, txid: &str) -> bool {
        if self.paywall_tx_id.is_some() {
            return false;
        }
        self.paywall_tx_id = Some(txid.to_string());
        self.paywall_poll_expiry = 0;
        true
    }

    /// Gate for credential checks that have already matched the password.
    ///
    /// # Errors
    /// [`Error::UserDeactivated`] or [`Error::EmailNotVerified`].
    pub fn ensure_can_login(&self) -> Result<()> {
        if self.deactivated {
            return Err(Error::UserDeactivated);
        }
        if !self.email_verified {
            return Err(Error::EmailNotVerified);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn pending() -> User {
        User::new_pending(
            "a@x.com".to_string(),
            "alice".to_string(),
            String::new(),
            "cd".repeat(32),
            10,
        )
    }

    #[test]
    fn new_user_starts_pending_unpaid_when_fee_is_due() {
        let mut user = pending();
        user.paywall_amount = 10_000;
        let status = user.status();
        assert_eq!(status.verification, Verification::Pending);
        assert_eq!(status.payment, Payment::Unpaid);
        assert!(!status.locked && !status.deactivated);
    }

    #[test]
    fn zero_fee_counts_as_paid() {
        assert_eq!(pending().status().payment, Payment::Paid);
    }

    #[test]
    fn verification_activates_pending_identity() {
        let mut user = pending();
        user.mark_verified(99);
        assert!(user.email_verified);
        assert_eq!(user.active_identity().map(|identity| identity.activated), Some(99));
    }

    #[test]
    fn lock_triggers_at_threshold_once() {
        let mut user = pending();
        for _ in 0..4 {
            assert!(!user.record_failed_login(5));
        }
        assert!(user.record_failed_login(5));
        assert!(user.locked);
        assert!(!user.record_failed_login(5));
        assert_eq!(user.failed_login_attempts, 6);
    }

    #[test]
    fn successful_login_resets_counter_and_returns_previous_time() {
        let mut user = pending();
        user.last_login_time = 5;
        user.failed_login_attempts = 3;
        assert_eq!(user.record_successful_login(50), 5);
        assert_eq!(user.failed_login_attempts, 0);
        assert_eq!(user.last_login_time, 50);
    }

    #[test]
    fn payment_is_monotonic() {
        let mut user = pending();
        user.paywall_amount = 1;
        assert!(user.mark_paid("tx-1"));
        assert!(!user.mark_paid("tx-2"));
        assert_eq!(user.paywall_tx_id.as_deref(), Some("tx-1"));
        assert!(user.is_paid());
    }

    #[test]
    fn login_gate_orders_deactivated_before_unverified() {
        let mut user = pending();
        assert_eq!(
            user.ensure_can_login().err().map(|e| e.code()),
            Some(ErrorCode::EmailNotVerified)
        );
        user.deactivate();
        assert_eq!(
            user.ensure_can_login().err().map(|e| e.code()),
            Some(ErrorCode::UserDeactivated)
        );
        user.reactivate();
        user.mark_verified(1);
        assert!(user.ensure_can_login().is_ok());
    }
}
