//! Admin action processor.
//!
//! Admin mutations bypass self-service gates but not account invariants. The
//! role check comes first in every entry point, so a rejected caller causes no
//! writes at all. Every mutation records who did it and why in the target's
//! admin log.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::account::{
    locks::UserLocks,
    models::{AdminLogEntry, TokenPurpose, User},
    store::UserStore,
    tokens,
};
use crate::error::{Error, Result};
use crate::paywall::{PaymentGate, PaymentStatus};

pub mod filter;

pub use filter::{decode_cursor, encode_cursor, UserFilter, PAGE_SIZE};

/// Transaction id recorded when an admin waives the registration fee.
pub const CLEARED_BY_ADMIN_TX: &str = "cleared_by_admin";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ManageAction {
    ExpireNewUserVerification,
    ExpireUpdateKeyVerification,
    ExpireResetPasswordVerification,
    ClearUserPaywall,
    Lock,
    Unlock,
    Deactivate,
    Reactivate,
    /// Add `credits_delta` (may be negative) to the user's proposal credits.
    AdjustCredits,
}

impl ManageAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExpireNewUserVerification => "expire_new_user_verification",
            Self::ExpireUpdateKeyVerification => "expire_update_key_verification",
            Self::ExpireResetPasswordVerification => "expire_reset_password_verification",
            Self::ClearUserPaywall => "clear_user_paywall",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Deactivate => "deactivate",
            Self::Reactivate => "reactivate",
            Self::AdjustCredits => "adjust_credits",
        }
    }
}

/// One page of a filtered user listing.
#[derive(Clone, Debug)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total_matches: usize,
    pub next_cursor: Option<String>,
}

/// Reject non-admin actors.
///
/// # Errors
/// [`Error::Unauthorized`] unless `actor.admin` is set.
pub fn require_admin(actor: &User) -> Result<()> {
    if actor.admin && !actor.deactivated {
        Ok(())
    } else {
        Err(Error::Unauthorized)
    }
}

pub struct AdminProcessor {
    users: Arc<dyn UserStore>,
    locks: UserLocks,
    paywall: Arc<PaymentGate>,
}

impl AdminProcessor {
    #[must_use]
    pub fn new(users: Arc<dyn UserStore>, locks: UserLocks, paywall: Arc<PaymentGate>) -> Self {
        Self {
            users,
            locks,
            paywall,
        }
    }

    /// Apply one admin action to `target`.
    ///
    /// # Errors
    /// [`Error::Unauthorized`] before anything else is looked at;
    /// [`Error::InvalidInput`] for a missing reason or an action that would
    /// break an invariant; [`Error::UserNotFound`].
    #[instrument(skip(self, actor, reason), fields(admin_id = %actor.id, action = action.as_str()))]
    pub async fn manage_user(
        &self,
        actor: &User,
        target: Uuid,
        action: ManageAction,
        credits_delta: i64,
        reason: &str,
        now: i64,
    ) -> Result<User> {
        require_admin(actor)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::InvalidInput("a reason is required".to_string()));
        }
        if actor.id == target && matches!(action, ManageAction::Deactivate | ManageAction::Lock) {
            return Err(Error::InvalidInput(format!(
                "admins cannot {} themselves",
                action.as_str()
            )));
        }

        let _guard = self.locks.lock(target).await;
        let mut user = self
            .users
            .get_by_id(target)
            .await
            .map_err(Error::Store)?
            .ok_or(Error::UserNotFound)?;

        match action {
            ManageAction::ExpireNewUserVerification => {
                tokens::expire(&mut user, TokenPurpose::NewUser, now);
            }
            ManageAction::ExpireUpdateKeyVerification => {
                tokens::expire(&mut user, TokenPurpose::UpdateKey, now);
            }
            ManageAction::ExpireResetPasswordVerification => {
                tokens::expire(&mut user, TokenPurpose::ResetPassword, now);
            }
            ManageAction::ClearUserPaywall => {
                user.mark_paid(CLEARED_BY_ADMIN_TX);
                user.paywall_poll_expiry = 0;
            }
            ManageAction::Lock => user.lock(),
            ManageAction::Unlock => user.unlock(),
            ManageAction::Deactivate => user.deactivate(),
            ManageAction::Reactivate => {
                if !user.deactivated {
                    return Err(Error::InvalidInput("user is not deactivated".to_string()));
                }
                user.reactivate();
            }
            ManageAction::AdjustCredits => {
                user.proposal_credits = adjust_credits(user.proposal_credits, credits_delta)?;
            }
        }

        user.admin_log.push(AdminLogEntry {
            admin_id: actor.id,
            action: action.as_str().to_string(),
            reason: reason.to_string(),
            timestamp: now,
        });
        self.users.update(&user).await?;
        info!(user_id = %user.id, "admin action applied");
        Ok(user)
    }

    /// Filtered, id-ordered listing. `cursor` continues after the last id of
    /// the previous page.
    ///
    /// # Errors
    /// [`Error::Unauthorized`] or [`Error::InvalidInput`] for a bad cursor.
    pub async fn list_users(
        &self,
        actor: &User,
        filter: UserFilter,
        cursor: Option<&str>,
    ) -> Result<UserPage> {
        require_admin(actor)?;
        let after = cursor.map(decode_cursor).transpose()?;
        let filter = filter.normalized();

        let matching: Vec<User> = self
            .users
            .list()
            .await
            .map_err(Error::Store)?
            .into_iter()
            .filter(|user| filter.matches(user))
            .collect();
        let total_matches = matching.len();

        let mut page: Vec<User> = matching
            .into_iter()
            .filter(|user| after.map_or(true, |after| user.id > after))
            .take(PAGE_SIZE + 1)
            .collect();
        let next_cursor = if page.len() > PAGE_SIZE {
            page.truncate(PAGE_SIZE);
            page.last().map(|user| encode_cursor(user.id))
        } else {
            None
        };

        Ok(UserPage {
            users: page,
            total_matches,
            next_cursor,
        })
    }

    /// Forced payment rescan for `target`.
    ///
    /// # Errors
    /// [`Error::Unauthorized`], [`Error::UserNotFound`] or [`Error::PaymentNotFound`].
    pub async fn rescan_payments(&self, actor: &User, target: Uuid) -> Result<PaymentStatus> {
        require_admin(actor)?;
        self.paywall.rescan(target).await
    }
}

fn adjust_credits(current: u64, delta: i64) -> Result<u64> {
    let adjusted = if delta >= 0 {
        current.checked_add(delta.unsigned_abs())
    } else {
        current.checked_sub(delta.unsigned_abs())
    };
    adjusted.ok_or_else(|| Error::InvalidInput("credits cannot go below zero".to_string()))
}
