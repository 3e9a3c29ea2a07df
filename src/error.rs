//! Error taxonomy shared by the account, session, payment and admin workflows.
//!
//! Every variant maps to a stable [`ErrorCode`]. The HTTP layer turns errors into
//! `{"error_code": ..., "error_context": [...]}` replies; store and backend
//! failures collapse to `internal` so no backend detail reaches the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::account::store::{StoreError, UniqueField};

/// Machine-readable code carried by every error reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    InvalidCredentials,
    NotLoggedIn,
    Unauthorized,
    DuplicateEmail,
    DuplicateUsername,
    DuplicatePublicKey,
    MalformedEmail,
    MalformedUsername,
    MalformedPassword,
    InvalidPublicKey,
    VerificationTokenInvalid,
    VerificationTokenExpired,
    VerificationTokenUnexpired,
    UserLocked,
    UserDeactivated,
    EmailNotVerified,
    UserNotFound,
    PaymentNotFound,
    CsrfTokenInvalid,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::InvalidCredentials => "invalid_credentials",
            Self::NotLoggedIn => "not_logged_in",
            Self::Unauthorized => "unauthorized",
            Self::DuplicateEmail => "duplicate_email",
            Self::DuplicateUsername => "duplicate_username",
            Self::DuplicatePublicKey => "duplicate_public_key",
            Self::MalformedEmail => "malformed_email",
            Self::MalformedUsername => "malformed_username",
            Self::MalformedPassword => "malformed_password",
            Self::InvalidPublicKey => "invalid_public_key",
            Self::VerificationTokenInvalid => "verification_token_invalid",
            Self::VerificationTokenExpired => "verification_token_expired",
            Self::VerificationTokenUnexpired => "verification_token_unexpired",
            Self::UserLocked => "user_locked",
            Self::UserDeactivated => "user_deactivated",
            Self::EmailNotVerified => "email_not_verified",
            Self::UserNotFound => "user_not_found",
            Self::PaymentNotFound => "payment_not_found",
            Self::CsrfTokenInvalid => "csrf_token_invalid",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Missing or malformed session cookie; only used while resolving sessions.
    #[error("no session")]
    NoSession,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("unauthorized")]
    Unauthorized,
    #[error("email already registered")]
    DuplicateEmail,
    #[error("username already taken")]
    DuplicateUsername,
    #[error("public key already in use")]
    DuplicatePublicKey,
    #[error("malformed email")]
    MalformedEmail,
    #[error("malformed username: {0}")]
    MalformedUsername(String),
    #[error("malformed password: {0}")]
    MalformedPassword(String),
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("verification token invalid")]
    VerificationTokenInvalid,
    #[error("verification token expired")]
    VerificationTokenExpired,
    #[error("verification token has not expired yet")]
    VerificationTokenUnexpired,
    #[error("user locked")]
    UserLocked,
    #[error("user deactivated")]
    UserDeactivated,
    #[error("email not verified")]
    EmailNotVerified,
    #[error("user not found")]
    UserNotFound,
    #[error("no qualifying payment found")]
    PaymentNotFound,
    #[error("anti-forgery token missing or invalid")]
    CsrfTokenInvalid,
    #[error("session store failure: {0:#}")]
    SessionStore(anyhow::Error),
    #[error("credential store failure: {0:#}")]
    Store(anyhow::Error),
    #[error("external service failure: {0:#}")]
    External(anyhow::Error),
    #[error("internal failure: {0:#}")]
    Internal(anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::InvalidCredentials => ErrorCode::InvalidCredentials,
            Self::NoSession | Self::NotLoggedIn => ErrorCode::NotLoggedIn,
            Self::Unauthorized => ErrorCode::Unauthorized,
            Self::DuplicateEmail => ErrorCode::DuplicateEmail,
            Self::DuplicateUsername => ErrorCode::DuplicateUsername,
            Self::DuplicatePublicKey => ErrorCode::DuplicatePublicKey,
            Self::MalformedEmail => ErrorCode::MalformedEmail,
            Self::MalformedUsername(_) => ErrorCode::MalformedUsername,
            Self::MalformedPassword(_) => ErrorCode::MalformedPassword,
            Self::InvalidPublicKey => ErrorCode::InvalidPublicKey,
            Self::VerificationTokenInvalid => ErrorCode::VerificationTokenInvalid,
            Self::VerificationTokenExpired => ErrorCode::VerificationTokenExpired,
            Self::VerificationTokenUnexpired => ErrorCode::VerificationTokenUnexpired,
            Self::UserLocked => ErrorCode::UserLocked,
            Self::UserDeactivated => ErrorCode::UserDeactivated,
            Self::EmailNotVerified => ErrorCode::EmailNotVerified,
            Self::UserNotFound => ErrorCode::UserNotFound,
            Self::PaymentNotFound => ErrorCode::PaymentNotFound,
            Self::CsrfTokenInvalid => ErrorCode::CsrfTokenInvalid,
            Self::SessionStore(_) | Self::Store(_) | Self::External(_) | Self::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Free-text context safe to hand back to the caller.
    #[must_use]
    pub fn context(&self) -> Vec<String> {
        match self {
            Self::InvalidInput(detail)
            | Self::MalformedUsername(detail)
            | Self::MalformedPassword(detail) => vec![detail.clone()],
            _ => Vec::new(),
        }
    }

    /// Whether the error hides a backend failure and must be logged server-side.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self.code(), ErrorCode::Internal)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(UniqueField::Email) => Self::DuplicateEmail,
            StoreError::Duplicate(UniqueField::Username) => Self::DuplicateUsername,
            StoreError::Duplicate(UniqueField::PublicKey) => Self::DuplicatePublicKey,
            StoreError::Backend(err) => Self::Store(err),
        }
    }
}
