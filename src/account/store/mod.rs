//! Credential store contract.
//!
//! The store only promises per-record atomicity: a single `update` replaces a
//! whole user at once. Callers serialize read-modify-write cycles on the same
//! user through [`crate::account::locks::UserLocks`].

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::models::User;

pub mod memory;
pub mod postgres;

pub use memory::MemoryUserStore;
pub use postgres::PgUserStore;

/// Column whose uniqueness a write violated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    Username,
    PublicKey,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {0:?}")]
    Duplicate(UniqueField),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user; email, username and every public key must be unused.
    async fn insert(&self, user: &User) -> Result<(), StoreError>;

    /// Replace an existing user record as a whole.
    async fn update(&self, user: &User) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    /// Lookup by normalized email.
    async fn get_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    async fn get_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;

    /// Lookup by any public key the user ever registered.
    async fn get_by_public_key(&self, public_key: &str) -> anyhow::Result<Option<User>>;

    /// Every user ordered by id.
    async fn list(&self) -> anyhow::Result<Vec<User>>;

    /// Users that still owe the registration fee and whose poll window is open at `now`.
    async fn unpaid_users(&self, now: i64) -> anyhow::Result<Vec<User>>;

    async fn ping(&self) -> anyhow::Result<()>;
}
