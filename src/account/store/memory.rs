//! In-memory credential store for local runs and tests.

use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreError, UniqueField, UserStore};
use crate::account::models::User;

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn conflict(existing: &HashMap<Uuid, User>, candidate: &User) -> Option<UniqueField> {
    for other in existing.values().filter(|other| other.id != candidate.id) {
        if other.email == candidate.email {
            return Some(UniqueField::Email);
        }
        if other.username == candidate.username {
            return Some(UniqueField::Username);
        }
        if candidate
            .identities
            .iter()
            .any(|identity| other.has_public_key(&identity.public_key))
        {
            return Some(UniqueField::PublicKey);
        }
    }
    None
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(StoreError::Backend(anyhow!("user {} already exists", user.id)));
        }
        if let Some(field) = conflict(&users, user) {
            return Err(StoreError::Duplicate(field));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Err(StoreError::Backend(anyhow!("user {} not found", user.id)));
        }
        if let Some(field) = conflict(&users, user) {
            return Err(StoreError::Duplicate(field));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn get_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn get_by_public_key(&self, public_key: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.has_public_key(public_key))
            .cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }

    async fn unpaid_users(&self, now: i64) -> anyhow::Result<Vec<User>> {
        let mut users: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|user| !user.is_paid() && user.paywall_poll_expiry > now)
            .cloned()
            .collect();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
