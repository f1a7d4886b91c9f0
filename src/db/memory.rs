//! In-process [`UserStore`] with the same semantics as the Postgres one.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::errors::{UserStoreError, UserStoreResult};
use super::repository::UserStore;
use crate::auth::models::{User, UserId};
use crate::clock::SharedClock;

/// User store held in memory, keyed by user id
#[derive(Clone)]
pub struct MemoryUserStore {
    users: Arc<Mutex<HashMap<UserId, User>>>,
    clock: SharedClock,
}

impl MemoryUserStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            users: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.lock().await.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(
        &self,
        email: &str,
        password_hash: &str,
        verification_token_hash: &str,
    ) -> UserStoreResult<User> {
        let mut users = self.users.lock().await;
        if users.values().any(|u| u.email == email) {
            return Err(UserStoreError::DuplicateEmail);
        }

        let now = self.clock.now();
        let user = User {
            id: UserId::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            email_verified: false,
            verification_token_hash: Some(verification_token_hash.to_string()),
            verification_sent_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn by_email(&self, email: &str) -> UserStoreResult<Option<User>> {
        let users = self.users.lock().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn by_id(&self, id: UserId) -> UserStoreResult<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn by_verification_token(&self, token_hash: &str) -> UserStoreResult<Option<User>> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| {
                !u.email_verified && u.verification_token_hash.as_deref() == Some(token_hash)
            })
            .cloned())
    }

    async fn was_token_already_consumed(&self, token_hash: &str) -> UserStoreResult<bool> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .any(|u| u.email_verified && u.verification_token_hash.as_deref() == Some(token_hash)))
    }

    async fn mark_verified(&self, id: UserId) -> UserStoreResult<()> {
        let now = self.clock.now();
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(UserStoreError::NotFound)?;
        user.email_verified = true;
        user.updated_at = now;
        Ok(())
    }

    async fn update_password(&self, id: UserId, password_hash: &str) -> UserStoreResult<()> {
        let now = self.clock.now();
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(UserStoreError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = now;
        Ok(())
    }

    async fn rotate_verification_token(
        &self,
        id: UserId,
        token_hash: &str,
    ) -> UserStoreResult<()> {
        let now = self.clock.now();
        let mut users = self.users.lock().await;
        let user = users
            .get_mut(&id)
            .filter(|u| !u.email_verified)
            .ok_or(UserStoreError::NotFound)?;
        user.verification_token_hash = Some(token_hash.to_string());
        user.verification_sent_at = Some(now);
        user.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use chrono::Duration;

    fn store() -> (MemoryUserStore, ManualClock) {
        let clock = ManualClock::default();
        (MemoryUserStore::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_create_user() {
        let (store, _) = store();
        let user = store.create("a@x.com", "hash", "tok").await.unwrap();

        assert!(!user.email_verified);
        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.by_email("a@x.com").await.unwrap().map(|u| u.id),
            Some(user.id)
        );
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (store, _) = store();
        store.create("a@x.com", "hash", "tok1").await.unwrap();

        let result = store.create("a@x.com", "hash", "tok2").await;
        assert!(matches!(result, Err(UserStoreError::DuplicateEmail)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_verified_token_is_reported_consumed() {
        let (store, _) = store();
        let user = store.create("a@x.com", "hash", "tok").await.unwrap();
        store.mark_verified(user.id).await.unwrap();

        assert!(store.by_verification_token("tok").await.unwrap().is_none());
        assert!(store.was_token_already_consumed("tok").await.unwrap());
        assert!(!store.was_token_already_consumed("never").await.unwrap());
    }

    #[tokio::test]
    async fn test_rotate_verification_token_restarts_clock() {
        let (store, clock) = store();
        let user = store.create("a@x.com", "hash", "old").await.unwrap();
        clock.advance(Duration::hours(5));

        store.rotate_verification_token(user.id, "new").await.unwrap();

        let rotated = store.by_verification_token("new").await.unwrap().unwrap();
        assert_eq!(rotated.verification_sent_at, Some(clock.now()));
        assert!(store.by_verification_token("old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_after_verification_fails() {
        let (store, _) = store();
        let user = store.create("a@x.com", "hash", "tok").await.unwrap();
        store.mark_verified(user.id).await.unwrap();

        let result = store.rotate_verification_token(user.id, "new").await;
        assert!(matches!(result, Err(UserStoreError::NotFound)));
    }

    #[tokio::test]
    async fn test_update_password_unknown_user() {
        let (store, _) = store();
        let result = store.update_password(UserId::new_v4(), "hash").await;
        assert!(matches!(result, Err(UserStoreError::NotFound)));
    }
}
