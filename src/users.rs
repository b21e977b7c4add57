//! User Record Manager: an upsert-only record that anchors a user's
//! existence in the quota domain. Never deletes; created lazily the
//! first time any other manager needs to record activity for a
//! `user_id` it has not seen before.

use std::sync::Arc;

use chrono::Utc;

use crate::error::CoreResult;
use crate::model::User;
use crate::store::{collections, Store};

#[derive(Clone)]
pub struct UserManager {
    store: Arc<dyn Store>,
}

impl UserManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Upserts the user document, setting `created_at` only on first
    /// write (merge semantics leave it untouched on subsequent calls).
    pub async fn ensure(&self, user_id: &str, email: Option<&str>) -> CoreResult<User> {
        let now = Utc::now();
        let existing = self.store.get(collections::USERS, user_id).await?;

        let user = match existing {
            Some(doc) => {
                let mut user: User = doc.decode()?;
                if email.is_some() {
                    user.email = email.map(str::to_string);
                }
                user.updated_at = now;
                user
            }
            None => User {
                id: user_id.to_string(),
                email: email.map(str::to_string),
                created_at: now,
                updated_at: now,
            },
        };

        self.store
            .set(collections::USERS, user_id, crate::error::encode(&user)?, false)
            .await?;

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[tokio::test]
    async fn ensure_creates_user_on_first_call() {
        let manager = UserManager::new(Arc::new(MemoryStore::new()));
        let user = manager.ensure("u1", Some("a@example.com")).await.unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
    }

    #[tokio::test]
    async fn ensure_preserves_created_at_on_repeat_calls() {
        let manager = UserManager::new(Arc::new(MemoryStore::new()));
        let first = manager.ensure("u1", None).await.unwrap();
        let second = manager.ensure("u1", Some("b@example.com")).await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.email.as_deref(), Some("b@example.com"));
    }
}
