//! In-process backend for users and sessions.
//!
//! Used when no DSN is configured and by the test suites. State is lost on
//! restart and is not shared between instances.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{hash_map::Entry, HashMap};
use tokio::sync::RwLock;

use super::storage::{
    CreateUserOutcome, InsertOutcome, NewSession, NewUser, SessionRecord, SessionStore,
    UserRecord, UserStore,
};

#[derive(Debug, Default)]
struct Users {
    next_id: i64,
    by_id: HashMap<i64, UserRecord>,
    by_email: HashMap<String, i64>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<Users>,
    sessions: RwLock<HashMap<Vec<u8>, SessionRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a user row without touching its sessions.
    ///
    /// Mirrors an out-of-band account removal that leaves dangling sessions.
    pub async fn remove_user(&self, id: i64) -> bool {
        let mut users = self.users.write().await;
        match users.by_id.remove(&id) {
            Some(user) => {
                users.by_email.remove(&user.email);
                true
            }
            None => false,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: NewSession) -> Result<InsertOutcome> {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(session.session_hash) {
            Entry::Occupied(_) => Ok(InsertOutcome::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(SessionRecord {
                    user_id: session.user_id,
                    expires_at: session.expires_at,
                });
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn find(&self, session_hash: &[u8]) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(session_hash).cloned())
    }

    async fn delete(&self, session_hash: &[u8]) -> Result<u64> {
        let removed = self.sessions.write().await.remove(session_hash);
        Ok(u64::from(removed.is_some()))
    }

    async fn delete_for_user(&self, user_id: i64) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| record.user_id != user_id);
        Ok((before - sessions.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, record| record.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let users = self.users.read().await;
        Ok(users
            .by_email
            .get(email)
            .and_then(|id| users.by_id.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.by_id.get(&id).cloned())
    }

    async fn create(&self, user: NewUser) -> Result<CreateUserOutcome> {
        let mut users = self.users.write().await;
        if users.by_email.contains_key(&user.email) {
            return Ok(CreateUserOutcome::Conflict);
        }
        users.next_id += 1;
        let record = UserRecord {
            id: users.next_id,
            email: user.email,
            name: user.name,
            password_hash: user.password_hash,
        };
        users.by_email.insert(record.email.clone(), record.id);
        users.by_id.insert(record.id, record.clone());
        Ok(CreateUserOutcome::Created(record))
    }
}
