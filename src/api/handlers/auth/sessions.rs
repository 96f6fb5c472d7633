//! Session lifecycle on top of a [`SessionStore`].
//!
//! Tokens are generated here, hashed, and handed back once for the cookie.
//! A session is valid while its expiry lies strictly in the future; the first
//! lookup that finds it expired removes it.

use anyhow::{anyhow, Result};
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{
    storage::{InsertOutcome, NewSession, SessionStore},
    utils::{generate_session_token, hash_session_token},
};

const INSERT_ATTEMPTS: usize = 3;

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
pub const DEFAULT_REMEMBER_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
/// Upper bound accepted for either lifetime: ten years.
pub const MAX_SESSION_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ttl_seconds: i64,
    remember_ttl_seconds: i64,
    token_source: fn() -> Result<String>,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_ttl_seconds: DEFAULT_REMEMBER_TTL_SECONDS,
            token_source: generate_session_token,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_ttl_seconds = seconds;
        self
    }

    #[cfg(test)]
    fn with_token_source(mut self, source: fn() -> Result<String>) -> Self {
        self.token_source = source;
        self
    }

    /// Lifetime in seconds for a session, also used as the cookie `Max-Age`.
    #[must_use]
    pub fn ttl_seconds(&self, remember: bool) -> i64 {
        if remember {
            self.remember_ttl_seconds
        } else {
            self.ttl_seconds
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Create a session for `user_id` and return the raw token.
    ///
    /// # Errors
    /// Returns an error if the lifetime does not fit a timestamp, if the store
    /// fails, or if every attempt collided with an existing token.
    pub async fn create_session(&self, user_id: i64, remember: bool) -> Result<String> {
        let ttl_seconds = self.ttl_seconds(remember);
        let expires_at = TimeDelta::try_seconds(ttl_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| anyhow!("session lifetime out of range: {ttl_seconds}s"))?;

        for _ in 0..INSERT_ATTEMPTS {
            let token = (self.token_source)()?;
            let session = NewSession {
                session_hash: hash_session_token(&token),
                user_id,
                expires_at,
            };
            match self.store.insert(session).await? {
                InsertOutcome::Inserted => {
                    debug!(user_id, remember, "session created");
                    return Ok(token);
                }
                InsertOutcome::Conflict => warn!("session token collision, retrying"),
            }
        }

        Err(anyhow!("failed to generate unique session token"))
    }

    /// Resolve a token into its user id.
    ///
    /// # Errors
    /// Returns an error only when the lookup itself fails. Removing an expired
    /// row is best effort.
    pub async fn validate_session(&self, token: &str) -> Result<Option<i64>> {
        let session_hash = hash_session_token(token);
        let Some(record) = self.store.find(&session_hash).await? else {
            return Ok(None);
        };

        if record.expires_at <= Utc::now() {
            if let Err(err) = self.store.delete(&session_hash).await {
                error!("Failed to delete expired session: {err}");
            }
            return Ok(None);
        }

        Ok(Some(record.user_id))
    }

    /// Delete the session behind `token`. Missing sessions and store failures are ignored.
    pub async fn delete_session(&self, token: &str) {
        let session_hash = hash_session_token(token);
        if let Err(err) = self.store.delete(&session_hash).await {
            error!("Failed to delete session: {err}");
        }
    }

    /// Invalidate every session a user holds, e.g. after a password change.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn delete_all_sessions_for_user(&self, user_id: i64) -> Result<u64> {
        let removed = self.store.delete_for_user(user_id).await?;
        debug!(user_id, removed, "sessions invalidated");
        Ok(removed)
    }

    /// Remove every expired session.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64> {
        self.store.delete_expired(Utc::now()).await
    }
}
