//! Persistence for users and sessions.
//!
//! Handlers and the session manager only see the [`SessionStore`] and
//! [`UserStore`] traits. [`PgStore`] is the production backend; the in-memory
//! backend lives in `memory.rs`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use tracing::Instrument;

use super::utils::is_unique_violation;

const SCHEMA: &str = include_str!("../../../../sql/schema.sql");

/// Session row to persist. Only the token hash is ever stored.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub session_hash: Vec<u8>,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionRecord {
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a session insert. A hash collision never overwrites the existing row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

#[derive(Clone, Debug)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

/// Outcome when attempting to create a new user.
#[derive(Debug)]
pub enum CreateUserOutcome {
    Created(UserRecord),
    Conflict,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: NewSession) -> Result<InsertOutcome>;

    async fn find(&self, session_hash: &[u8]) -> Result<Option<SessionRecord>>;

    /// Returns the number of removed rows (0 when the session was already gone).
    async fn delete(&self, session_hash: &[u8]) -> Result<u64>;

    async fn delete_for_user(&self, user_id: i64) -> Result<u64>;

    /// Remove every session whose expiry is at or before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Lookup by normalized email.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>>;

    async fn create(&self, user: NewUser) -> Result<CreateUserOutcome>;
}

/// `PostgreSQL` backend for both users and sessions.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database and make sure the schema exists.
    ///
    /// # Errors
    /// Returns an error if the connection or the schema setup fails.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn)
            .await
            .context("Failed to connect to database")?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Apply `sql/schema.sql`. Every statement is idempotent.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn migrate(&self) -> Result<()> {
        let span = tracing::info_span!("db.query", db.system = "postgresql", db.operation = "DDL");
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to apply schema")?;
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        password_hash: row.get("password_hash"),
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert(&self, session: NewSession) -> Result<InsertOutcome> {
        let query = r"
            INSERT INTO user_sessions (session_hash, user_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_hash) DO NOTHING
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&session.session_hash)
            .bind(session.user_id)
            .bind(session.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session")?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Conflict)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn find(&self, session_hash: &[u8]) -> Result<Option<SessionRecord>> {
        // Expiry is judged by the caller so that expired rows can be removed on read.
        let query = "SELECT user_id, expires_at FROM user_sessions WHERE session_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(session_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session")?;

        Ok(row.map(|row| SessionRecord {
            user_id: row.get("user_id"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn delete(&self, session_hash: &[u8]) -> Result<u64> {
        let query = "DELETE FROM user_sessions WHERE session_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(session_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete session")?;
        Ok(result.rows_affected())
    }

    async fn delete_for_user(&self, user_id: i64) -> Result<u64> {
        let query = "DELETE FROM user_sessions WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete user sessions")?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM user_sessions WHERE expires_at <= $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete expired sessions")?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        let span = tracing::info_span!("db.query", db.system = "postgresql", db.operation = "SELECT");
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("database ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let query = "SELECT id, email, name, password_hash FROM users WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        let query = "SELECT id, email, name, password_hash FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn create(&self, user: NewUser) -> Result<CreateUserOutcome> {
        let query = r"
            INSERT INTO users (email, name, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, email, name, password_hash
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&user.email)
            .bind(&user.name)
            .bind(&user.password_hash)
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(row) => Ok(CreateUserOutcome::Created(user_from_row(&row))),
            // Lost the race against a concurrent signup with the same email.
            Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::Conflict),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }
}
