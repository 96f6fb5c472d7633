//! Auth state and configuration shared by handlers and pipeline middlewares.

use std::{str::FromStr, sync::Arc};

use super::{
    rate_limit::{CounterStore, RateLimitConfig, RateLimits},
    sessions::{SessionManager, DEFAULT_REMEMBER_TTL_SECONDS, DEFAULT_SESSION_TTL_SECONDS},
    storage::{SessionStore, UserStore},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("invalid environment: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    environment: Environment,
    session_ttl_seconds: i64,
    remember_ttl_seconds: i64,
    rate_limits: RateLimitConfig,
}

impl AuthConfig {
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_ttl_seconds: DEFAULT_REMEMBER_TTL_SECONDS,
            rate_limits: RateLimitConfig::default(),
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_rate_limits(mut self, rate_limits: RateLimitConfig) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn remember_ttl_seconds(&self) -> i64 {
        self.remember_ttl_seconds
    }

    #[must_use]
    pub fn rate_limits(&self) -> RateLimitConfig {
        self.rate_limits
    }

    /// `Secure` is only set in production so local HTTP development keeps working.
    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.environment == Environment::Production
    }
}

pub struct AuthState {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    sessions: SessionManager,
    rate_limits: RateLimits,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        let session_manager = SessionManager::new(sessions)
            .with_ttl_seconds(config.session_ttl_seconds())
            .with_remember_ttl_seconds(config.remember_ttl_seconds());
        let rate_limits = RateLimits::new(config.rate_limits(), counters);
        Self {
            config,
            users,
            sessions: session_manager,
            rate_limits,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }
}
