use crate::api::{
    self,
    handlers::auth::{
        AuthConfig, AuthState, Environment, MemoryCounterStore, MemoryStore, PgStore,
        RateLimitConfig, SessionStore, UserStore,
    },
};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub environment: Environment,
    pub session_ttl_seconds: i64,
    pub remember_ttl_seconds: i64,
    pub sweep_seconds: u64,
    pub allowed_origin: Option<String>,
    pub rate_limits: RateLimitConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let (users, sessions): (Arc<dyn UserStore>, Arc<dyn SessionStore>) = match &args.dsn {
        Some(dsn) => {
            let store = Arc::new(PgStore::connect(dsn.expose_secret()).await?);
            info!("using PostgreSQL store");
            (store.clone(), store)
        }
        None => {
            warn!("no --dsn given, users and sessions are kept in memory");
            let store = Arc::new(MemoryStore::new());
            (store.clone(), store)
        }
    };

    let auth_config = AuthConfig::new(args.environment)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_remember_ttl_seconds(args.remember_ttl_seconds)
        .with_rate_limits(args.rate_limits);

    info!(
        environment = args.environment.as_str(),
        "starting {}",
        env!("CARGO_PKG_NAME")
    );

    let auth_state = Arc::new(AuthState::new(
        auth_config,
        users,
        sessions,
        Arc::new(MemoryCounterStore::new()),
    ));

    let sweep_interval = (args.sweep_seconds > 0).then(|| Duration::from_secs(args.sweep_seconds));

    api::new(args.port, auth_state, args.allowed_origin, sweep_interval).await
}
