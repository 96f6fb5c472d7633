use crate::api::handlers::auth::{PgStore, SessionManager};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub dsn: SecretString,
}

/// Delete expired sessions once.
/// # Errors
/// Returns an error if the database is unreachable or the delete fails.
pub async fn execute(args: Args) -> Result<()> {
    let store = Arc::new(PgStore::connect(args.dsn.expose_secret()).await?);
    let removed = SessionManager::new(store).cleanup_expired_sessions().await?;
    info!(removed, "expired sessions removed");
    println!("{removed}");
    Ok(())
}
