//! Auth handlers and supporting modules.
//!
//! This module owns credential hashing, session persistence, the session
//! cookie, and rate limiting for the `/api/auth/*` routes.
//!
//! ## Session Tokens
//!
//! Tokens are 32 random bytes, base64url encoded without padding. The store
//! only ever sees the SHA-256 hash, so a leaked `user_sessions` table cannot be
//! replayed as cookies.
//!
//! ## Rate Limiting
//!
//! - **login / signup:** 5 requests per minute per client.
//! - **logout:** 20 requests per minute per client.
//! - **session:** 100 requests per minute per client.

pub mod login;
pub mod logout;
pub mod memory;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod sessions;
pub mod signup;
pub mod state;
pub mod storage;
pub mod types;
pub(crate) mod utils;

pub use memory::MemoryStore;
pub use rate_limit::{CounterStore, MemoryCounterStore, RateLimitConfig, RateLimiter};
pub use session::current_user_id;
pub use sessions::SessionManager;
pub use state::{AuthConfig, AuthState, Environment};
pub use storage::{PgStore, SessionStore, UserStore};
