//! # Streamauth (Session & Authentication Core)
//!
//! `streamauth` owns the user session lifecycle for the streaming frontend:
//! signup, login, logout and "who am I", plus the request pipeline every other
//! endpoint wraps itself in.
//!
//! ## Sessions
//!
//! Sessions are opaque, high-entropy tokens carried in the `session_token`
//! cookie. Only a SHA-256 hash of the token is stored. A session is valid while
//! its absolute expiry lies strictly in the future; expired rows are removed the
//! first time a lookup finds them, and by a periodic sweep.
//!
//! - **Default duration:** 12 hours.
//! - **Remember me:** 7 days.
//!
//! ## Rate Limiting
//!
//! Every auth route is wrapped in a fixed-window limiter keyed by client
//! address. Limits are per route class (login/signup, logout, session) and reset
//! at window boundaries; there is no sliding smoothing.
//!
//! ## Storage
//!
//! `PostgreSQL` is used when a DSN is configured. Without one the service runs
//! on an in-memory store, which is only suitable for local development.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
