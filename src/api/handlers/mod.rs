//! API handlers for the auth routes and the health probe.

pub mod auth;
pub mod health;
