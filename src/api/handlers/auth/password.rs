//! Password hashing and verification (Argon2id).
//!
//! Digests are PHC strings, so the salt and parameters travel with the hash and
//! verification never needs anything but the stored value.

use anyhow::Result;
use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use std::sync::OnceLock;

pub(crate) const MIN_PASSWORD_LEN: usize = 8;

/// Hash a password with a fresh random salt.
///
/// # Errors
/// Returns an error if Argon2 rejects the input (e.g. exceeds its length limits).
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow::anyhow!("failed to hash password"))?
        .to_string();
    Ok(hash)
}

/// Verify a password against a stored digest.
///
/// A malformed digest is treated as a mismatch so corrupt rows behave like a
/// wrong password instead of a server error.
#[must_use]
pub fn verify_password(password: &str, digest: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(digest) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Run a verification against a decoy digest and discard the result.
///
/// Used when the email is unknown so the response time matches a wrong password.
pub fn dummy_verify(password: &str) {
    static DECOY: OnceLock<Option<String>> = OnceLock::new();
    let decoy = DECOY.get_or_init(|| hash_password("streamauth-decoy-password").ok());
    if let Some(digest) = decoy {
        let _ = verify_password(password, digest);
    }
}
