// src/core/auth.rs

//! Credential checks for the login handshake and password changes.
//!
//! Stored credentials are opaque strings. A value in Argon2 PHC form
//! (`$argon2id$...`) is verified with Argon2; anything else is compared as-is.

use crate::core::RelayError;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use std::fmt::Debug;

const ARGON2_PREFIX: &str = "$argon2";

/// Decides whether a presented password matches a stored credential, and how
/// a new password is stored.
pub trait CredentialPolicy: Send + Sync + Debug {
    fn verify(&self, stored: &str, presented: &str) -> bool;

    fn store(&self, new_password: &str) -> Result<String, RelayError>;
}

/// The default policy: verifies both Argon2 hashes and legacy opaque values,
/// and optionally hashes new passwords.
#[derive(Debug, Clone, Default)]
pub struct DefaultCredentialPolicy {
    pub hash_new_passwords: bool,
}

impl DefaultCredentialPolicy {
    pub fn new(hash_new_passwords: bool) -> Self {
        Self { hash_new_passwords }
    }
}

impl CredentialPolicy for DefaultCredentialPolicy {
    fn verify(&self, stored: &str, presented: &str) -> bool {
        if stored.starts_with(ARGON2_PREFIX) {
            return match PasswordHash::new(stored) {
                Ok(parsed) => Argon2::default()
                    .verify_password(presented.as_bytes(), &parsed)
                    .is_ok(),
                Err(_) => false,
            };
        }
        stored == presented
    }

    fn store(&self, new_password: &str) -> Result<String, RelayError> {
        if !self.hash_new_passwords {
            return Ok(new_password.to_string());
        }
        hash_password(new_password)
    }
}

/// Hashes `password` into an Argon2 PHC string with a fresh salt.
pub fn hash_password(password: &str) -> Result<String, RelayError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| RelayError::Internal(format!("password hashing failed: {e}")))
}
