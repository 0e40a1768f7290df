//! Password hashing and verification (§9 Open Question #2: the source's
//! placeholder verifier accepting only a hard-coded password is replaced
//! with a real Argon2id check; there is no insecure fallback path).

use argon2::password_hash::{Salt, SaltString};
use argon2::{password_hash, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use tokio::task;

use dbgateway_core::{Error, Result};

pub async fn hash(password: String) -> Result<String> {
    task::spawn_blocking(move || {
        let salt: [u8; Salt::RECOMMENDED_LENGTH] = rand::random();
        let salt = SaltString::encode_b64(&salt).expect("generated salt is the recommended length");

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| Error::Command(format!("failed to hash password: {e}")))
    })
    .await
    .map_err(|e| Error::Command(format!("panic while hashing password: {e}")))?
}

/// Verifies `password` against a stored Argon2 hash. Returns `Ok(false)`
/// for a plain mismatch and `Err` only when the stored hash itself is
/// malformed (a data integrity bug, not a wrong password).
pub async fn verify(password: String, hash: String) -> Result<bool> {
    task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash)
            .map_err(|e| Error::Command(format!("stored password hash is invalid: {e}")))?;

        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Command(format!("password verification failed: {e}"))),
        }
    })
    .await
    .map_err(|e| Error::Command(format!("panic while verifying password: {e}")))?
}
