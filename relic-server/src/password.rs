//! Argon2id hashing for relic passwords.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use snafu::ResultExt;

use crate::error::{PasswordHashSnafu, Result, TaskFailedSnafu};

/// Hash a password on the blocking pool.
pub async fn hash(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context(TaskFailedSnafu)?
}

/// Verify a password on the blocking pool.
pub async fn verify(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .context(TaskFailedSnafu)?
}

/// Hash a password into a PHC string carrying salt and parameters.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| {
            PasswordHashSnafu {
                message: err.to_string(),
            }
            .build()
        })
}

/// Check a password against a PHC string produced by [`hash_password`].
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|err| {
        PasswordHashSnafu {
            message: err.to_string(),
        }
        .build()
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
