use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2, PasswordHash,
};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("stored password hash is not a valid PHC string: {0}")]
    InvalidHash(String),

    #[error("failed to hash password: {0}")]
    Hashing(String),

    #[error("password verification did not complete: {0}")]
    Verification(String),
}

/// Checks a presented password against a stored hash.
///
/// `Ok(false)` is a wrong password; `Err` means the stored hash itself is unusable.
pub trait PasswordVerifier: Send + Sync {
    fn verify(&self, stored_hash: &str, password: &str) -> Result<bool, PasswordError>;
}

/// Verifies PHC-format Argon2 hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Verifier;

impl PasswordVerifier for Argon2Verifier {
    fn verify(&self, stored_hash: &str, password: &str) -> Result<bool, PasswordError> {
        use argon2::PasswordVerifier as _;

        let parsed_hash =
            PasswordHash::new(stored_hash).map_err(|e| PasswordError::InvalidHash(e.to_string()))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}

/// Produce a PHC-format Argon2 hash, for seeding users.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::Hashing(e.to_string()))?;
    Ok(hash.to_string())
}

/// Hash verified in place of a missing account so unknown emails cost the
/// same as wrong passwords.
pub fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| hash_password("tenant-gate-placeholder").unwrap_or_default())
}
