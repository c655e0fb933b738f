//! Salted password hashing for stored credentials.
//!
//! Passwords are stored as PBKDF2-SHA256 PHC strings and verified in
//! constant time. Plaintext never reaches the database.

use pbkdf2::password_hash::rand_core::OsRng;
use pbkdf2::password_hash::{Error, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;

/// Hash a plaintext password with a fresh random salt.
pub fn hash_password(plain: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Pbkdf2.hash_password(plain.as_bytes(), &salt)?.to_string())
}

/// Verify a plaintext password against a stored PHC string.
///
/// A malformed stored hash verifies as false rather than erroring; the
/// caller treats it like any other credential mismatch.
pub fn verify_password(plain: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Pbkdf2.verify_password(plain.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}
