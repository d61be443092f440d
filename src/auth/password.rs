//! bcrypt hashing and verification.

use crate::error::{AuthError, AuthResult};

/// Hash a plaintext password at the configured cost.
///
/// # Errors
/// Returns `AUTHENTICATION_ERROR` if hashing fails.
pub(crate) fn hash_password(password: &str, cost: u32) -> AuthResult<String> {
    bcrypt::hash(password, cost).map_err(|err| AuthError::internal("password.hash", &err.into()))
}

/// Verify a plaintext password against a stored bcrypt hash.
///
/// # Errors
/// Returns `AUTHENTICATION_ERROR` when the stored hash is unreadable.
pub(crate) fn verify_password(password: &str, stored_hash: &str) -> AuthResult<bool> {
    bcrypt::verify(password, stored_hash)
        .map_err(|err| AuthError::internal("password.verify", &err.into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::{hash_password, verify_password};

    // MIN_COST keeps the test suite fast; production uses the config default.
    const TEST_COST: u32 = 4;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("password123", TEST_COST).unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("password123", &hash).unwrap());
        assert!(!verify_password("password124", &hash).unwrap());
    }

    #[test]
    fn hash_never_contains_the_plaintext() {
        let hash = hash_password("hunter2-plaintext", TEST_COST).unwrap();
        assert!(!hash.contains("hunter2"));
    }

    #[test]
    fn unreadable_stored_hash_is_an_error_not_a_match() {
        assert!(verify_password("password123", "not-a-bcrypt-hash").is_err());
    }
}
