//! Credential helpers
//!
//! Passwords are stored as argon2id PHC strings
//! (`$argon2id$v=19$m=...,t=...,p=...$<salt>$<hash>`). The whole string is
//! what remote hosts present to `/auth/`, so it is compared as an opaque
//! token there.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::models::errors::{AppError, AppResult, ErrorCode};

const SALT_LEN: usize = 16;

/// Hash a password with a fresh random salt
pub fn hash_password(password: &str) -> AppResult<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let hashing = |e: argon2::password_hash::Error| {
        AppError::new(ErrorCode::AuthHashing, format!("Cannot hash password: {}", e))
    };
    let salt = SaltString::encode_b64(&salt).map_err(hashing)?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(hashing)
}

/// Check a password against a stored hash
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Constant-time equality for opaque tokens (hashes, remember tokens)
pub fn tokens_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Random hex token of `bytes` bytes
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// 2 to 64 characters, letters and numbers only
pub fn valid_username(name: &str) -> bool {
    (2..=64).contains(&name.chars().count()) && name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// 6 to 64 characters of letters, numbers and symbols
pub fn valid_password(password: &str) -> bool {
    (6..=64).contains(&password.chars().count()) && password.chars().all(|c| c.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("same-pass").unwrap(), hash_password("same-pass").unwrap());
    }

    #[test]
    fn test_malformed_hashes_never_verify() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "sha256$10000$00$00"));
        assert!(!verify_password("x", "$argon2id$v=19$m=19456,t=2,p=1$bm90LWEtc2FsdA$"));
    }

    #[test]
    fn test_username_rules() {
        assert!(valid_username("ab"));
        assert!(valid_username("Admin42"));
        assert!(!valid_username("a"));
        assert!(!valid_username("bad name"));
        assert!(!valid_username("under_score"));
        assert!(!valid_username(&"a".repeat(65)));
    }

    #[test]
    fn test_password_rules() {
        assert!(valid_password("p@ss-w0rd!"));
        assert!(!valid_password("short"));
        assert!(!valid_password("has space"));
        assert!(!valid_password(&"x".repeat(65)));
    }

    #[test]
    fn test_tokens() {
        let token = generate_token(16);
        assert_eq!(token.len(), 32);
        assert!(tokens_match(&token, &token.clone()));
        assert!(!tokens_match(&token, "nope"));
    }
}
