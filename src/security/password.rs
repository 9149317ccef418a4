use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to generate salt: {0}")]
    Salt(String),

    #[error("Failed to hash password: {0}")]
    Hash(String),
}

/// Hash a password into a PHC string with a fresh random salt.
pub fn hash_password(password: &SecretString) -> Result<String, PasswordError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| PasswordError::Salt(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| PasswordError::Salt(e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map_err(|e| PasswordError::Hash(e.to_string()))?
        .to_string();
    Ok(phc)
}

/// Unparseable hashes never verify.
pub fn verify_password(hash: &str, password: &SecretString) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_only_the_original_password() {
        let hash = hash_password(&SecretString::from("correct horse".to_string())).unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, &SecretString::from("correct horse".to_string())));
        assert!(!verify_password(&hash, &SecretString::from("battery staple".to_string())));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let secret = SecretString::from("same password".to_string());
        assert_ne!(hash_password(&secret).unwrap(), hash_password(&secret).unwrap());
    }

    #[test]
    fn garbage_hash_does_not_verify() {
        assert!(!verify_password("not-a-phc-string", &SecretString::from("x".to_string())));
    }
}
