//! Credential hashing.
//!
//! Passwords are first reduced to a SHA-256 hex fingerprint, then hashed
//! with Argon2id under a fresh random salt. Only the resulting PHC string
//! (algorithm, parameters, salt and digest in one) is ever stored.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::config::HashConfig;
use crate::error::HashError;

/// Turns raw passwords into storable credential hashes.
#[derive(Debug, Clone)]
pub struct CredentialHasher {
    params: Params,
}

impl CredentialHasher {
    pub fn new(config: HashConfig) -> Result<Self, HashError> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            None,
        )
        .map_err(|e| HashError::Params(e.to_string()))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password into a self-describing PHC string.
    ///
    /// CPU and memory heavy; call from a blocking context.
    pub fn hash(&self, password: &SecretString) -> Result<String, HashError> {
        let fingerprint = fingerprint(password);
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2()
            .hash_password(fingerprint.expose_secret().as_bytes(), &salt)
            .map_err(|e| HashError::Hashing(e.to_string()))?;
        Ok(hash.to_string())
    }

    /// Check a password against a stored hash.
    ///
    /// The work factor is read from the stored string, not from `self`.
    pub fn verify(&self, password: &SecretString, stored: &str) -> Result<bool, HashError> {
        let parsed = PasswordHash::new(stored).map_err(|e| HashError::Malformed(e.to_string()))?;
        let fingerprint = fingerprint(password);
        Ok(self
            .argon2()
            .verify_password(fingerprint.expose_secret().as_bytes(), &parsed)
            .is_ok())
    }
}

/// Fixed-length hex fingerprint of the raw password bytes.
fn fingerprint(password: &SecretString) -> SecretString {
    let digest = Sha256::digest(password.expose_secret().as_bytes());
    SecretString::from(hex::encode(digest))
}
