//! Cryptographic logics.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::config::Argon2 as ArgonConfig;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
}

const DECOY_PASSWORD: &str = "decoy";

/// Password manager that uses Argon2id and PHC string format for hashing
/// and verification.
#[derive(Clone)]
pub struct PasswordManager {
    params: Params,
    /// Digest no account ever stores, verified against when a real
    /// digest is absent so both cases cost the same.
    decoy: String,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self, CryptoError> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        let mut manager = Self {
            params,
            decoy: String::new(),
        };
        manager.decoy = manager.hash_password(DECOY_PASSWORD)?;

        Ok(manager)
    }

    fn argon2(&self) -> Argon2<'_> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id with a fresh random salt.
    pub fn hash_password(
        &self,
        password: impl AsRef<[u8]>,
    ) -> Result<String, CryptoError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC string.
    ///
    /// Total over its input: a missing or malformed digest yields
    /// `false`, never an error. Federated-only accounts store no digest
    /// and must fail closed, after a full verification against the
    /// decoy digest so the miss is as slow as a mismatch.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: Option<&str>,
    ) -> bool {
        let Some(parsed) =
            phc_hash.and_then(|hash| PasswordHash::new(hash).ok())
        else {
            if let Ok(decoy) = PasswordHash::new(&self.decoy) {
                let _ =
                    self.argon2().verify_password(password.as_ref(), &decoy);
            }
            return false;
        };

        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .is_ok()
    }
}
