//! Manage json web tokens.
//!
//! Two stateless token kinds share one signing secret: short-lived
//! activation tokens binding an OTP to an account, and longer-lived
//! session tokens for authenticated requests. Neither is persisted;
//! validity is entirely signature plus expiry.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::Role;
use crate::error::{Result, ServerError};

/// Activation tokens expire after 5 minutes.
pub const ACTIVATION_EXPIRATION_TIME: u64 = 60 * 5;
/// Session tokens expire after 15 days.
pub const SESSION_EXPIRATION_TIME: u64 = 60 * 60 * 24 * 15;

const EXPIRED_OR_INVALID: &str = "activation token is expired or invalid";

/// Claims asserted on an activation token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivationClaims {
    /// Account ID the OTP is bound to.
    pub sub: Uuid,
    /// One-time code, compared numerically at verification.
    pub otp: u32,
    /// Role the account registered under.
    pub role: Role,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the expiration time on or after which the JWT must not
    /// be accepted for processing.
    pub exp: u64,
}

/// Claims asserted on a session token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Authenticated account ID.
    pub sub: Uuid,
    pub iat: u64,
    pub exp: u64,
}

/// Manage JWT tokens.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|err| ServerError::Internal {
            details: "system clock is before unix epoch".into(),
            source: Some(Box::new(err)),
        })
}

impl TokenManager {
    /// Create a new [`TokenManager`] from the process-wide shared secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
        }
    }

    /// Sign an activation token binding `otp` to an account.
    pub fn create_activation(
        &self,
        account_id: Uuid,
        otp: u32,
        role: Role,
    ) -> Result<String> {
        let iat = now()?;
        let claims = ActivationClaims {
            sub: account_id,
            otp,
            role,
            iat,
            exp: iat + ACTIVATION_EXPIRATION_TIME,
        };

        self.sign(&claims)
    }

    /// Decode and check an activation token.
    pub fn decode_activation(&self, token: &str) -> Result<ActivationClaims> {
        self.decode(token)
    }

    /// Sign a session token for an authenticated account.
    pub fn create_session(&self, account_id: Uuid) -> Result<String> {
        let iat = now()?;
        let claims = SessionClaims {
            sub: account_id,
            iat,
            exp: iat + SESSION_EXPIRATION_TIME,
        };

        self.sign(&claims)
    }

    /// Decode and check a session token.
    pub fn decode_session(&self, token: &str) -> Result<SessionClaims> {
        self.decode(token)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String> {
        let header = Header::new(self.algorithm);
        encode(&header, claims, &self.encoding_key).map_err(|err| {
            ServerError::Internal {
                details: "failed to sign token".into(),
                source: Some(Box::new(err)),
            }
        })
    }

    /// Any decode failure collapses to one caller-facing message:
    /// a forged, expired and malformed token are indistinguishable.
    fn decode<T: serde::de::DeserializeOwned>(&self, token: &str) -> Result<T> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;

        decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| ServerError::Auth(EXPIRED_OR_INVALID.into()))
    }
}
