//! Federated identity verification against Google.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Result, ServerError};

const TOKENINFO_ENDPOINT: &str = "https://oauth2.googleapis.com/tokeninfo";
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Identity asserted by the federated provider.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedIdentity {
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
}

/// Port for validating third-party identity tokens.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Validate `token_id` and yield the verified identity.
    ///
    /// An unreachable provider is a [`ServerError::Dependency`]; a token
    /// the provider rejects is a [`ServerError::Auth`].
    async fn verify(&self, token_id: &str) -> Result<VerifiedIdentity>;
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    email: String,
    #[serde(default)]
    name: String,
    picture: Option<String>,
}

/// Google `tokeninfo` adapter for [`IdentityVerifier`].
///
/// Explicitly constructed at startup and injected into the registry,
/// with process-wide lifetime.
#[derive(Clone)]
pub struct GoogleVerifier {
    http: reqwest::Client,
    client_id: String,
    endpoint: String,
}

impl GoogleVerifier {
    /// Create a new [`GoogleVerifier`] for the configured client ID.
    pub fn new(client_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| {
                ServerError::dependency("cannot build http client", err)
            })?;

        Ok(Self {
            http,
            client_id: client_id.to_owned(),
            endpoint: TOKENINFO_ENDPOINT.to_owned(),
        })
    }
}

/// [`IdentityVerifier`] for instances without a `google` config entry.
pub struct DisabledVerifier;

#[async_trait]
impl IdentityVerifier for DisabledVerifier {
    async fn verify(&self, _token_id: &str) -> Result<VerifiedIdentity> {
        Err(ServerError::Dependency {
            details: "google sign-in is not configured".into(),
            source: None,
        })
    }
}


#[async_trait]
impl IdentityVerifier for GoogleVerifier {
    async fn verify(&self, token_id: &str) -> Result<VerifiedIdentity> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("id_token", token_id)])
            .send()
            .await
            .map_err(|err| {
                ServerError::dependency("google tokeninfo unreachable", err)
            })?;

        // Google answers 400 for forged, expired or malformed tokens.
        if !response.status().is_success() {
            return Err(ServerError::Auth(
                "google token is expired or invalid".into(),
            ));
        }

        let info: TokenInfo = response.json().await.map_err(|err| {
            ServerError::dependency("google tokeninfo unreadable", err)
        })?;

        if info.aud != self.client_id {
            tracing::warn!(aud = %info.aud, "google token for foreign audience");
            return Err(ServerError::Auth(
                "google token is expired or invalid".into(),
            ));
        }

        Ok(VerifiedIdentity {
            email: info.email,
            name: info.name,
            picture: info.picture,
        })
    }
}
