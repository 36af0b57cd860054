//! Issuer endpoint resolution.
//!
//! A [`Session`](crate::Session) only needs the authorization and token
//! endpoints of its issuer. [`EndpointResolver`] abstracts where they come
//! from; [`WellKnownResolver`] reads them from the issuer's
//! `/.well-known/openid-configuration` document and [`StaticResolver`] hands
//! out fixed values.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Endpoints and verification context of an issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    /// Signing keys for ID token verification. Carried, never used by the login flow.
    #[serde(default)]
    pub jwks_uri: Option<String>,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// Strip trailing slashes so an issuer has one canonical spelling.
pub fn canonical_issuer(issuer: &str) -> &str {
    issuer.trim_end_matches('/')
}

/// Resolves an issuer URL into its endpoints.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// `issuer` is already canonical.
    async fn resolve(&self, issuer: &str) -> Result<ProviderMetadata>;
}

/// Fetches endpoints from the issuer's discovery document.
#[derive(Debug, Clone)]
pub struct WellKnownResolver {
    http: reqwest::Client,
}

impl WellKnownResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl EndpointResolver for WellKnownResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, issuer: &str) -> Result<ProviderMetadata> {
        let discovery_url = format!("{}{}", canonical_issuer(issuer), WELL_KNOWN_PATH);

        let response = self.http.get(&discovery_url).send().await.map_err(|e| {
            Error::Discovery(format!("Failed to fetch discovery document: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(Error::Discovery(format!(
                "Discovery endpoint returned HTTP {}",
                response.status()
            )));
        }

        let metadata: ProviderMetadata = response.json().await.map_err(|e| {
            Error::Discovery(format!("Failed to parse discovery document: {}", e))
        })?;

        validate(issuer, &metadata)?;
        debug!(
            authorization_endpoint = %metadata.authorization_endpoint,
            token_endpoint = %metadata.token_endpoint,
            "Issuer endpoints discovered"
        );
        Ok(metadata)
    }
}

fn validate(issuer: &str, metadata: &ProviderMetadata) -> Result<()> {
    if canonical_issuer(&metadata.issuer) != canonical_issuer(issuer) {
        return Err(Error::Discovery(format!(
            "Issuer mismatch: expected '{}', got '{}'",
            issuer, metadata.issuer
        )));
    }
    for (name, value) in [
        ("authorization_endpoint", &metadata.authorization_endpoint),
        ("token_endpoint", &metadata.token_endpoint),
    ] {
        url::Url::parse(value)
            .map_err(|e| Error::Discovery(format!("Invalid {} '{}': {}", name, value, e)))?;
    }
    Ok(())
}

/// Resolver returning fixed endpoints, for issuers without discovery.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    authorization_endpoint: String,
    token_endpoint: String,
}

impl StaticResolver {
    pub fn new(authorization_endpoint: impl Into<String>, token_endpoint: impl Into<String>) -> Self {
        Self {
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
        }
    }
}

#[async_trait]
impl EndpointResolver for StaticResolver {
    async fn resolve(&self, issuer: &str) -> Result<ProviderMetadata> {
        let metadata = ProviderMetadata {
            issuer: issuer.to_string(),
            authorization_endpoint: self.authorization_endpoint.clone(),
            token_endpoint: self.token_endpoint.clone(),
            jwks_uri: None,
            userinfo_endpoint: None,
        };
        validate(issuer, &metadata)?;
        Ok(metadata)
    }
}
