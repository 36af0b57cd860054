//! Tokens and the token endpoint.
//!
//! [`TokenEndpoint`] is the capability the login flow and the managed HTTP
//! transport use to turn an authorization code or a refresh token into a
//! fresh [`Token`]. [`HttpTokenEndpoint`] is the standard form-encoded
//! implementation (RFC 6749 §4.1.3 and §6).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Safety margin for token expiry checks (60 seconds).
const EXPIRY_SAFETY_MARGIN_SECS: i64 = 60;

/// OAuth token set issued by the token endpoint.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    /// Access token for API requests. Empty when only a refresh token is known.
    pub access_token: String,

    /// Long-lived credential used to mint new access tokens.
    pub refresh_token: Option<String>,

    /// Unix timestamp when the access token expires, if known.
    pub expires_at: Option<i64>,

    /// Token type, typically "Bearer".
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// OIDC ID token, if the issuer returned one. Not validated here.
    #[serde(default)]
    pub id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Token {
    /// Create a token expiring `expires_in` seconds from now.
    pub fn new(access_token: String, refresh_token: Option<String>, expires_in: Option<i64>) -> Self {
        let expires_at = expires_in.map(|ei| chrono::Utc::now().timestamp() + ei);
        Self {
            access_token,
            refresh_token,
            expires_at,
            token_type: default_token_type(),
            id_token: None,
        }
    }

    /// A token holding nothing but a cached refresh token.
    ///
    /// It reports itself as expired, so the first use triggers a refresh.
    pub fn from_refresh_token(refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: Some(refresh_token.into()),
            expires_at: None,
            token_type: default_token_type(),
            id_token: None,
        }
    }

    /// Check if the access token is missing, expired, or about to expire.
    ///
    /// A non-empty access token without expiry is treated as valid.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.expires_at {
            Some(exp) => exp <= chrono::Utc::now().timestamp() + EXPIRY_SAFETY_MARGIN_SECS,
            None => false,
        }
    }

    /// Time until the access token expires; zero if expired or unknown.
    pub fn time_until_expiry(&self) -> Duration {
        match self.expires_at {
            Some(exp) => {
                let remaining = exp - chrono::Utc::now().timestamp();
                if remaining > 0 {
                    Duration::from_secs(remaining as u64)
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

// Never print secrets.
impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &self.refresh_token.as_deref().map(redact))
            .field("expires_at", &self.expires_at)
            .field("token_type", &self.token_type)
            .field("id_token", &self.id_token.as_deref().map(redact))
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "[redacted]" }
}

// =============================================================================
// TokenEndpoint
// =============================================================================

/// Authorization-code grant parameters.
#[derive(Debug, Clone, Copy)]
pub struct CodeExchange<'a> {
    pub token_url: &'a str,
    pub client_id: &'a str,
    pub code: &'a str,
    pub redirect_uri: &'a str,
    /// PKCE verifier matching the challenge sent with the authorization request.
    pub code_verifier: Option<&'a str>,
}

/// Refresh-token grant parameters.
#[derive(Debug, Clone, Copy)]
pub struct RefreshRequest<'a> {
    pub token_url: &'a str,
    pub client_id: &'a str,
    pub refresh_token: &'a str,
}

/// Issues tokens for authorization codes and refresh tokens.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange an authorization code for a token.
    async fn exchange_code(&self, request: CodeExchange<'_>) -> Result<Token>;

    /// Mint a new access token from a refresh token.
    async fn refresh(&self, request: RefreshRequest<'_>) -> Result<Token>;
}

/// Token response from a standard OAuth 2.0 token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

impl From<TokenResponse> for Token {
    fn from(response: TokenResponse) -> Self {
        let mut token = Token::new(
            response.access_token,
            response.refresh_token,
            response.expires_in,
        );
        if let Some(token_type) = response.token_type.filter(|t| !t.is_empty()) {
            // "bearer" is common on the wire; normalize for the header.
            token.token_type = if token_type.eq_ignore_ascii_case("bearer") {
                default_token_type()
            } else {
                token_type
            };
        }
        token.id_token = response.id_token;
        token
    }
}

/// Error response from a token endpoint.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Form-encoded token endpoint client.
#[derive(Debug, Clone)]
pub struct HttpTokenEndpoint {
    http: reqwest::Client,
}

impl HttpTokenEndpoint {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn post_form(&self, token_url: &str, form: &[(&str, &str)], what: &str) -> Result<Token> {
        let response = self
            .http
            .post(token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| Error::TokenExchange(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::TokenExchange(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<TokenErrorResponse>(&body) {
                warn!(
                    error = %error.error,
                    description = ?error.error_description,
                    "Token {} failed", what
                );
                return Err(Error::TokenExchange(match error.error_description {
                    Some(desc) => format!("{}: {}", error.error, desc),
                    None => error.error,
                }));
            }
            return Err(Error::TokenExchange(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token_response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            Error::TokenExchange(format!("Failed to parse token response: {}", e))
        })?;

        debug!("Token {} successful", what);
        Ok(token_response.into())
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(&self, request: CodeExchange<'_>) -> Result<Token> {
        debug!("Exchanging authorization code for tokens");

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", request.code),
            ("redirect_uri", request.redirect_uri),
            ("client_id", request.client_id),
        ];
        if let Some(verifier) = request.code_verifier {
            form.push(("code_verifier", verifier));
        }

        self.post_form(request.token_url, &form, "exchange").await
    }

    async fn refresh(&self, request: RefreshRequest<'_>) -> Result<Token> {
        debug!("Refreshing access token");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", request.refresh_token),
            ("client_id", request.client_id),
        ];

        let mut token = self.post_form(request.token_url, &form, "refresh").await?;
        // Many issuers do not rotate refresh tokens.
        if token.refresh_token.is_none() {
            token.refresh_token = Some(request.refresh_token.to_string());
        }
        Ok(token)
    }
}
