//! Browser-based authorization code login.
//!
//! A [`LoginFlow`] runs one attempt at a time: it binds a fresh
//! [`CallbackServer`], opens the authorization URL through a
//! [`BrowserLauncher`], waits for the redirect, checks the state and exchanges
//! the code at the token endpoint. Attempts are serialized by an async mutex,
//! so a second caller waits for the first attempt to finish.

pub mod browser;
pub mod callback;
pub mod pkce;

pub use browser::{BrowserLauncher, SystemBrowser};
pub use callback::{CallbackResult, CallbackServer};
pub use pkce::Pkce;

use std::collections::BTreeSet;
use std::sync::Arc;

use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::LoginConfig;
use crate::error::{Error, Result};
use crate::token::{CodeExchange, Token, TokenEndpoint};

/// Everything that goes into the authorization URL of one attempt.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationRequest<'a> {
    pub authorization_endpoint: &'a str,
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scopes: &'a BTreeSet<String>,
    pub state: &'a str,
    pub pkce: Option<&'a Pkce>,
}

impl AuthorizationRequest<'_> {
    /// Build the URL the browser is sent to.
    ///
    /// Query parameters already present on the endpoint are kept.
    pub fn to_url(&self) -> Result<Url> {
        let mut url = Url::parse(self.authorization_endpoint).map_err(|e| {
            Error::Discovery(format!(
                "Invalid authorization endpoint '{}': {}",
                self.authorization_endpoint, e
            ))
        })?;

        let scope = self
            .scopes
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", self.client_id)
                .append_pair("redirect_uri", self.redirect_uri)
                .append_pair("scope", &scope)
                .append_pair("state", self.state);
            if let Some(pkce) = self.pkce {
                query
                    .append_pair("code_challenge", &pkce.challenge)
                    .append_pair("code_challenge_method", pkce::PKCE_METHOD);
            }
        }
        Ok(url)
    }
}

/// Accept the callback only if its state equals the attempt's state.
///
/// The comparison runs in constant time. A missing state never matches.
pub fn verify_state(expected: &str, received: Option<&str>) -> Result<()> {
    let received = received.ok_or(Error::StateMismatch)?;
    if bool::from(expected.as_bytes().ct_eq(received.as_bytes())) {
        Ok(())
    } else {
        Err(Error::StateMismatch)
    }
}

/// Single-flight browser login for one client at one issuer.
pub struct LoginFlow {
    client_id: String,
    authorization_endpoint: String,
    token_url: String,
    scopes: BTreeSet<String>,
    config: LoginConfig,
    launcher: Arc<dyn BrowserLauncher>,
    exchanger: Arc<dyn TokenEndpoint>,
    /// The login lock. Holds the redirect URI of the attempt in progress.
    lock: Mutex<Option<String>>,
}

impl LoginFlow {
    pub fn new(
        client_id: impl Into<String>,
        authorization_endpoint: impl Into<String>,
        token_url: impl Into<String>,
        scopes: BTreeSet<String>,
        config: LoginConfig,
        launcher: Arc<dyn BrowserLauncher>,
        exchanger: Arc<dyn TokenEndpoint>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            authorization_endpoint: authorization_endpoint.into(),
            token_url: token_url.into(),
            scopes,
            config,
            launcher,
            exchanger,
            lock: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    /// Run one login attempt, waiting for any attempt already in flight.
    ///
    /// `cancel` bounds the wait for the lock, the callback and the exchange.
    /// The listener is closed and the lock released on every exit path.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Token> {
        let mut redirect_uri = tokio::select! {
            guard = self.lock.lock() => guard,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let outcome = self.attempt(&mut redirect_uri, cancel).await;
        *redirect_uri = None;
        match &outcome {
            Ok(_) => info!(client_id = %self.client_id, "Browser login complete"),
            Err(e) => warn!(client_id = %self.client_id, error = %e, "Browser login failed"),
        }
        outcome
    }

    async fn attempt(
        &self,
        redirect_slot: &mut Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Token> {
        self.config.validate()?;
        let server = CallbackServer::bind(&self.config.callback_path).await?;
        let redirect_uri: &str = redirect_slot.insert(self.config.redirect_uri(server.port()));

        let state = Uuid::new_v4().to_string();
        let pkce = self.config.pkce.then(Pkce::generate);
        let url = AuthorizationRequest {
            authorization_endpoint: &self.authorization_endpoint,
            client_id: &self.client_id,
            redirect_uri,
            scopes: &self.scopes,
            state: &state,
            pkce: pkce.as_ref(),
        }
        .to_url()?;

        info!(port = server.port(), "Opening browser for sign-in");
        self.launcher
            .open(url.as_str())
            .map_err(|e| Error::BrowserLaunch(e.to_string()))?;

        let callback = server
            .wait(cancel, self.config.callback_timeout())
            .await?;
        verify_state(&state, callback.state.as_deref())?;

        if let Some(error) = callback.error {
            return Err(Error::AuthorizationDenied {
                error,
                description: callback.error_description.unwrap_or_default(),
            });
        }
        let code = callback
            .code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                Error::TokenExchange("Callback did not include an authorization code".to_string())
            })?;

        debug!("Exchanging authorization code");
        let request = CodeExchange {
            token_url: &self.token_url,
            client_id: &self.client_id,
            code: &code,
            redirect_uri,
            code_verifier: pkce.as_ref().map(|p| p.verifier.as_str()),
        };
        let limit = self.config.exchange_timeout();
        tokio::select! {
            exchanged = tokio::time::timeout(limit, self.exchanger.exchange_code(request)) => {
                exchanged.map_err(|_| {
                    Error::TokenExchange(format!("Token endpoint did not respond within {:?}", limit))
                })?
            }
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

impl std::fmt::Debug for LoginFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginFlow")
            .field("client_id", &self.client_id)
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}
