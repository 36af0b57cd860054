//! Error types for oidcauth.
//!
//! Every failure of the login flow surfaces as its own [`Error`] variant so a
//! caller can decide whether to retry the login, retry discovery, or treat the
//! credential store as unavailable. Nothing in this crate retries internally.

use std::time::Duration;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while logging in or managing cached credentials.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // ── Construction ────────────────────────────────────────────────────────
    /// The issuer was unreachable or returned invalid metadata.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Login attempt ───────────────────────────────────────────────────────
    /// No loopback port could be bound for the callback listener.
    #[error("Unable to start localhost listener: {0}")]
    ListenerBind(#[source] std::io::Error),

    /// The callback server stopped before delivering a callback.
    #[error("Callback server stopped: {0}")]
    CallbackServer(String),

    /// The operating system could not open the authorization URL.
    #[error("Failed to open browser: {0}")]
    BrowserLaunch(String),

    /// The callback's state did not match the state issued for this attempt.
    #[error("State does not match")]
    StateMismatch,

    /// The issuer redirected back with an OAuth error instead of a code.
    #[error("Authorization denied: {error}: {description}")]
    AuthorizationDenied { error: String, description: String },

    /// No callback arrived before the configured deadline.
    #[error("Timed out after {0:?} waiting for the authorization callback")]
    CallbackTimeout(Duration),

    /// The caller cancelled the operation.
    #[error("Login cancelled")]
    Cancelled,

    /// The token endpoint rejected the request or could not be reached.
    #[error("Failed to exchange token: {0}")]
    TokenExchange(String),

    // ── Credential cache ────────────────────────────────────────────────────
    /// The credential store failed, or holds no entry for the key.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The HTTP client is not backed by a managed token source.
    #[error("HTTP client's transport is not a managed token source")]
    UnsupportedTransport,

    /// The issued token carries no refresh token, so there is nothing to cache.
    #[error("Token has no refresh token")]
    MissingRefreshToken,

    // ── Authenticated requests ──────────────────────────────────────────────
    /// A request sent through an authenticated client failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// True when the error means "no cached credential" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound { .. }))
    }
}

/// Errors reported by a [`CredentialStore`](crate::store::CredentialStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No secret is stored under the given service/account pair.
    #[error("No credential stored for {account} at {service}")]
    NotFound { service: String, account: String },

    /// The backend itself failed (locked keychain, no D-Bus session, ...).
    #[error("Credential store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn not_found(service: &str, account: &str) -> Self {
        Self::NotFound {
            service: service.to_string(),
            account: account.to_string(),
        }
    }
}
