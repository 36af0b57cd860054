//! The public client object.
//!
//! A [`Session`] is bound to one issuer and one client id. It resolves the
//! issuer's endpoints once at construction, runs browser logins through its
//! [`LoginFlow`], and caches the refresh token in a [`CredentialStore`] under
//! (canonical issuer, client id).

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, HttpConfig, LoginConfig, StorageBackend};
use crate::discovery::{EndpointResolver, ProviderMetadata, WellKnownResolver, canonical_issuer};
use crate::error::{Error, Result, StoreError};
use crate::login::{BrowserLauncher, LoginFlow, SystemBrowser};
use crate::net::{HttpClient, TokenSource, Transport};
use crate::store::{CredentialStore, MemoryCredentialStore};
use crate::token::{HttpTokenEndpoint, Token, TokenEndpoint};

/// Scope every OpenID Connect authorization request carries.
pub const OPENID_SCOPE: &str = "openid";

/// OIDC login session for one client at one issuer.
pub struct Session {
    issuer: String,
    client_id: String,
    scopes: BTreeSet<String>,
    metadata: ProviderMetadata,
    flow: LoginFlow,
    store: Arc<dyn CredentialStore>,
    token_endpoint: Arc<dyn TokenEndpoint>,
    http: reqwest::Client,
}

impl Session {
    /// Create a session with the default adapters.
    ///
    /// `scopes` are requested in addition to `openid`. Discovery runs without
    /// a deadline beyond the HTTP request timeout.
    pub async fn new<I, S>(issuer: &str, client_id: &str, scopes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder(issuer, client_id)
            .scopes(scopes)
            .build(&CancellationToken::new())
            .await
    }

    pub fn builder(issuer: impl Into<String>, client_id: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(issuer, client_id)
    }

    /// Create a session from a loaded configuration.
    pub async fn from_config(config: &Config, cancel: &CancellationToken) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn CredentialStore> = match config.credentials.backend {
            StorageBackend::Keyring => keyring_store()?,
            StorageBackend::Memory => Arc::new(MemoryCredentialStore::new()),
        };
        Self::builder(&config.oidc.issuer, &config.oidc.client_id)
            .scopes(config.oidc.scopes.iter().cloned())
            .login_config(config.login.clone())
            .http_config(config.http.clone())
            .credential_store(store)
            .build(cancel)
            .await
    }

    /// Canonical issuer URL, without trailing slash.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Requested scopes, always including `openid`.
    pub fn scopes(&self) -> &BTreeSet<String> {
        &self.scopes
    }

    pub fn endpoints(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Run a browser login and return the issued token.
    ///
    /// Concurrent calls on one session run one after another.
    pub async fn browser_login(&self, cancel: &CancellationToken) -> Result<Token> {
        self.flow.run(cancel).await
    }

    /// Return an authenticated client, logging in only if nothing is cached.
    ///
    /// A cached refresh token is used as is; it is exchanged for an access
    /// token on the first request. `login_cancel` bounds the browser login,
    /// `client_cancel` bounds every refresh of the returned client. A failing
    /// credential store is reported, not treated as a cache miss.
    pub async fn login_with_cache(
        &self,
        login_cancel: &CancellationToken,
        client_cancel: &CancellationToken,
    ) -> Result<HttpClient> {
        let token = match self.store.get(&self.issuer, &self.client_id) {
            Ok(refresh_token) => {
                info!(issuer = %self.issuer, store = self.store.name(), "Using cached refresh token");
                Token::from_refresh_token(refresh_token)
            }
            Err(StoreError::NotFound { .. }) => {
                debug!(issuer = %self.issuer, "No cached refresh token, starting browser login");
                self.browser_login(login_cancel).await?
            }
            Err(e) => {
                warn!(issuer = %self.issuer, error = %e, "Credential store unavailable");
                return Err(e.into());
            }
        };
        Ok(self.http_client(token, client_cancel))
    }

    /// Wrap a token into a client that refreshes it as needed.
    pub fn http_client(&self, token: Token, cancel: &CancellationToken) -> HttpClient {
        let source = TokenSource::new(
            token,
            self.token_endpoint.clone(),
            &self.metadata.token_endpoint,
            &self.client_id,
            cancel.clone(),
        );
        HttpClient::managed(self.http.clone(), Arc::new(source))
    }

    /// Persist the refresh token behind a managed client.
    ///
    /// Fails with [`Error::UnsupportedTransport`] for unmanaged clients and
    /// with [`Error::MissingRefreshToken`] when the issuer never returned a
    /// refresh token. The store is not touched in either case.
    pub async fn store_token_in_cache(&self, client: &HttpClient) -> Result<()> {
        let Transport::Managed(source) = client.transport() else {
            return Err(Error::UnsupportedTransport);
        };
        let token = source.token().await?;
        let refresh_token = token.refresh_token.ok_or(Error::MissingRefreshToken)?;
        self.store
            .set(&self.issuer, &self.client_id, &refresh_token)?;
        info!(issuer = %self.issuer, store = self.store.name(), "Refresh token cached");
        Ok(())
    }

    /// Remove the cached refresh token for this issuer and client.
    pub fn delete_token_from_cache(&self) -> Result<()> {
        self.store.delete(&self.issuer, &self.client_id)?;
        info!(issuer = %self.issuer, "Cached refresh token deleted");
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("issuer", &self.issuer)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "system-keyring")]
fn keyring_store() -> Result<Arc<dyn CredentialStore>> {
    Ok(Arc::new(crate::store::KeyringCredentialStore::new()))
}

#[cfg(not(feature = "system-keyring"))]
fn keyring_store() -> Result<Arc<dyn CredentialStore>> {
    Err(Error::Config(
        "credential backend 'keyring' requires the system-keyring feature".to_string(),
    ))
}

/// Builder for [`Session`]. Unset capabilities fall back to the defaults.
pub struct SessionBuilder {
    issuer: String,
    client_id: String,
    scopes: Vec<String>,
    resolver: Option<Arc<dyn EndpointResolver>>,
    launcher: Option<Arc<dyn BrowserLauncher>>,
    store: Option<Arc<dyn CredentialStore>>,
    token_endpoint: Option<Arc<dyn TokenEndpoint>>,
    login: LoginConfig,
    http: HttpConfig,
}

impl SessionBuilder {
    fn new(issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            scopes: Vec::new(),
            resolver: None,
            launcher: None,
            store: None,
            token_endpoint: None,
            login: LoginConfig::default(),
            http: HttpConfig::default(),
        }
    }

    /// Additional scopes; `openid` is always added.
    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn token_endpoint(mut self, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        self.token_endpoint = Some(endpoint);
        self
    }

    pub fn login_config(mut self, login: LoginConfig) -> Self {
        self.login = login;
        self
    }

    pub fn http_config(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Resolve the issuer's endpoints and build the session.
    ///
    /// `cancel` bounds discovery.
    pub async fn build(self, cancel: &CancellationToken) -> Result<Session> {
        let issuer = canonical_issuer(&self.issuer).to_string();
        if issuer.is_empty() {
            return Err(Error::Config("issuer must not be empty".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(Error::Config("client_id must not be empty".to_string()));
        }
        self.login.validate()?;

        let http = self.http.build_client()?;
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(WellKnownResolver::new(http.clone())));
        let metadata = tokio::select! {
            resolved = resolver.resolve(&issuer) => resolved?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let scopes: BTreeSet<String> = self
            .scopes
            .into_iter()
            .filter(|scope| !scope.is_empty())
            .chain(std::iter::once(OPENID_SCOPE.to_string()))
            .collect();

        let token_endpoint = self
            .token_endpoint
            .unwrap_or_else(|| Arc::new(HttpTokenEndpoint::new(http.clone())));
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(SystemBrowser::detect()));
        let store = self.store.unwrap_or_else(default_store);

        let flow = LoginFlow::new(
            &self.client_id,
            &metadata.authorization_endpoint,
            &metadata.token_endpoint,
            scopes.clone(),
            self.login,
            launcher,
            token_endpoint.clone(),
        );

        info!(
            issuer = %issuer,
            client_id = %self.client_id,
            store = store.name(),
            "Session ready"
        );
        Ok(Session {
            issuer,
            client_id: self.client_id,
            scopes,
            metadata,
            flow,
            store,
            token_endpoint,
            http,
        })
    }
}

fn default_store() -> Arc<dyn CredentialStore> {
    keyring_store().unwrap_or_else(|_| {
        warn!("Built without system-keyring, cached credentials live in memory only");
        Arc::new(MemoryCredentialStore::new())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticResolver;

    async fn session(issuer: &str, store: Arc<dyn CredentialStore>) -> Session {
        Session::builder(issuer, "abc")
            .scopes(["profile"])
            .resolver(Arc::new(StaticResolver::new(
                "https://example.com/authorize",
                "https://example.com/token",
            )))
            .credential_store(store)
            .build(&CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_issuer_canonical_and_openid_scope() {
        let session = session("https://example.com/", Arc::new(MemoryCredentialStore::new())).await;
        assert_eq!(session.issuer(), "https://example.com");
        assert_eq!(session.client_id(), "abc");
        let scopes: Vec<&str> = session.scopes().iter().map(String::as_str).collect();
        assert_eq!(scopes, vec!["openid", "profile"]);
        assert_eq!(session.endpoints().token_endpoint, "https://example.com/token");
    }

    #[tokio::test]
    async fn test_openid_not_duplicated() {
        let session = Session::builder("https://example.com", "abc")
            .scopes(["openid", "", "email"])
            .resolver(Arc::new(StaticResolver::new(
                "https://example.com/authorize",
                "https://example.com/token",
            )))
            .credential_store(Arc::new(MemoryCredentialStore::new()))
            .build(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.scopes().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_client_id_rejected() {
        let result = Session::builder("https://example.com", "")
            .resolver(Arc::new(StaticResolver::new(
                "https://example.com/authorize",
                "https://example.com/token",
            )))
            .build(&CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_route_syntax_in_callback_path_rejected() {
        let login = LoginConfig {
            callback_path: "/cb{".into(),
            ..LoginConfig::default()
        };
        let result = Session::builder("https://example.com", "abc")
            .resolver(Arc::new(StaticResolver::new(
                "https://example.com/authorize",
                "https://example.com/token",
            )))
            .login_config(login)
            .build(&CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::Config(ref msg)) if msg.contains("'{'")));
    }

    #[tokio::test]
    async fn test_zero_exchange_timeout_rejected() {
        let login = LoginConfig {
            exchange_timeout_secs: 0,
            ..LoginConfig::default()
        };
        let result = Session::builder("https://example.com", "abc")
            .resolver(Arc::new(StaticResolver::new(
                "https://example.com/authorize",
                "https://example.com/token",
            )))
            .login_config(login)
            .build(&CancellationToken::new())
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    struct PendingResolver;

    #[async_trait::async_trait]
    impl EndpointResolver for PendingResolver {
        async fn resolve(&self, _issuer: &str) -> Result<ProviderMetadata> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_discovery() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = Session::builder("https://example.com", "abc")
            .resolver(Arc::new(PendingResolver))
            .credential_store(Arc::new(MemoryCredentialStore::new()))
            .build(&cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_from_config_discovers_and_uses_configured_backend() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": server.uri(),
                "authorization_endpoint": format!("{}/authorize", server.uri()),
                "token_endpoint": format!("{}/token", server.uri())
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.oidc.issuer = format!("{}/", server.uri());
        config.oidc.client_id = "abc".into();
        config.oidc.scopes = vec!["email".into()];
        config.credentials.backend = StorageBackend::Memory;

        let session = Session::from_config(&config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.issuer(), server.uri());
        assert!(session.scopes().contains("email"));
        assert!(session.scopes().contains(OPENID_SCOPE));
        assert!(format!("{session:?}").contains("memory"));
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_config() {
        let result = Session::from_config(&Config::default(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_login_with_cache_uses_cached_token() {
        let store = MemoryCredentialStore::with_secret("https://example.com", "abc", "rt");
        let session = session("https://example.com/", Arc::new(store)).await;

        let client = session
            .login_with_cache(&CancellationToken::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(client.is_managed());
    }

    #[tokio::test]
    async fn test_store_rejects_unmanaged_client() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = session("https://example.com", store.clone()).await;

        let client = HttpClient::unmanaged(reqwest::Client::new());
        let result = session.store_token_in_cache(&client).await;
        assert!(matches!(result, Err(Error::UnsupportedTransport)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_and_delete_round_trip() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = session("https://example.com", store.clone()).await;

        let token = Token::new("access".into(), Some("refresh".into()), Some(3600));
        let client = session.http_client(token, &CancellationToken::new());
        session.store_token_in_cache(&client).await.unwrap();
        assert_eq!(store.get("https://example.com", "abc").unwrap(), "refresh");

        session.delete_token_from_cache().unwrap();
        assert!(session.delete_token_from_cache().unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_store_without_refresh_token() {
        let store = Arc::new(MemoryCredentialStore::new());
        let session = session("https://example.com", store.clone()).await;

        let token = Token::new("access".into(), None, Some(3600));
        let client = session.http_client(token, &CancellationToken::new());
        let result = session.store_token_in_cache(&client).await;
        assert!(matches!(result, Err(Error::MissingRefreshToken)));
        assert!(store.is_empty());
    }
}
