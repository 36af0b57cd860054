//! Refreshing token source behind managed clients.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::net::traits::AuthProvider;
use crate::token::{RefreshRequest, Token, TokenEndpoint};

/// Hands out valid access tokens, refreshing through the token endpoint.
///
/// Refreshes are serialized behind an async mutex: concurrent callers that
/// find the token expired wait for one refresh and share its result.
pub struct TokenSource {
    token: Mutex<Token>,
    endpoint: Arc<dyn TokenEndpoint>,
    token_url: String,
    client_id: String,
    cancel: CancellationToken,
}

impl TokenSource {
    /// `cancel` bounds every refresh this source performs.
    pub fn new(
        token: Token,
        endpoint: Arc<dyn TokenEndpoint>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            token: Mutex::new(token),
            endpoint,
            token_url: token_url.into(),
            client_id: client_id.into(),
            cancel,
        }
    }

    /// Return a token whose access token is valid, refreshing if needed.
    pub async fn token(&self) -> Result<Token> {
        let mut current = self.token.lock().await;
        if !current.is_expired() {
            return Ok(current.clone());
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or(Error::MissingRefreshToken)?;
        debug!(client_id = %self.client_id, "Access token expired, refreshing");

        let request = RefreshRequest {
            token_url: &self.token_url,
            client_id: &self.client_id,
            refresh_token: &refresh_token,
        };
        let mut refreshed = tokio::select! {
            refreshed = self.endpoint.refresh(request) => refreshed?,
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
        };
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = Some(refresh_token);
        }

        info!(client_id = %self.client_id, "Access token refreshed");
        *current = refreshed;
        Ok(current.clone())
    }
}

#[async_trait::async_trait]
impl AuthProvider for TokenSource {
    async fn authenticate(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.token().await?;
        Ok(request.header(reqwest::header::AUTHORIZATION, token.authorization_header()))
    }
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSource")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::CodeExchange;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts refreshes and never rotates the refresh token.
    struct CountingEndpoint {
        refreshes: AtomicUsize,
        delay: Duration,
    }

    impl CountingEndpoint {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                refreshes: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl TokenEndpoint for CountingEndpoint {
        async fn exchange_code(&self, _request: CodeExchange<'_>) -> Result<Token> {
            Err(Error::TokenExchange("unused".into()))
        }

        async fn refresh(&self, request: RefreshRequest<'_>) -> Result<Token> {
            tokio::time::sleep(self.delay).await;
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(request.refresh_token, "rt");
            Ok(Token::new(format!("access-{n}"), None, Some(3600)))
        }
    }

    fn source(endpoint: Arc<CountingEndpoint>, cancel: CancellationToken) -> TokenSource {
        TokenSource::new(
            Token::from_refresh_token("rt"),
            endpoint,
            "https://example.com/token",
            "abc",
            cancel,
        )
    }

    #[tokio::test]
    async fn test_refreshes_once_then_reuses() {
        let endpoint = CountingEndpoint::new(Duration::ZERO);
        let source = source(endpoint.clone(), CancellationToken::new());

        let first = source.token().await.unwrap();
        let second = source.token().await.unwrap();
        assert_eq!(first.access_token, "access-1");
        assert_eq!(second.access_token, "access-1");
        assert_eq!(first.refresh_token.as_deref(), Some("rt"));
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let endpoint = CountingEndpoint::new(Duration::from_millis(50));
        let source = Arc::new(source(endpoint.clone(), CancellationToken::new()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let source = source.clone();
                tokio::spawn(async move { source.token().await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().access_token, "access-1");
        }
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_refresh() {
        let endpoint = CountingEndpoint::new(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let source = source(endpoint, cancel.clone());

        cancel.cancel();
        assert!(matches!(source.token().await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token() {
        let token = Token::new("old".into(), None, Some(0));
        let source = TokenSource::new(
            token,
            CountingEndpoint::new(Duration::ZERO),
            "https://example.com/token",
            "abc",
            CancellationToken::new(),
        );
        assert!(matches!(source.token().await, Err(Error::MissingRefreshToken)));
    }

    #[tokio::test]
    async fn test_authenticate_sets_bearer_header() {
        let source = source(CountingEndpoint::new(Duration::ZERO), CancellationToken::new());
        let request = source
            .authenticate(reqwest::Client::new().get("http://localhost/"))
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.headers().get(reqwest::header::AUTHORIZATION).unwrap(),
            "Bearer access-1"
        );
    }
}
