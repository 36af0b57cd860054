//! HTTP client handed out after login.

use std::sync::Arc;

use reqwest::{Client, IntoUrl, Method, RequestBuilder, Response};

use crate::error::{Error, Result};
use crate::net::source::TokenSource;
use crate::net::traits::AuthProvider;
use crate::token::Token;

/// How requests sent through an [`HttpClient`] are authenticated.
#[derive(Clone)]
pub enum Transport {
    /// Access tokens come from a refreshing [`TokenSource`].
    Managed(Arc<TokenSource>),
    /// Requests go out as built.
    Plain,
}

/// reqwest client paired with a transport.
///
/// Build requests with [`request`](Self::request), [`get`](Self::get) or
/// [`post`](Self::post) and send them with [`send`](Self::send), which attaches
/// the `Authorization` header on managed clients.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    transport: Transport,
}

impl HttpClient {
    /// Client backed by a token source.
    pub fn managed(inner: Client, source: Arc<TokenSource>) -> Self {
        Self {
            inner,
            transport: Transport::Managed(source),
        }
    }

    /// Client that adds no credentials.
    pub fn unmanaged(inner: Client) -> Self {
        Self {
            inner,
            transport: Transport::Plain,
        }
    }

    /// Get the inner reqwest client.
    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn is_managed(&self) -> bool {
        matches!(self.transport, Transport::Managed(_))
    }

    pub fn request(&self, method: Method, url: impl IntoUrl) -> RequestBuilder {
        self.inner.request(method, url)
    }

    pub fn get(&self, url: impl IntoUrl) -> RequestBuilder {
        self.inner.get(url)
    }

    pub fn post(&self, url: impl IntoUrl) -> RequestBuilder {
        self.inner.post(url)
    }

    /// Authenticate and send a request.
    ///
    /// Non-success statuses are returned as responses, not errors.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = match &self.transport {
            Transport::Managed(source) => source.authenticate(request).await?,
            Transport::Plain => request,
        };
        Ok(request.send().await?)
    }

    /// The current token of a managed client, refreshed if it had expired.
    pub async fn current_token(&self) -> Result<Token> {
        match &self.transport {
            Transport::Managed(source) => source.token().await,
            Transport::Plain => Err(Error::UnsupportedTransport),
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transport = match &self.transport {
            Transport::Managed(_) => "managed",
            Transport::Plain => "plain",
        };
        f.debug_struct("HttpClient")
            .field("transport", &transport)
            .finish_non_exhaustive()
    }
}
