#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use oidcauth::config::LoginConfig;
use oidcauth::error::StoreError;
use oidcauth::token::{CodeExchange, RefreshRequest};
use oidcauth::{
    BrowserLauncher, CredentialStore, MemoryCredentialStore, Result, Session, StaticResolver, Token,
    TokenEndpoint,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const ISSUER: &str = "https://example.com/";
pub const CLIENT_ID: &str = "abc";

/// What the fake browser does with the authorization URL.
#[derive(Debug, Clone)]
pub enum Browser {
    /// Redirect back with `code` and the state from the URL.
    Approve { code: String },
    /// Redirect back with `code` and a fixed state.
    ForgeState { code: String, state: String },
    /// Redirect back with an OAuth error and the state from the URL.
    Deny { error: String },
    /// Open nothing and never redirect.
    Silent,
    /// Fail to start.
    Broken,
}

/// Browser stand-in that follows the redirect with reqwest.
///
/// Counts open browsers between `open` and the token exchange so tests can
/// observe overlapping attempts. On every open it also checks that the
/// listeners of earlier attempts no longer accept connections.
pub struct FakeBrowser {
    behaviour: Browser,
    pub opened: AtomicUsize,
    pub active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
    pub urls: Mutex<Vec<Url>>,
    /// Callback ports in the order their attempts opened the browser.
    pub ports: Mutex<Vec<u16>>,
    /// Opens that found an earlier attempt's listener still accepting.
    pub overlapping_listeners: AtomicUsize,
    redirects: Mutex<Vec<JoinHandle<Option<u16>>>>,
}

impl FakeBrowser {
    pub fn new(behaviour: Browser) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            opened: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
            urls: Mutex::new(Vec::new()),
            ports: Mutex::new(Vec::new()),
            overlapping_listeners: AtomicUsize::new(0),
            redirects: Mutex::new(Vec::new()),
        })
    }

    pub fn approving(code: &str) -> Arc<Self> {
        Self::new(Browser::Approve {
            code: code.to_string(),
        })
    }

    /// HTTP statuses the callback server answered with, in order.
    pub async fn statuses(&self) -> Vec<Option<u16>> {
        let handles: Vec<_> = self.redirects.lock().unwrap().drain(..).collect();
        let mut statuses = Vec::new();
        for handle in handles {
            statuses.push(handle.await.unwrap());
        }
        statuses
    }

    pub fn last_url(&self) -> Url {
        self.urls.lock().unwrap().last().cloned().unwrap()
    }

    fn redirect(&self, redirect_uri: &str, params: &[(&str, &str)]) {
        let mut target = Url::parse(redirect_uri).unwrap();
        target.query_pairs_mut().extend_pairs(params);
        let handle = tokio::spawn(async move {
            let http = reqwest::Client::builder().no_proxy().build().unwrap();
            http.get(target)
                .send()
                .await
                .ok()
                .map(|response| response.status().as_u16())
        });
        self.redirects.lock().unwrap().push(handle);
    }
}

pub fn query(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

impl BrowserLauncher for FakeBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        if matches!(self.behaviour, Browser::Broken) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "xdg-open: not found"));
        }

        let url = Url::parse(url).unwrap();
        self.opened.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.clone());

        let redirect_uri = query(&url, "redirect_uri").unwrap();
        let port = Url::parse(&redirect_uri).unwrap().port().unwrap();
        {
            let mut ports = self.ports.lock().unwrap();
            let still_open = ports
                .iter()
                .filter(|&&earlier| earlier != port)
                .filter(|&&earlier| std::net::TcpStream::connect(("127.0.0.1", earlier)).is_ok())
                .count();
            self.overlapping_listeners.fetch_add(still_open, Ordering::SeqCst);
            ports.push(port);
        }

        let state = query(&url, "state").unwrap();
        match &self.behaviour {
            Browser::Approve { code } => {
                self.redirect(&redirect_uri, &[("code", code), ("state", &state)]);
            }
            Browser::ForgeState { code, state } => {
                self.redirect(&redirect_uri, &[("code", code), ("state", state)]);
            }
            Browser::Deny { error } => {
                self.redirect(&redirect_uri, &[("error", error), ("state", &state)]);
            }
            Browser::Silent | Browser::Broken => {}
        }
        Ok(())
    }
}

/// Token endpoint that records every exchange.
pub struct RecordingEndpoint {
    pub exchanges: Mutex<Vec<Exchange>>,
    pub refreshes: AtomicUsize,
    browser_active: Option<Arc<AtomicUsize>>,
}

#[derive(Debug, Clone)]
pub struct Exchange {
    pub code: String,
    pub redirect_uri: String,
    pub code_verifier: Option<String>,
}

impl RecordingEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            exchanges: Mutex::new(Vec::new()),
            refreshes: AtomicUsize::new(0),
            browser_active: None,
        })
    }

    /// Marks the browser's attempt finished on every exchange.
    pub fn tracking(browser: &FakeBrowser) -> Arc<Self> {
        Arc::new(Self {
            exchanges: Mutex::new(Vec::new()),
            refreshes: AtomicUsize::new(0),
            browser_active: Some(browser.active.clone()),
        })
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.exchanges.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenEndpoint for RecordingEndpoint {
    async fn exchange_code(&self, request: CodeExchange<'_>) -> Result<Token> {
        if let Some(active) = &self.browser_active {
            active.fetch_sub(1, Ordering::SeqCst);
        }
        let n = {
            let mut exchanges = self.exchanges.lock().unwrap();
            exchanges.push(Exchange {
                code: request.code.to_string(),
                redirect_uri: request.redirect_uri.to_string(),
                code_verifier: request.code_verifier.map(str::to_string),
            });
            exchanges.len()
        };
        Ok(Token::new(
            format!("access-{n}"),
            Some(format!("refresh-{n}")),
            Some(3600),
        ))
    }

    async fn refresh(&self, request: RefreshRequest<'_>) -> Result<Token> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(Token::new(
            format!("refreshed-from-{}", request.refresh_token),
            None,
            Some(3600),
        ))
    }
}

/// Store whose backend is always down.
pub struct UnavailableStore;

impl CredentialStore for UnavailableStore {
    fn get(&self, _service: &str, _account: &str) -> std::result::Result<String, StoreError> {
        Err(StoreError::Backend("no secret service".to_string()))
    }

    fn set(&self, _service: &str, _account: &str, _secret: &str) -> std::result::Result<(), StoreError> {
        Err(StoreError::Backend("no secret service".to_string()))
    }

    fn delete(&self, _service: &str, _account: &str) -> std::result::Result<(), StoreError> {
        Err(StoreError::Backend("no secret service".to_string()))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

pub fn login_config(callback_timeout_secs: u64) -> LoginConfig {
    LoginConfig {
        callback_timeout_secs,
        ..LoginConfig::default()
    }
}

pub async fn session(
    browser: Arc<FakeBrowser>,
    endpoint: Arc<RecordingEndpoint>,
    store: Arc<dyn CredentialStore>,
    login: LoginConfig,
) -> Session {
    Session::builder(ISSUER, CLIENT_ID)
        .scopes(["profile"])
        .resolver(Arc::new(StaticResolver::new(
            "https://example.com/authorize",
            "https://example.com/token",
        )))
        .launcher(browser)
        .token_endpoint(endpoint)
        .credential_store(store)
        .login_config(login)
        .build(&CancellationToken::new())
        .await
        .unwrap()
}

pub async fn memory_session(
    browser: Arc<FakeBrowser>,
    endpoint: Arc<RecordingEndpoint>,
) -> (Session, Arc<MemoryCredentialStore>) {
    let store = Arc::new(MemoryCredentialStore::new());
    let session = session(browser, endpoint, store.clone(), login_config(10)).await;
    (session, store)
}
