use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "oidc.issuer") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub oidc: OidcConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

/// Issuer and client identity.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OidcConfig {
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub client_id: String,
    /// Additional scopes; "openid" is always requested.
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Browser login behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginConfig {
    /// Path of the loopback redirect URI.
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    /// Host written into the redirect URI. The listener always binds loopback.
    #[serde(default = "default_redirect_host")]
    pub redirect_host: String,
    /// How long to wait for the browser to come back.
    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,
    /// Upper bound on the code-for-token exchange.
    #[serde(default = "default_exchange_timeout_secs")]
    pub exchange_timeout_secs: u64,
    /// Send a PKCE S256 challenge with the authorization request.
    #[serde(default = "default_true")]
    pub pkce: bool,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            callback_path: default_callback_path(),
            redirect_host: default_redirect_host(),
            callback_timeout_secs: default_callback_timeout_secs(),
            exchange_timeout_secs: default_exchange_timeout_secs(),
            pkce: true,
        }
    }
}

impl LoginConfig {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }

    /// Build the redirect URI for a bound port.
    pub fn redirect_uri(&self, port: u16) -> String {
        format!("http://{}:{}{}", self.redirect_host, port, self.callback_path)
    }

    /// Reject login settings the callback server or the exchange cannot use.
    ///
    /// The callback path must be a literal route: router capture and wildcard
    /// syntax, query and fragment markers are refused.
    pub fn validate(&self) -> Result<()> {
        let path = &self.callback_path;
        if !path.starts_with('/') {
            return Err(Error::Config(format!(
                "login.callback_path must start with '/': {path}"
            )));
        }
        if let Some(c) = path.chars().find(|c| matches!(c, '{' | '}' | '*' | '?' | '#' | ':')) {
            return Err(Error::Config(format!(
                "login.callback_path must not contain '{c}': {path}"
            )));
        }
        if self.callback_timeout_secs == 0 {
            return Err(Error::Config(
                "login.callback_timeout_secs must be positive".to_string(),
            ));
        }
        if self.exchange_timeout_secs == 0 {
            return Err(Error::Config(
                "login.exchange_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for every outgoing HTTP client (discovery, token endpoint, API).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl HttpConfig {
    /// Build a reqwest client with these settings.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Keyring,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keyring => write!(f, "keyring"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown storage backend: {s}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_callback_path() -> String {
    "/callback".to_string()
}
fn default_redirect_host() -> String {
    "localhost".to_string()
}
const fn default_callback_timeout_secs() -> u64 {
    300
}
const fn default_exchange_timeout_secs() -> u64 {
    30
}
const fn default_true() -> bool {
    true
}
fn default_user_agent() -> String {
    format!("oidcauth/{}", env!("CARGO_PKG_VERSION"))
}
const fn default_connect_timeout_secs() -> u64 {
    10
}
const fn default_request_timeout_secs() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Default location: `<config dir>/oidcauth/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oidcauth")
            .join("config.toml")
    }

    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `OIDCAUTH_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read '{}': {}", path.display(), e))
            })?;
            Self::from_toml(&content)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without touching the environment.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Save the file-level configuration (without env overrides) as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write '{}': {}", path.display(), e)))
    }

    /// Reject settings a login could never succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.oidc.issuer.trim().is_empty() {
            return Err(Error::Config("oidc.issuer must be set".to_string()));
        }
        if self.oidc.client_id.trim().is_empty() {
            return Err(Error::Config("oidc.client_id must be set".to_string()));
        }
        self.login.validate()
    }

    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }

        // -- OIDC --
        env_str!("oidc.issuer", "OIDCAUTH_ISSUER", self.oidc.issuer);
        env_str!("oidc.client_id", "OIDCAUTH_CLIENT_ID", self.oidc.client_id);
        if let Ok(val) = std::env::var("OIDCAUTH_SCOPES") {
            self.oidc.scopes = val
                .split([',', ' '])
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            ov.record("oidc.scopes", "OIDCAUTH_SCOPES");
        }

        // -- Login --
        env_str!("login.callback_path", "OIDCAUTH_CALLBACK_PATH", self.login.callback_path);
        env_str!("login.redirect_host", "OIDCAUTH_REDIRECT_HOST", self.login.redirect_host);
        env_parse!(
            "login.callback_timeout_secs",
            "OIDCAUTH_CALLBACK_TIMEOUT_SECS",
            self.login.callback_timeout_secs
        );
        env_parse!(
            "login.exchange_timeout_secs",
            "OIDCAUTH_EXCHANGE_TIMEOUT_SECS",
            self.login.exchange_timeout_secs
        );
        env_bool!("login.pkce", "OIDCAUTH_PKCE", self.login.pkce);

        // -- HTTP --
        env_str!("http.user_agent", "OIDCAUTH_USER_AGENT", self.http.user_agent);
        env_parse!(
            "http.connect_timeout_secs",
            "OIDCAUTH_CONNECT_TIMEOUT_SECS",
            self.http.connect_timeout_secs
        );
        env_parse!(
            "http.request_timeout_secs",
            "OIDCAUTH_REQUEST_TIMEOUT_SECS",
            self.http.request_timeout_secs
        );

        // -- Credentials --
        env_parse!(
            "credentials.backend",
            "OIDCAUTH_CREDENTIAL_BACKEND",
            self.credentials.backend
        );

        // -- Logging --
        env_str!("logging.level", "OIDCAUTH_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "OIDCAUTH_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }
}
