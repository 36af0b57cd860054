//! OpenID Connect login for command-line programs.
//!
//! A [`Session`] logs a user in through their browser with the authorization
//! code flow and a one-shot loopback redirect, caches the refresh token in the
//! OS keyring, and hands out an [`HttpClient`] that keeps its access token
//! fresh.
//!
//! ```no_run
//! use oidcauth::Session;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> oidcauth::Result<()> {
//! let session = Session::new("https://accounts.example.com", "my-cli", ["profile"]).await?;
//! let cancel = CancellationToken::new();
//! let client = session.login_with_cache(&cancel, &cancel).await?;
//! session.store_token_in_cache(&client).await?;
//!
//! let response = client.send(client.get("https://api.example.com/me")).await?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod login;
pub mod net;
pub mod session;
pub mod store;
pub mod token;

pub use config::Config;
pub use discovery::{EndpointResolver, ProviderMetadata, StaticResolver, WellKnownResolver};
pub use error::{Error, Result, StoreError};
pub use login::{BrowserLauncher, SystemBrowser};
pub use net::HttpClient;
pub use session::{Session, SessionBuilder};
#[cfg(feature = "system-keyring")]
pub use store::KeyringCredentialStore;
pub use store::{CredentialStore, MemoryCredentialStore};
pub use token::{HttpTokenEndpoint, Token, TokenEndpoint};
