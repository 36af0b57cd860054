//! Credential storage for cached refresh tokens.
//!
//! Entries are keyed by (service, account). A [`Session`](crate::Session)
//! uses its canonical issuer as the service and its client id as the account.

#[cfg(feature = "system-keyring")]
pub mod keyring;
pub mod memory;
pub mod trait_def;

// Re-exports
pub use memory::MemoryCredentialStore;
pub use trait_def::CredentialStore;

#[cfg(feature = "system-keyring")]
pub use keyring::KeyringCredentialStore;
