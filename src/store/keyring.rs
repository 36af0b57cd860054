//! Keyring-based credential storage.

use super::CredentialStore;
use crate::error::StoreError;
use tracing::{debug, instrument};

/// Credential store backed by the system keyring.
///
/// - Linux: Secret Service over D-Bus, fronted by a kernel keyutils cache
/// - macOS: Keychain
/// - Windows: Credential Manager
///
/// Secrets are stored verbatim under (service, account). Feature-gated behind
/// `system-keyring`.
#[derive(Debug, Clone, Default)]
pub struct KeyringCredentialStore;

impl KeyringCredentialStore {
    /// Create a new keyring store.
    pub fn new() -> Self {
        Self
    }

    /// Check if the system keyring is reachable at all.
    pub fn is_available() -> bool {
        match keyring::Entry::new("oidcauth-probe", "availability-check") {
            Ok(entry) => match entry.get_password() {
                Ok(_) => true,
                Err(keyring::Error::NoEntry) => true,
                Err(keyring::Error::NoStorageAccess(_)) => false,
                Err(keyring::Error::PlatformFailure(_)) => false,
                Err(_) => true,
            },
            Err(_) => false,
        }
    }

    fn entry(service: &str, account: &str) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(service, account)
            .map_err(|e| StoreError::Backend(format!("Failed to create keyring entry: {}", e)))
    }
}

impl CredentialStore for KeyringCredentialStore {
    #[instrument(skip(self))]
    fn get(&self, service: &str, account: &str) -> Result<String, StoreError> {
        match Self::entry(service, account)?.get_password() {
            Ok(secret) => {
                debug!("Credential loaded from keyring");
                Ok(secret)
            }
            Err(keyring::Error::NoEntry) => Err(StoreError::not_found(service, account)),
            Err(e) => Err(StoreError::Backend(format!("Keyring error: {}", e))),
        }
    }

    #[instrument(skip(self, secret))]
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), StoreError> {
        Self::entry(service, account)?
            .set_password(secret)
            .map_err(|e| StoreError::Backend(format!("Keyring error: {}", e)))?;
        debug!("Credential saved to keyring");
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete(&self, service: &str, account: &str) -> Result<(), StoreError> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) => {
                debug!("Credential removed from keyring");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Err(StoreError::not_found(service, account)),
            Err(e) => Err(StoreError::Backend(format!("Keyring error: {}", e))),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
