//! In-memory credential storage.

use super::CredentialStore;
use crate::error::StoreError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::instrument;

type Key = (String, String);

/// In-memory credential store.
///
/// Uses `Arc<RwLock<HashMap>>` for thread-safe access. Useful for tests and
/// ephemeral sessions; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<RwLock<HashMap<Key, String>>>,
}

impl MemoryCredentialStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding one secret.
    pub fn with_secret(
        service: impl Into<String>,
        account: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let mut map = HashMap::new();
        map.insert((service.into(), account.into()), secret.into());
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Number of stored secrets.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("lock poisoned").is_empty()
    }

    fn key(service: &str, account: &str) -> Key {
        (service.to_string(), account.to_string())
    }
}

impl CredentialStore for MemoryCredentialStore {
    #[instrument(skip(self))]
    fn get(&self, service: &str, account: &str) -> Result<String, StoreError> {
        let guard = self.inner.read().expect("lock poisoned");
        guard
            .get(&Self::key(service, account))
            .cloned()
            .ok_or_else(|| StoreError::not_found(service, account))
    }

    #[instrument(skip(self, secret))]
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("lock poisoned");
        guard.insert(Self::key(service, account), secret.to_string());
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete(&self, service: &str, account: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().expect("lock poisoned");
        guard
            .remove(&Self::key(service, account))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(service, account))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
