//! Credential store trait.

use crate::error::StoreError;
use std::sync::Arc;

/// A secure secret store addressed by (service, account).
///
/// Implementations must be thread-safe and atomic per key. Callers only issue
/// single get/set/delete calls, never multi-step transactions.
pub trait CredentialStore: Send + Sync {
    /// Read the secret, or [`StoreError::NotFound`] if nothing is stored.
    fn get(&self, service: &str, account: &str) -> Result<String, StoreError>;

    /// Create or overwrite the secret.
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), StoreError>;

    /// Remove the secret, or [`StoreError::NotFound`] if nothing is stored.
    fn delete(&self, service: &str, account: &str) -> Result<(), StoreError>;

    /// Name of the backend, used in logs.
    fn name(&self) -> &str;
}

// Blanket implementation for Arc<T>
impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    fn get(&self, service: &str, account: &str) -> Result<String, StoreError> {
        (**self).get(service, account)
    }
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), StoreError> {
        (**self).set(service, account, secret)
    }
    fn delete(&self, service: &str, account: &str) -> Result<(), StoreError> {
        (**self).delete(service, account)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// Blanket implementation for Box<T>
impl<T: CredentialStore + ?Sized> CredentialStore for Box<T> {
    fn get(&self, service: &str, account: &str) -> Result<String, StoreError> {
        (**self).get(service, account)
    }
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), StoreError> {
        (**self).set(service, account, secret)
    }
    fn delete(&self, service: &str, account: &str) -> Result<(), StoreError> {
        (**self).delete(service, account)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}
