//! Networking traits.

use crate::error::Result;

/// Trait for authenticating HTTP requests.
///
/// Implementations add the `Authorization` header, refreshing the underlying
/// credential first when needed.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// Authenticate the request builder.
    async fn authenticate(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder>;
}
