//! Authenticated HTTP clients.

pub mod client;
pub mod source;
pub mod traits;

pub use client::{HttpClient, Transport};
pub use source::TokenSource;
pub use traits::AuthProvider;
