//! # Transport Capability
//!
//! The dispatcher never talks to the network itself. It only needs something
//! that can turn a [`RequestDescriptor`] into a [`Response`] or an error.

use async_trait::async_trait;

use super::error::TransportError;
use super::request::{RequestDescriptor, Response};

/// Executes a single request attempt.
///
/// Implementations own connection handling, TLS, timeouts and wire encoding.
/// A timeout must be reported as an error like any other failure.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one attempt of `request`.
    async fn execute(&self, request: &RequestDescriptor) -> Result<Response, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Response, TransportError> {
        (**self).execute(request).await
    }
}
