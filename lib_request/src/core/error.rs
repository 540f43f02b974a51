//! # Dispatcher Error Taxonomy
//!
//! Three failure sources reach a request: the transport (including responses
//! the validator refused), the pre-flight gate, and the retry ledger. Callers
//! only ever see them wrapped in [`DispatchError`].

use std::sync::Arc;

use thiserror::Error;

use super::request::{RequestId, Response};

/// Failures produced while executing a request against the transport.
///
/// Every variant is treated the same way for retry purposes.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request URL could not be built.
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),

    /// The body could not be serialized.
    #[error("failed to serialize request body: {0}")]
    Body(#[from] serde_json::Error),

    /// The HTTP client reported an error.
    #[cfg(feature = "retrieve")]
    #[error("request failed: {0}")]
    Request(#[from] reqwest_middleware::Error),

    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// The transport returned a response that the validator refused.
    #[error("response rejected by validator (status {status})")]
    Rejected {
        /// Status of the refused response.
        status: u16,
        /// The refused response itself.
        response: Box<Response>,
    },

    /// Any other transport-specific failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransportError {
    /// Wraps a refused response.
    pub fn rejected(response: Response) -> Self {
        Self::Rejected {
            status: response.status,
            response: Box::new(response),
        }
    }
}

/// The pre-flight action failed.
///
/// One failure is shared by every waiter released by the same gate
/// invocation, hence the `Arc`.
#[derive(Debug, Clone, Error)]
#[error("pre-flight action failed: {0}")]
pub struct GateError(Arc<anyhow::Error>);

impl GateError {
    /// Wraps the action's error.
    pub fn new(source: anyhow::Error) -> Self {
        Self(Arc::new(source))
    }

    /// The action's task went away before the gate settled.
    pub fn closed() -> Self {
        Self::new(anyhow::anyhow!("pre-flight gate closed before settling"))
    }

    /// The underlying error.
    pub fn source_error(&self) -> &anyhow::Error {
        &self.0
    }
}

/// Retry bookkeeping was asked about a request it never registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// No entry for this identity.
    #[error("request {0} can not be found in the retry ledger")]
    NotFound(RequestId),
}

/// The terminal failure delivered to a request's callbacks and handle.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The transport failed and no retries were left.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The pre-flight gate failed before the request could run.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// Internal retry bookkeeping was inconsistent.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The dispatcher went away before delivering an outcome.
    #[error("dispatcher dropped the request before it completed")]
    Closed,
}

impl DispatchError {
    /// True when the failure came from the pre-flight gate.
    pub fn is_gate(&self) -> bool {
        matches!(self, Self::Gate(_))
    }

    /// True when the failure came from the transport or the validator.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_carries_status() {
        let err = TransportError::rejected(Response::new(503, "busy"));
        assert_eq!(err.to_string(), "response rejected by validator (status 503)");
    }

    #[test]
    fn gate_error_is_shared() {
        let err = GateError::new(anyhow::anyhow!("login refused"));
        let copy = err.clone();
        assert_eq!(copy.to_string(), "pre-flight action failed: login refused");
        assert_eq!(copy.source_error().to_string(), "login refused");
        assert!(Arc::ptr_eq(&err.0, &copy.0));
        assert!(DispatchError::from(copy).is_gate());
    }

    #[test]
    fn ledger_error_names_the_request() {
        let err = LedgerError::NotFound(RequestId::new(42));
        assert_eq!(err.to_string(), "request #42 can not be found in the retry ledger");
    }
}
