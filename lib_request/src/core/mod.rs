//! # Request Orchestration Core
//!
//! This module holds everything that coordinates outgoing requests. It does
//! not know how bytes reach the network; that is delegated to a `Transport`.
//!
//! ## Core Components:
//!
//! - **`request`**: request parameters, descriptors (parameters plus identity
//!   and retry count) and buffered responses.
//!
//! - **`error`**: the failure taxonomy (transport, gate, ledger) and the
//!   `DispatchError` callers observe.
//!
//! - **`transport`**: the single async capability the core depends on.
//!
//! - **`ledger`**: per-identity retry bookkeeping.
//!
//! - **`gate`**: shares one in-flight pre-flight action (e.g. a login) among
//!   all concurrent callers and releases them as a batch.
//!
//! - **`dispatcher`**: the queue and drain loop tying the pieces together.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// The gated, queued, retrying dispatcher.
pub mod dispatcher;
/// Failure types.
pub mod error;
/// Batched pre-flight gate.
pub mod gate;
/// Retry bookkeeping per request identity.
pub mod ledger;
/// Request and response data.
pub mod request;
/// The transport capability.
pub mod transport;

// --- Public API Re-exports ---
pub use dispatcher::{
    Dispatcher, DispatcherBuilder, ErrorHook, RequestHandle, ResponseValidator, RetryPolicy,
    SubmitOptions, SuccessHook,
};
pub use error::{DispatchError, GateError, LedgerError, TransportError};
pub use gate::{preflight, Gate, PreflightAction, PreflightFuture};
pub use ledger::RetryLedger;
pub use request::{RequestDescriptor, RequestId, RequestParams, Response};
pub use transport::Transport;
