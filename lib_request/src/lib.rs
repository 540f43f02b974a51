//! # lib_request
//!
//! A client-side request dispatcher that sits above an HTTP transport. Every
//! request is gated behind a shared pre-flight action (run at most once at a
//! time), serialized through a FIFO queue, and retried with a stable identity
//! until it succeeds or its retry budget runs out.
//!
//! The orchestration core is always compiled. Everything else is gated
//! per folder:
//!
//! - `retrieve`: `ApiClient`, the reqwest-backed transport.
//! - `configs`: layered `DispatchConfig` loading.
//! - `loggers`: tracing subscriber setup.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod core;

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;

// Re-export the everyday API at the crate root
pub use crate::core::{
    preflight, DispatchError, Dispatcher, DispatcherBuilder, RequestDescriptor, RequestHandle,
    RequestId, RequestParams, Response, RetryPolicy, SubmitOptions, Transport, TransportError,
};

#[cfg(feature = "configs")]
pub use crate::configs::{load_config, DispatchConfig};
#[cfg(feature = "retrieve")]
pub use crate::retrieve::ApiClient;
