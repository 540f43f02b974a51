//! # Data Retrieval Module
//!
//! Concrete transports for the dispatcher. The core only depends on the
//! `Transport` trait; this module provides the HTTP implementation most
//! applications plug into it.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: `ApiClient`, a `Transport` built on `reqwest` and
//!   `reqwest-middleware` with base-URL joining, bearer authentication,
//!   default headers, JSON bodies and per-request timeouts.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client implementing the dispatcher's transport.
pub mod ky_http;

pub use ky_http::ApiClient;
