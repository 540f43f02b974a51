//! # Request Descriptors and Responses
//!
//! The data that flows through the dispatcher. `RequestParams` is the bag of
//! transport parameters a caller hands in, `RequestDescriptor` pairs it with
//! the orchestration metadata (identity and retry count), and `Response` is
//! what a `Transport` hands back.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;

/// # Request Identity
///
/// A unique, stable token for one logical request. Assigned once on first
/// submission and carried unchanged through every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw identity value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw integer behind this identity.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// # Request Parameters
///
/// Everything the transport needs to perform one HTTP call. These are never
/// modified once submitted; retries reuse them as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParams {
    /// The HTTP verb.
    pub method: Method,
    /// An absolute URL, or a path joined onto the transport's base URL.
    pub url: String,
    /// Extra headers for this request only.
    pub headers: HeaderMap,
    /// Query string pairs, appended in order.
    pub query: Vec<(String, String)>,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
    /// Overrides the transport's default timeout for this request.
    pub timeout: Option<Duration>,
}

impl RequestParams {
    /// Creates parameters for `method` against `url` with nothing else set.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Shorthand for a `POST` request with a JSON body.
    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, url).json(body)
    }

    /// Adds a header, replacing any previous value under the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a query string pair.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets the JSON body.
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// # Request Descriptor
///
/// The unit of work the dispatcher queues and the transport executes: the
/// caller's parameters plus the identity and retry counter the dispatcher
/// maintains for them.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    /// Identity shared by the first attempt and every retry.
    pub id: RequestId,
    /// Number of re-submissions so far; `0` on the first attempt.
    pub retry_count: u32,
    /// The original transport parameters.
    pub params: RequestParams,
}

impl RequestDescriptor {
    /// Builds the descriptor of a first attempt.
    pub fn first_attempt(id: RequestId, params: RequestParams) -> Self {
        Self {
            id,
            retry_count: 0,
            params,
        }
    }

    /// The 1-based attempt number this descriptor represents.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }
}

/// # Response
///
/// A fully-buffered HTTP response. Non-2xx statuses are still responses; it is
/// up to the dispatcher's validator to decide what counts as a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// The numeric HTTP status code.
    pub status: u16,
    /// The headers returned by the server.
    pub headers: HeaderMap,
    /// The raw body.
    pub body: Bytes,
}

impl Response {
    /// Creates a response with no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserializes the body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn params_builder_keeps_everything() {
        let params = RequestParams::get("/users")
            .query("page", "2")
            .header(http::header::ACCEPT, HeaderValue::from_static("application/json"))
            .timeout(Duration::from_millis(250));

        assert_eq!(params.method, Method::GET);
        assert_eq!(params.url, "/users");
        assert_eq!(params.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(params.headers.get(http::header::ACCEPT).unwrap(), "application/json");
        assert_eq!(params.timeout, Some(Duration::from_millis(250)));
        assert!(params.body.is_none());
    }

    #[test]
    fn first_attempt_starts_at_zero_retries() {
        let d = RequestDescriptor::first_attempt(RequestId::new(7), RequestParams::get("/x"));
        assert_eq!(d.retry_count, 0);
        assert_eq!(d.attempt(), 1);
        assert_eq!(d.id.to_string(), "#7");
    }

    #[test]
    fn response_helpers() {
        #[derive(Deserialize)]
        struct Body {
            ok: bool,
        }

        let res = Response::new(201, r#"{"ok":true}"#);
        assert!(res.is_success());
        assert!(res.json::<Body>().unwrap().ok);
        assert!(!Response::new(404, "missing").is_success());
        assert_eq!(Response::new(500, "boom").text(), "boom");
    }
}
