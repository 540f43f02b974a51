//! # HTTP Retrieval Transport
//!
//! A [`Transport`] backed by `reqwest` through `reqwest_middleware`. It joins
//! request paths onto a base URL, injects bearer authentication and default
//! headers, serializes JSON bodies, and buffers the whole response.
//!
//! Retries are deliberately not installed as middleware: they belong to the
//! dispatcher, which keeps request identity stable across attempts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tracing::debug;

use crate::core::error::TransportError;
use crate::core::request::{RequestDescriptor, Response};
use crate::core::transport::Transport;

/// Base URL used when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost/";

/// Timeout applied to requests that do not carry their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// A flexible asynchronous HTTP client.
///
/// Built on top of `reqwest_middleware`, so callers can hand in a client with
/// their own middleware stack through [`ApiClient::with_client`].
pub struct ApiClient {
    /// The underlying middleware-enabled client.
    inner: ClientWithMiddleware,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
    /// Headers sent with every request, before per-request headers.
    default_headers: HeaderMap,
    /// Timeout for requests that do not set one.
    timeout: Duration,
}

impl ApiClient {
    /// Creates a new `ApiClient` with a plain `reqwest` client.
    ///
    /// # Arguments
    /// * `base_url` - The absolute base URL for the API (e.g., "https://api.example.com/v1/").
    /// * `auth_token` - An optional string for the Authorization header.
    ///
    /// # Errors
    /// Returns [`TransportError::Url`] if `base_url` is not a valid absolute URL.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, TransportError> {
        let client = ClientBuilder::new(reqwest::Client::new()).build();
        Self::with_client(client, base_url, auth_token)
    }

    /// Creates an `ApiClient` around an existing middleware client.
    ///
    /// # Errors
    /// Returns [`TransportError::Url`] if `base_url` is not a valid absolute URL.
    pub fn with_client(
        client: ClientWithMiddleware,
        base_url: &str,
        auth_token: Option<String>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            inner: client,
            base_url: Url::parse(base_url)?,
            auth_token,
            default_headers: HeaderMap::new(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Builds a client from the transport section of a loaded configuration.
    ///
    /// # Errors
    /// Returns [`TransportError::Url`] if the configured base URL is invalid.
    #[cfg(feature = "configs")]
    pub fn from_config(
        config: &crate::configs::config_dispatch::DispatchConfig,
    ) -> Result<Self, TransportError> {
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let client = Self::new(base_url, config.auth_token.clone())?;
        Ok(match config.timeout_ms {
            Some(ms) => client.timeout(Duration::from_millis(ms)),
            None => client,
        })
    }

    /// Sets the default timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a header sent with every request.
    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    /// The base URL relative paths are joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves a request url against the base URL. Absolute urls pass through.
    pub fn resolve(&self, url: &str) -> Result<Url, TransportError> {
        Ok(self.base_url.join(url)?)
    }
}

fn classify(err: reqwest_middleware::Error) -> TransportError {
    match err {
        reqwest_middleware::Error::Reqwest(inner) if inner.is_timeout() => TransportError::Timeout,
        other => TransportError::Request(other),
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn execute(&self, request: &RequestDescriptor) -> Result<Response, TransportError> {
        let params = &request.params;

        // 1. Construct the full absolute URL
        let full_url = self.resolve(&params.url)?;
        let mut req = self
            .inner
            .request(params.method.clone(), full_url.clone())
            .timeout(params.timeout.unwrap_or(self.timeout));

        // 2. Default headers first, so per-request ones win
        if !self.default_headers.is_empty() {
            req = req.headers(self.default_headers.clone());
        }
        if !params.headers.is_empty() {
            req = req.headers(params.headers.clone());
        }
        if !params.query.is_empty() {
            req = req.query(&params.query);
        }

        // 3. Inject Bearer Authentication if a token is present
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        // 4. Serialize and attach the JSON body if present
        if let Some(body) = &params.body {
            let json_body = serde_json::to_vec(body)?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        debug!(
            request_id = request.id.get(),
            method = %params.method,
            url = %full_url,
            "sending http request"
        );

        // 5. Execute and buffer; non-2xx statuses are left to the validator
        let response = req.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| classify(reqwest_middleware::Error::Reqwest(err)))?;

        debug!(request_id = request.id.get(), status, bytes = body.len(), "http response received");
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
