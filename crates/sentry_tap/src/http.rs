//! Transport boundary for all HTTP I/O.
//!
//! The client only ever issues GET requests against the Sentry REST API, so
//! the request type carries a URL and headers and nothing else. Production
//! code goes through [`reqwest_transport::ReqwestTransport`]; unit tests use
//! the in-memory [`MockTransport`].

use async_trait::async_trait;
use thiserror::Error;

/// HTTP headers represented as key/value pairs.
///
/// Header names are treated case-insensitively by helper functions.
pub type HttpHeaders = Vec<(String, String)>;

/// A GET request about to be sent to the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HttpHeaders,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http transport error: {0}")]
    Transport(String),

    #[error("no mock response registered for GET {url}")]
    NoMockResponse { url: String },
}

/// Transport boundary for all HTTP I/O.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Get the first header value matching `name` (case-insensitive).
#[must_use]
pub fn header_get<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub mod reqwest_transport {
    use super::*;

    use std::time::Duration as StdDuration;

    /// A real HTTP transport backed by reqwest.
    ///
    /// Safe to share across concurrent fetch tasks; reqwest clients are
    /// internally reference-counted.
    #[derive(Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }

        /// Build a transport with a finite per-request timeout.
        ///
        /// A hung connection would otherwise block a stream's join barrier
        /// indefinitely, so callers must always pick some timeout.
        pub fn with_timeout(timeout: StdDuration) -> Result<Self, HttpError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| HttpError::Transport(e.to_string()))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let mut builder = self.client.get(&request.url);
            for (k, v) in request.headers {
                builder = builder.header(&k, &v);
            }

            let resp = builder
                .send()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?;

            let status = resp.status().as_u16();
            let mut headers: HttpHeaders = Vec::new();
            for (name, value) in resp.headers().iter() {
                headers.push((
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                ));
            }

            let body = resp
                .bytes()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?
                .to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }
}

// ---------- Test-only mock transport ----------

#[cfg(test)]
use std::collections::{HashMap, VecDeque};
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// In-memory mock transport.
///
/// This is designed for unit tests: no sockets, no loopback HTTP servers.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[cfg(test)]
#[derive(Default)]
struct MockTransportInner {
    routes: HashMap<String, VecDeque<Result<HttpResponse, String>>>,
    prefix_routes: Vec<(String, VecDeque<Result<HttpResponse, String>>)>,
    requests: Vec<HttpRequest>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a response for a URL.
    ///
    /// If multiple responses are registered for the same URL, they are
    /// returned in FIFO order.
    pub fn push_response(&self, url: impl AsRef<str>, response: HttpResponse) {
        let mut inner = self
            .inner
            .lock()
            .expect("mock transport lock should not be poisoned");
        inner
            .routes
            .entry(url.as_ref().to_string())
            .or_default()
            .push_back(Ok(response));
    }

    /// Register a JSON body with status 200 and no pagination headers.
    pub fn push_json(&self, url: impl AsRef<str>, body: &serde_json::Value) {
        self.push_response(
            url,
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: serde_json::to_vec(body).expect("mock body should serialize"),
            },
        );
    }

    /// Register a response for any URL starting with `prefix`.
    ///
    /// Exact-URL routes win over prefix routes. Useful when the caller
    /// appends query parameters derived from the current wall clock.
    pub fn push_response_prefix(&self, prefix: impl AsRef<str>, response: HttpResponse) {
        self.push_prefix_entry(prefix.as_ref().to_string(), Ok(response));
    }

    /// Register a JSON body for any URL starting with `prefix`.
    pub fn push_json_prefix(&self, prefix: impl AsRef<str>, body: &serde_json::Value) {
        self.push_response_prefix(
            prefix,
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: serde_json::to_vec(body).expect("mock body should serialize"),
            },
        );
    }

    /// Register a transport-level failure for any URL starting with `prefix`.
    pub fn push_error_prefix(&self, prefix: impl AsRef<str>, message: impl Into<String>) {
        self.push_prefix_entry(prefix.as_ref().to_string(), Err(message.into()));
    }

    fn push_prefix_entry(&self, prefix: String, entry: Result<HttpResponse, String>) {
        let mut inner = self
            .inner
            .lock()
            .expect("mock transport lock should not be poisoned");
        if let Some((_, queue)) = inner.prefix_routes.iter_mut().find(|(p, _)| *p == prefix) {
            queue.push_back(entry);
        } else {
            inner.prefix_routes.push((prefix, VecDeque::from([entry])));
        }
    }

    /// Register a transport-level failure for a URL.
    pub fn push_error(&self, url: impl AsRef<str>, message: impl Into<String>) {
        let mut inner = self
            .inner
            .lock()
            .expect("mock transport lock should not be poisoned");
        inner
            .routes
            .entry(url.as_ref().to_string())
            .or_default()
            .push_back(Err(message.into()));
    }

    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        let inner = self
            .inner
            .lock()
            .expect("mock transport lock should not be poisoned");
        inner.requests.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut inner = self
            .inner
            .lock()
            .expect("mock transport lock should not be poisoned");

        let url = request.url.clone();
        inner.requests.push(request);

        let entry = inner
            .routes
            .get_mut(&url)
            .and_then(|q| q.pop_front())
            .or_else(|| {
                inner
                    .prefix_routes
                    .iter_mut()
                    .find(|(prefix, queue)| url.starts_with(prefix.as_str()) && !queue.is_empty())
                    .and_then(|(_, queue)| queue.pop_front())
            });

        match entry {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(message)) => Err(HttpError::Transport(message)),
            None => Err(HttpError::NoMockResponse { url }),
        }
    }
}
