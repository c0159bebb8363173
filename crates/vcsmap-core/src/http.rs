//! HTTP transport seam.
//!
//! The core only needs `HEAD` (entity tag of the bulk archive) and `GET`
//! (archive body, mapper service answers). [`ReqwestTransport`] is the real
//! implementation; [`MockTransport`] serves canned responses and records
//! every call.

use parking_lot::Mutex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::config::MapperConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Head,
    Get,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Head => f.write_str("HEAD"),
            Method::Get => f.write_str("GET"),
        }
    }
}

/// Status, headers (names lowercased) and body of an HTTP exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    pub fn not_found() -> Self {
        Self::new(404, Vec::new())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{method} {url} failed: {message}")]
pub struct TransportError {
    pub method: Method,
    pub url: String,
    pub message: String,
    pub timed_out: bool,
}

/// Blocking HTTP capability used by the fetcher and the resolver.
pub trait Transport: Send + Sync {
    /// Metadata-only request; redirects are followed.
    fn head(&self, url: &str) -> Result<HttpResponse, TransportError>;

    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;

    /// `GET` with its own total budget instead of the transport default.
    fn get_with_timeout(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;
}

// ============================================================================
// reqwest
// ============================================================================

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).unwrap_or_else(|_| HeaderValue::from_static("vcsmap")),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError {
                method: Method::Get,
                url: String::new(),
                message: format!("failed to build http client: {e}"),
                timed_out: false,
            })?;
        Ok(Self { client })
    }

    pub fn from_config(config: &MapperConfig) -> Result<Self, TransportError> {
        Self::new(&config.user_agent, config.timeout())
    }

    fn send(
        &self,
        method: Method,
        url: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<HttpResponse, TransportError> {
        let to_error = |e: reqwest::Error| TransportError {
            method,
            url: url.to_string(),
            timed_out: e.is_timeout(),
            message: e.to_string(),
        };

        let resp = request.send().map_err(to_error)?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = match method {
            Method::Head => Vec::new(),
            Method::Get => resp.bytes().map_err(to_error)?.to_vec(),
        };

        tracing::debug!(%method, url, status, bytes = body.len(), "http exchange");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl Transport for ReqwestTransport {
    fn head(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.send(Method::Head, url, self.client.head(url))
    }

    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.send(Method::Get, url, self.client.get(url))
    }

    fn get_with_timeout(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.send(Method::Get, url, self.client.get(url).timeout(timeout))
    }
}

// ============================================================================
// Mock
// ============================================================================

/// In-memory transport for tests and offline tooling.
///
/// Unrouted requests answer `404`. With [`MockTransport::max_calls_per_url`]
/// set, exceeding the budget for a URL is a transport error, which lets a
/// test assert that a miss is paid for only once.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), HttpResponse>>,
    failures: Mutex<HashMap<(Method, String), String>>,
    calls: Mutex<Vec<(Method, String)>>,
    timeouts: Mutex<Vec<(String, Duration)>>,
    max_calls_per_url: Option<usize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_calls_per_url(mut self, limit: usize) -> Self {
        self.max_calls_per_url = Some(limit);
        self
    }

    pub fn route(&self, method: Method, url: &str, response: HttpResponse) {
        self.routes.lock().insert((method, url.to_string()), response);
    }

    /// Make every request to `url` fail as if the connection timed out.
    pub fn fail(&self, method: Method, url: &str, message: &str) {
        self.failures
            .lock()
            .insert((method, url.to_string()), message.to_string());
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_to(&self, method: Method, url: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(m, u)| *m == method && u == url)
            .count()
    }

    /// Timeout passed to the most recent `get_with_timeout` for `url`.
    pub fn timeout_for(&self, url: &str) -> Option<Duration> {
        self.timeouts
            .lock()
            .iter()
            .rev()
            .find(|(u, _)| u == url)
            .map(|(_, t)| *t)
    }

    fn respond(&self, method: Method, url: &str) -> Result<HttpResponse, TransportError> {
        let seen = {
            let mut calls = self.calls.lock();
            calls.push((method, url.to_string()));
            calls.iter().filter(|(m, u)| *m == method && u == url).count()
        };

        if let Some(limit) = self.max_calls_per_url {
            if seen > limit {
                return Err(TransportError {
                    method,
                    url: url.to_string(),
                    message: format!("mock budget exceeded: {seen} calls, limit {limit}"),
                    timed_out: false,
                });
            }
        }

        if let Some(message) = self.failures.lock().get(&(method, url.to_string())) {
            return Err(TransportError {
                method,
                url: url.to_string(),
                message: message.clone(),
                timed_out: true,
            });
        }

        Ok(self
            .routes
            .lock()
            .get(&(method, url.to_string()))
            .cloned()
            .unwrap_or_else(HttpResponse::not_found))
    }
}

impl Transport for MockTransport {
    fn head(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let mut resp = self.respond(Method::Head, url)?;
        resp.body.clear();
        Ok(resp)
    }

    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        self.respond(Method::Get, url)
    }

    fn get_with_timeout(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.timeouts.lock().push((url.to_string(), timeout));
        self.respond(Method::Get, url)
    }
}
