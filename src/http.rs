//! HTTP requests against a [`Connection`].
//!
//! Each call is a single round trip: the connection's service URL is
//! prefixed to the request path, its headers (and bearer token) are
//! attached, and any status of 300 or above comes back as a
//! [`RequestError::Status`] carrying a remediation hint.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::connection::Connection;

/// How much of each exchange gets logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    #[default]
    Quiet,
    /// Method, URL, status and elapsed time.
    Verbose,
    /// Full request and response dumps.
    Debug,
}

/// A request payload. Either variant is sent with `Content-Type: application/json`.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Sent verbatim. The caller is responsible for it being valid JSON.
    Raw(String),
    Json(serde_json::Value),
}

impl Body {
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, RequestError> {
        serde_json::to_value(value)
            .map(Body::Json)
            .map_err(RequestError::Encode)
    }

    fn into_bytes(self) -> Result<Vec<u8>, RequestError> {
        match self {
            Body::Raw(s) => Ok(s.into_bytes()),
            Body::Json(v) => serde_json::to_vec(&v).map_err(RequestError::Encode),
        }
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Raw(s)
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Raw(s.to_string())
    }
}

impl From<serde_json::Value> for Body {
    fn from(v: serde_json::Value) -> Self {
        Body::Json(v)
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid request URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("HTTP Request {method}:{url} failed: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP Request {method}:{url}, HTTP Response: {status}.{}", hint_suffix(.hint))]
    Status {
        method: Method,
        url: String,
        status: StatusCode,
        hint: Option<&'static str>,
        body: String,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RequestError {
    /// HTTP status of the response, when one was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

fn hint_suffix(hint: &Option<&'static str>) -> String {
    match hint {
        Some(h) => format!(" {}", h),
        None => String::new(),
    }
}

/// Remediation hint for a failing status code.
pub fn status_hint(status: StatusCode) -> Option<&'static str> {
    match status {
        StatusCode::NOT_FOUND => Some("Check for valid argument (user, group etc)."),
        StatusCode::UNAUTHORIZED => Some("Check for valid token."),
        StatusCode::FORBIDDEN => Some("Check for valid token and token user must be an admin."),
        _ => None,
    }
}

fn check_status(method: &Method, url: &str, status: StatusCode, body: &[u8]) -> Result<(), RequestError> {
    if status.as_u16() < 300 {
        return Ok(());
    }
    Err(RequestError::Status {
        method: method.clone(),
        url: url.to_string(),
        status,
        hint: status_hint(status),
        body: String::from_utf8_lossy(body).into_owned(),
    })
}

/// A completed request/response round trip.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub url: String,
    pub elapsed: Duration,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Exchange {
    /// Decode the body as JSON. An empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        let bytes: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &self.body
        };
        serde_json::from_slice(bytes).map_err(|source| RequestError::Decode {
            url: self.url.clone(),
            source,
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestClient {
    http: reqwest::Client,
    verbosity: Verbosity,
}

impl RequestClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    /// Perform `method` on `connection.service_url + path`.
    pub async fn send(
        &self,
        connection: &Connection,
        method: Method,
        path: &str,
        body: Option<Body>,
    ) -> Result<Exchange, RequestError> {
        let url = format!("{}{}", connection.service_url, path);
        let parsed = reqwest::Url::parse(&url).map_err(|e| RequestError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        let payload = body.map(Body::into_bytes).transpose()?;
        let headers = request_headers(connection, payload.is_some())?;

        match self.verbosity {
            Verbosity::Quiet => {}
            Verbosity::Verbose => {
                tracing::info!(method = %method, url = %url, "request");
            }
            Verbosity::Debug => {
                tracing::info!(
                    "request:\n{}",
                    dump_request(&method, &url, &headers, payload.as_deref())
                );
            }
        }

        let mut req = self.http.request(method.clone(), parsed).headers(headers);
        if let Some(bytes) = payload {
            req = req.body(bytes);
        }

        let transport_err = |source| RequestError::Transport {
            method: method.clone(),
            url: url.clone(),
            source,
        };
        let start = Instant::now();
        let resp = req.send().await.map_err(transport_err)?;
        let status = resp.status();
        let resp_headers = resp.headers().clone();
        let resp_body = resp.bytes().await.map_err(transport_err)?;
        let elapsed = start.elapsed();

        match self.verbosity {
            Verbosity::Quiet => {}
            Verbosity::Verbose => {
                tracing::info!(
                    status = %status,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "response"
                );
            }
            Verbosity::Debug => {
                tracing::info!(
                    "response ({} ms):\n{}",
                    elapsed.as_millis(),
                    dump_response(status, &resp_headers, &resp_body)
                );
            }
        }

        check_status(&method, &url, status, &resp_body)?;

        Ok(Exchange {
            url,
            elapsed,
            status,
            headers: resp_headers,
            body: resp_body,
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        connection: &Connection,
        path: &str,
    ) -> Result<T, RequestError> {
        self.send(connection, Method::GET, path, None).await?.json()
    }

    /// GET with a request body, for APIs that expect one.
    pub async fn get_with_content<T: DeserializeOwned>(
        &self,
        connection: &Connection,
        path: &str,
        body: impl Into<Body>,
    ) -> Result<T, RequestError> {
        self.send(connection, Method::GET, path, Some(body.into()))
            .await?
            .json()
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        connection: &Connection,
        path: &str,
        body: Option<Body>,
    ) -> Result<T, RequestError> {
        self.send(connection, Method::POST, path, body).await?.json()
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        connection: &Connection,
        path: &str,
        body: Option<Body>,
    ) -> Result<T, RequestError> {
        self.send(connection, Method::PUT, path, body).await?.json()
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        connection: &Connection,
        path: &str,
        body: Option<Body>,
    ) -> Result<T, RequestError> {
        self.send(connection, Method::PATCH, path, body).await?.json()
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        connection: &Connection,
        path: &str,
        body: Option<Body>,
    ) -> Result<T, RequestError> {
        self.send(connection, Method::DELETE, path, body).await?.json()
    }
}

/// Headers for a request on `connection`: its configured headers, a bearer
/// token unless an `Authorization` header is already configured, and a JSON
/// content type when there is a body.
fn request_headers(connection: &Connection, has_body: bool) -> Result<HeaderMap, RequestError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &connection.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| RequestError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| RequestError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        headers.append(header_name, header_value);
    }

    if !connection.auth_token.is_empty() && !headers.contains_key(AUTHORIZATION) {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", connection.auth_token))
            .map_err(|e| RequestError::InvalidHeader {
                name: AUTHORIZATION.to_string(),
                reason: e.to_string(),
            })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    if has_body && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    Ok(headers)
}

/// Render a request for debug output. Authorization values are redacted.
pub fn dump_request(method: &Method, url: &str, headers: &HeaderMap, body: Option<&[u8]>) -> String {
    let mut out = format!("{} {}\n", method, url);
    push_headers(&mut out, headers);
    if let Some(body) = body {
        out.push('\n');
        out.push_str(&render_body(body));
        out.push('\n');
    }
    out
}

/// Render a response for debug output, pretty-printing JSON bodies.
pub fn dump_response(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> String {
    let mut out = format!("{}\n", status);
    push_headers(&mut out, headers);
    if !body.is_empty() {
        out.push('\n');
        out.push_str(&render_body(body));
        out.push('\n');
    }
    out
}

fn push_headers(out: &mut String, headers: &HeaderMap) {
    for (name, value) in headers {
        let shown = if name == AUTHORIZATION || value.is_sensitive() {
            "<redacted>".to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        out.push_str(&format!("{}: {}\n", name, shown));
    }
}

fn render_body(body: &[u8]) -> String {
    pretty_json(body).unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

/// Pretty-print `body` if it parses as JSON.
pub fn pretty_json(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    serde_json::to_string_pretty(&value).ok()
}
