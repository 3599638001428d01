//! HTTP request/response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered header list
///
/// Keeps insertion order and allows duplicate names. Lookups are
/// case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// First value for a header name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for a header name, in order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Replace every value of `name` with a single value
    pub fn set(&mut self, name: &str, value: &str) {
        match self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(pos) => {
                self.0[pos].1 = value.to_string();
                let mut idx = 0;
                self.0.retain(|(k, _)| {
                    let keep = idx <= pos || !k.eq_ignore_ascii_case(name);
                    idx += 1;
                    keep
                });
            }
            None => self.append(name, value),
        }
    }

    /// Add a header without touching existing ones
    pub fn append(&mut self, name: &str, value: &str) {
        self.0.push((name.to_string(), value.to_string()));
    }

    /// Remove every header with this name
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.0.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<(String, String)>> for Headers {
    fn from(fields: Vec<(String, String)>) -> Self {
        Self(fields)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Headers {
    fn from(fields: [(&str, &str); N]) -> Self {
        Self(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// HTTP request as seen by the proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub http_version: String,
    pub headers: Headers,
    pub trailers: Option<Headers>,

    /// Raw (still encoded) body. `None` means the body was never captured,
    /// which is different from an empty body.
    pub content: Option<Vec<u8>>,

    pub timestamp_start: DateTime<Utc>,
    pub timestamp_end: Option<DateTime<Utc>>,
}

impl Request {
    pub fn new(method: &str, scheme: &str, host: &str, port: u16, path: &str) -> Self {
        Self {
            method: method.to_string(),
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
            http_version: "HTTP/1.1".to_string(),
            headers: Headers::new(),
            trailers: None,
            content: Some(Vec::new()),
            timestamp_start: Utc::now(),
            timestamp_end: None,
        }
    }

    /// Host header if present, otherwise the connection host
    pub fn pretty_host(&self) -> &str {
        self.headers.get("host").unwrap_or(&self.host)
    }

    pub fn url(&self) -> String {
        let default_port = matches!(
            (self.scheme.as_str(), self.port),
            ("http", 80) | ("https", 443)
        );
        if default_port {
            format!("{}://{}{}", self.scheme, self.host, self.path)
        } else {
            format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
        }
    }
}

/// HTTP response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub http_version: String,
    pub status_code: u16,
    pub reason: String,
    pub headers: Headers,
    pub trailers: Option<Headers>,
    pub content: Option<Vec<u8>>,
    pub timestamp_start: DateTime<Utc>,
    pub timestamp_end: Option<DateTime<Utc>>,
}

impl Response {
    pub fn new(status_code: u16, reason: &str) -> Self {
        Self {
            http_version: "HTTP/1.1".to_string(),
            status_code,
            reason: reason.to_string(),
            headers: Headers::new(),
            trailers: None,
            content: Some(Vec::new()),
            timestamp_start: Utc::now(),
            timestamp_end: None,
        }
    }
}

/// Either half of an HTTP exchange, for code that treats both alike
pub trait Message {
    fn headers(&self) -> &Headers;
    fn headers_mut(&mut self) -> &mut Headers;
    fn content(&self) -> Option<&[u8]>;
    fn set_raw_content(&mut self, content: Option<Vec<u8>>);

    fn content_type(&self) -> Option<&str> {
        self.headers().get("content-type")
    }

    fn content_encoding(&self) -> Option<&str> {
        self.headers().get("content-encoding")
    }
}

impl Message for Request {
    fn headers(&self) -> &Headers {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
    fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }
    fn set_raw_content(&mut self, content: Option<Vec<u8>>) {
        self.content = content;
    }
}

impl Message for Response {
    fn headers(&self) -> &Headers {
        &self.headers
    }
    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
    fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }
    fn set_raw_content(&mut self, content: Option<Vec<u8>>) {
        self.content = content;
    }
}
