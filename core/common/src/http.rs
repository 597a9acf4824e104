//! Request and response shapes passed between the network layer and its callers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RequestMode {
    /// A top-level page navigation.
    Navigate,
    /// Any programmatic fetch.
    #[default]
    Fetch,
}

/// An outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
}

impl HttpRequest {
    /// Create a request with no headers or body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
            mode: RequestMode::Fetch,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// Create a navigation GET request.
    pub fn navigate(url: Url) -> Self {
        let mut request = Self::get(url);
        request.mode = RequestMode::Navigate;
        request
    }

    /// Create a request carrying a JSON body.
    pub fn json(method: Method, url: Url, body: &serde_json::Value) -> crate::Result<Self> {
        let mut request = Self::new(method, url);
        request.body = Some(Bytes::from(serde_json::to_vec(body)?));
        request
            .headers
            .push(("content-type".to_string(), "application/json".to_string()));
        Ok(request)
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Key used to look the request up in a cache namespace.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// A response received from the network or served from a cache.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Look up a header value (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_includes_method() {
        let url = Url::parse("https://app.example/api/sessions").unwrap();
        let get = HttpRequest::get(url.clone());
        let post = HttpRequest::new(Method::Post, url);
        assert_ne!(get.cache_key(), post.cache_key());
        assert_eq!(get.cache_key(), "GET https://app.example/api/sessions");
    }

    #[test]
    fn test_success_range() {
        assert!(HttpResponse::new(204, Bytes::new()).is_success());
        assert!(!HttpResponse::new(304, Bytes::new()).is_success());
        assert!(!HttpResponse::new(500, Bytes::new()).is_success());
    }

    #[test]
    fn test_json_request_sets_content_type() {
        let url = Url::parse("https://app.example/api/sets").unwrap();
        let req = HttpRequest::json(Method::Post, url, &serde_json::json!({"reps": 5})).unwrap();
        assert_eq!(req.headers[0].1, "application/json");
        assert!(req.body.is_some());
    }
}
