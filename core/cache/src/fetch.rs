//! Network transport abstraction.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use repsync_common::{Error, HttpRequest, HttpResponse, Method, Result};

/// Something that can carry a request to the network.
///
/// A non-2xx answer is still `Ok`; only transport failures (no connectivity,
/// DNS, timeout) are errors, reported as [`Error::Network`].
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`Fetch`] implementation backed by `reqwest`.
pub struct ReqwestFetch {
    http: reqwest::Client,
}

impl ReqwestFetch {
    /// Create a transport with the given per-request timeout.
    ///
    /// # Errors
    /// - HTTP client could not be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("repsync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!("{} {}", request.method, request.url);

        let mut builder = self
            .http
            .request(to_reqwest_method(request.method), request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} {} failed: {}", request.method, request.url, e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response body: {}", e)))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_mapping() {
        assert_eq!(to_reqwest_method(Method::Get), reqwest::Method::GET);
        assert_eq!(to_reqwest_method(Method::Patch), reqwest::Method::PATCH);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let fetch = ReqwestFetch::new(Duration::from_millis(500)).unwrap();
        let url = url::Url::parse("http://127.0.0.1:9/api/sets").unwrap();

        let err = fetch.fetch(HttpRequest::get(url)).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}
