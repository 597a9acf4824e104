//! Remote endpoint the queued mutations are replayed against.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use repsync_cache::Fetch;
use repsync_common::{Error, HttpRequest, Method, MutationKind, Result};

/// Longest response body echoed into a rejection message.
const MAX_ERROR_BODY: usize = 200;

/// Accepts one logical write per call.
///
/// Must report success or failure unambiguously; the API is assumed to be
/// idempotent per logical mutation.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Submit a single mutation.
    ///
    /// # Errors
    /// - [`Error::Network`] when the endpoint cannot be reached
    /// - [`Error::Rejected`] when it answers with a non-success status
    async fn submit(&self, kind: MutationKind, payload: &serde_json::Value) -> Result<()>;
}

/// Where each mutation kind is posted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL of the API server.
    pub base_url: String,
    pub set_path: String,
    pub session_action_path: String,
    pub weight_log_path: String,
}

impl EndpointConfig {
    /// Path a kind is posted to.
    pub fn path_for(&self, kind: MutationKind) -> &str {
        match kind {
            MutationKind::SetWrite => &self.set_path,
            MutationKind::SessionAction => &self.session_action_path,
            MutationKind::WeightLogWrite => &self.weight_log_path,
        }
    }

    /// Absolute URL a kind is posted to.
    ///
    /// # Errors
    /// - Base URL or path is not a valid URL
    pub fn url_for(&self, kind: MutationKind) -> Result<Url> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("Invalid base URL {}: {}", self.base_url, e)))?;
        base.join(self.path_for(kind))
            .map_err(|e| Error::Config(format!("Invalid path for {}: {}", kind, e)))
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            set_path: "/api/sets".to_string(),
            session_action_path: "/api/sessions/actions".to_string(),
            weight_log_path: "/api/weight-logs".to_string(),
        }
    }
}

/// Posts mutations as JSON over any [`Fetch`] transport.
///
/// In production the transport is the intercept layer, which routes these
/// writes straight to the network.
pub struct HttpEndpoint {
    fetch: Arc<dyn Fetch>,
    config: EndpointConfig,
}

impl HttpEndpoint {
    pub fn new(fetch: Arc<dyn Fetch>, config: EndpointConfig) -> Self {
        Self { fetch, config }
    }
}

#[async_trait]
impl RemoteEndpoint for HttpEndpoint {
    async fn submit(&self, kind: MutationKind, payload: &serde_json::Value) -> Result<()> {
        let url = self.config.url_for(kind)?;
        let request = HttpRequest::json(Method::Post, url, payload)?
            .with_header("accept", "application/json");

        let response = self.fetch.fetch(request).await?;
        if response.is_success() {
            debug!("{} accepted with {}", kind, response.status);
            return Ok(());
        }

        let mut message = response.text();
        if message.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        Err(Error::Rejected {
            status: response.status,
            message,
        })
    }
}
