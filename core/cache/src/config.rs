//! Cache layer configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the intercept layer and its cache namespaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix shared by every namespace this application owns.
    pub prefix: String,
    /// Cache version. Changing it retires both namespaces on activation.
    pub version: String,
    /// URL path prefix identifying API resources.
    pub api_prefix: String,
    /// Document served to navigations when both cache and network miss.
    pub root_document: String,
    /// Static asset paths fetched into the asset cache on install.
    pub precache: Vec<String>,
}

impl CacheConfig {
    /// Namespace holding static application assets.
    pub fn static_namespace(&self) -> String {
        format!("{}-static-{}", self.prefix, self.version)
    }

    /// Namespace holding API read responses.
    pub fn api_namespace(&self) -> String {
        format!("{}-api-{}", self.prefix, self.version)
    }

    /// Whether a URL path belongs to the API.
    pub fn is_api_path(&self, path: &str) -> bool {
        path.starts_with(&self.api_prefix)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: "repsync".to_string(),
            version: "v1".to_string(),
            api_prefix: "/api/".to_string(),
            root_document: "/".to_string(),
            precache: Vec::new(),
        }
    }
}
