//! Cache substrate trait definition.

use async_trait::async_trait;

use repsync_common::{HttpResponse, Result};

/// Named cache namespaces holding request-key to response pairs.
///
/// Independent from the mutation queue's storage.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Look up a stored response.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<HttpResponse>>;

    /// Store a response, replacing any previous entry. Creates the
    /// namespace if needed.
    async fn put(&self, namespace: &str, key: &str, response: &HttpResponse) -> Result<()>;

    /// Names of every existing namespace.
    async fn namespaces(&self) -> Result<Vec<String>>;

    /// Drop a namespace and all its entries. Returns whether it existed.
    async fn delete_namespace(&self, namespace: &str) -> Result<bool>;
}
