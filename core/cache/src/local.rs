//! Filesystem cache substrate.

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use blake2::{Blake2s256, Digest};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use repsync_common::{Error, HttpResponse, Result};

use crate::substrate::CacheStorage;

/// On-disk form of a cached response.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    status: u16,
    headers: Vec<(String, String)>,
    /// Base64-encoded body.
    body: String,
    stored_at: DateTime<Utc>,
}

/// Cache storage rooted at a local directory.
///
/// Each namespace is a subdirectory; each entry is a JSON file named by the
/// BLAKE2 digest of its request key.
pub struct LocalCacheStorage {
    root: PathBuf,
}

impl LocalCacheStorage {
    /// Create a storage rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// - Directory cannot be created
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf> {
        if !is_valid_namespace(namespace) {
            return Err(Error::InvalidInput(format!(
                "Invalid cache namespace: {}",
                namespace
            )));
        }
        Ok(self.root.join(namespace))
    }

    fn entry_path(&self, namespace: &str, key: &str) -> Result<PathBuf> {
        let digest = Blake2s256::digest(key.as_bytes());
        let name = format!("{}.json", URL_SAFE_NO_PAD.encode(digest));
        Ok(self.namespace_dir(namespace)?.join(name))
    }
}

fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && namespace != "."
        && namespace != ".."
}

#[async_trait]
impl CacheStorage for LocalCacheStorage {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<HttpResponse>> {
        let path = self.entry_path(namespace, key)?;
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let entry: StoredEntry = serde_json::from_slice(&content)?;
        // Digest collisions are not expected, but never serve a foreign entry.
        if entry.key != key {
            return Ok(None);
        }

        let body = STANDARD
            .decode(entry.body)
            .map_err(|e| Error::Cache(format!("Corrupt cache entry {}: {}", path.display(), e)))?;

        Ok(Some(HttpResponse {
            status: entry.status,
            headers: entry.headers,
            body: Bytes::from(body),
        }))
    }

    async fn put(&self, namespace: &str, key: &str, response: &HttpResponse) -> Result<()> {
        let dir = self.namespace_dir(namespace)?;
        fs::create_dir_all(&dir).await?;

        let entry = StoredEntry {
            key: key.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            body: STANDARD.encode(&response.body),
            stored_at: Utc::now(),
        };
        let content = serde_json::to_vec(&entry)?;

        let path = self.entry_path(namespace, key)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Cached {} in {}", key, namespace);
        Ok(())
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_valid_namespace(&name) {
                names.push(name);
            } else {
                debug!("Ignoring foreign directory {} in cache root", name);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
        let dir = self.namespace_dir(namespace)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
