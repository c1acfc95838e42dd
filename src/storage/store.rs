use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWriteExt as _};

use crate::foundation::error::{CaptureError, CaptureResult};

/// Streamed object body handed to [`ObjectStore::put_stream`].
pub type UploadBody = Box<dyn AsyncRead + Send + Unpin>;

/// Object key of the form `<random>-<timestamp>.<ext>`.
///
/// Database records and the CDN depend on this exact shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageKey {
    random: String,
    timestamp_ms: i64,
    ext: String,
}

impl StorageKey {
    const RANDOM_LEN: usize = 12;

    /// Fresh key stamped with the current time.
    pub fn generate(ext: &str) -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self {
            random: random[..Self::RANDOM_LEN].to_string(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            ext: ext.trim_start_matches('.').to_string(),
        }
    }

    pub fn from_parts(random: &str, timestamp_ms: i64, ext: &str) -> CaptureResult<Self> {
        if random.is_empty() || !random.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CaptureError::validation(
                "storage key random part must be non-empty ascii alphanumeric",
            ));
        }
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CaptureError::validation(
                "storage key extension must be non-empty ascii alphanumeric",
            ));
        }
        Ok(Self {
            random: random.to_string(),
            timestamp_ms,
            ext: ext.to_string(),
        })
    }

    /// Parse a key previously rendered with `to_string`.
    pub fn parse(key: &str) -> CaptureResult<Self> {
        let bad = || CaptureError::validation(format!("malformed storage key '{key}'"));
        let (stem, ext) = key.rsplit_once('.').ok_or_else(bad)?;
        let (random, ts) = stem.split_once('-').ok_or_else(bad)?;
        let timestamp_ms = ts.parse::<i64>().map_err(|_| bad())?;
        Self::from_parts(random, timestamp_ms, ext)
    }

    /// Unique id of the capture: the key without its extension.
    pub fn id(&self) -> String {
        format!("{}-{}", self.random, self.timestamp_ms)
    }

    pub fn ext(&self) -> &str {
        &self.ext
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}.{}", self.random, self.timestamp_ms, self.ext)
    }
}

/// Substitute `{key}` in a media host template.
pub fn render_media_url(template: &str, key: &StorageKey) -> String {
    template.replace("{key}", &key.to_string())
}

/// Write sink for finished animations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream `body` into a staged object at `key`, returning the number of bytes stored.
    /// Staged objects are not reachable through [`ObjectStore::public_url`].
    async fn put_stream(
        &self,
        key: &StorageKey,
        content_type: &str,
        body: UploadBody,
    ) -> CaptureResult<u64>;

    /// Publish the staged object at `key`.
    async fn commit(&self, key: &StorageKey) -> CaptureResult<()>;

    /// Remove an object, staged or published; missing objects are not an error.
    async fn delete(&self, key: &StorageKey) -> CaptureResult<()>;

    /// Public URL of an object. Pure function of the key.
    fn public_url(&self, key: &StorageKey) -> String;
}

/// Object store backed by a local directory, fronted by a templated media host.
///
/// Objects are staged under a hidden temporary name and only renamed into place by
/// [`ObjectStore::commit`], so readers never see a partial or failed file.
#[derive(Clone, Debug)]
pub struct LocalDirStore {
    root: PathBuf,
    url_template: String,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>, url_template: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_template: url_template.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, key: &StorageKey) -> PathBuf {
        self.root.join(key.to_string())
    }

    fn partial_path(&self, key: &StorageKey) -> PathBuf {
        self.root.join(format!(".{key}.partial"))
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    async fn put_stream(
        &self,
        key: &StorageKey,
        _content_type: &str,
        mut body: UploadBody,
    ) -> CaptureResult<u64> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create storage root '{}'", self.root.display()))?;

        let partial = self.partial_path(key);
        let result: anyhow::Result<u64> = async {
            let mut file = tokio::fs::File::create(&partial)
                .await
                .with_context(|| format!("failed to create '{}'", partial.display()))?;
            let n = tokio::io::copy(&mut body, &mut file)
                .await
                .with_context(|| format!("failed to stream into '{}'", partial.display()))?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(n)
        }
        .await;

        match result {
            Ok(n) => {
                tracing::debug!(%key, bytes = n, "staged object");
                Ok(n)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(CaptureError::storage(format!("{e:#}")))
            }
        }
    }

    async fn commit(&self, key: &StorageKey) -> CaptureResult<()> {
        tokio::fs::rename(self.partial_path(key), self.object_path(key))
            .await
            .map_err(|e| CaptureError::storage(format!("failed to publish object '{key}': {e}")))?;
        tracing::debug!(%key, "published object");
        Ok(())
    }

    async fn delete(&self, key: &StorageKey) -> CaptureResult<()> {
        for path in [self.object_path(key), self.partial_path(key)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CaptureError::storage(format!(
                        "failed to delete '{}': {e}",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }

    fn public_url(&self, key: &StorageKey) -> String {
        render_media_url(&self.url_template, key)
    }
}

/// In-memory object store for tests and debugging.
#[derive(Debug)]
pub struct MemoryStore {
    url_template: String,
    objects: Mutex<Objects>,
}

#[derive(Debug, Default)]
struct Objects {
    staged: HashMap<String, StoredObject>,
    published: HashMap<String, StoredObject>,
}

/// Object held by a [`MemoryStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl MemoryStore {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            objects: Mutex::new(Objects::default()),
        }
    }

    /// A published object.
    pub fn get(&self, key: &StorageKey) -> Option<StoredObject> {
        self.lock().published.get(&key.to_string()).cloned()
    }

    pub fn is_staged(&self, key: &StorageKey) -> bool {
        self.lock().staged.contains_key(&key.to_string())
    }

    /// Number of published objects.
    pub fn len(&self) -> usize {
        self.lock().published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Objects> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory://{key}")
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_stream(
        &self,
        key: &StorageKey,
        content_type: &str,
        mut body: UploadBody,
    ) -> CaptureResult<u64> {
        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes)
            .await
            .map_err(|e| CaptureError::storage(format!("upload stream failed: {e}")))?;
        let n = bytes.len() as u64;
        self.lock().staged.insert(
            key.to_string(),
            StoredObject {
                content_type: content_type.to_string(),
                bytes,
            },
        );
        Ok(n)
    }

    async fn commit(&self, key: &StorageKey) -> CaptureResult<()> {
        let mut objects = self.lock();
        let obj = objects
            .staged
            .remove(&key.to_string())
            .ok_or_else(|| CaptureError::storage(format!("no staged object '{key}'")))?;
        objects.published.insert(key.to_string(), obj);
        Ok(())
    }

    async fn delete(&self, key: &StorageKey) -> CaptureResult<()> {
        let mut objects = self.lock();
        objects.staged.remove(&key.to_string());
        objects.published.remove(&key.to_string());
        Ok(())
    }

    fn public_url(&self, key: &StorageKey) -> String {
        render_media_url(&self.url_template, key)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/storage/store.rs"]
mod tests;
