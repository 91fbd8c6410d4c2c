//! Object store capability with filesystem and in-memory backends.
//!
//! `put` is atomic from the caller's perspective: a concurrent `get` sees
//! either the previous object or the complete new one, never a partial blob.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Errors raised by object store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No object exists at the requested location.
    #[error("Object not found: {bucket}/{path}")]
    NotFound { bucket: String, path: String },

    /// Object path escapes the bucket or is otherwise unusable.
    #[error("Invalid object path: {0}")]
    InvalidPath(String),

    /// Object exists but its contents could not be decoded.
    #[error("Malformed object {path}: {reason}")]
    Decode { path: String, reason: String },

    /// IO error from the backing filesystem.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Bucketed byte storage.
pub trait ObjectStore: Send + Sync {
    /// Fetch the full contents of an object.
    fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Store an object, replacing any existing one atomically.
    fn put(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// List object paths in `bucket` starting with `prefix`, sorted.
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        (**self).get(bucket, path)
    }

    fn put(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        (**self).put(bucket, path, bytes)
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).list(bucket, prefix)
    }
}

/// Object store backed by a local directory: `{root}/{bucket}/{path}`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`. The directory is created lazily on `put`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes {
            return Err(StoreError::InvalidPath(format!("{bucket}/{path}")));
        }
        Ok(self.root.join(bucket).join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        let full = self.object_path(bucket, path)?;
        match std::fs::read(&full) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let full = self.object_path(bucket, path)?;
        let parent = full
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(format!("{bucket}/{path}")))?;
        std::fs::create_dir_all(parent)?;

        // Write next to the target, then rename over it.
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&full).map_err(|e| e.error)?;

        tracing::debug!(bucket, path, bytes = bytes.len(), "Stored object");
        Ok(())
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let bucket_dir = self.root.join(bucket);
        if !bucket_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        let mut pending = vec![bucket_dir.clone()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&bucket_dir) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    found.push(key);
                }
            }
        }

        found.sort();
        Ok(found)
    }
}

/// In-memory object store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects across all buckets.
    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| std::io::Error::other("object map lock poisoned"))?;
        objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            })
    }

    fn put(&self, bucket: &str, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| std::io::Error::other("object map lock poisoned"))?;
        objects.insert((bucket.to_string(), path.to_string()), bytes.to_vec());
        Ok(())
    }

    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| std::io::Error::other("object map lock poisoned"))?;
        Ok(objects
            .keys()
            .filter(|(b, p)| b == bucket && p.starts_with(prefix))
            .map(|(_, p)| p.clone())
            .collect())
    }
}
