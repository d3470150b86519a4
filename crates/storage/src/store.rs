use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::hash::Version;

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Store operation on '{key}' timed out after {after:?}")]
    Timeout { key: String, after: Duration },
    #[error("Write conflict on '{key}': document changed since it was read")]
    Conflict { key: String },
    #[error("Invalid store key '{0}'")]
    InvalidKey(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cannot decode '{key}' line {line}: {reason}")]
    Decode {
        key: String,
        line: u64,
        reason: String,
    },
}

/// A stored document together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub data: Vec<u8>,
    pub version: Version,
}

/// Precondition on the current state of a key for a write to go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expect {
    Any,
    Absent,
    Version(Version),
}

impl Expect {
    /// The precondition that a write based on `read` holds.
    pub fn from_read(read: Option<&Versioned>) -> Self {
        match read {
            Some(v) => Expect::Version(v.version.clone()),
            None => Expect::Absent,
        }
    }

    fn admits(&self, current: Option<&Version>) -> bool {
        match (self, current) {
            (Expect::Any, _) => true,
            (Expect::Absent, None) => true,
            (Expect::Version(want), Some(have)) => want == have,
            _ => false,
        }
    }
}

/// Whole-document storage addressed by slash-separated keys (`silver/credit.csv`).
/// Writes replace the document atomically; readers never see a partial write.
#[async_trait]
pub trait Store: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    /// Replaces the document at `key` if `expect` holds, returning the new version.
    async fn write(&self, key: &str, data: Vec<u8>, expect: Expect) -> Result<Version, StoreError>;
}

fn validate_key(key: &str) -> Result<PathBuf, StoreError> {
    let path = Path::new(key);
    let plain = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(path.to_path_buf())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Documents as files under a root directory.
pub struct FsStore {
    root: PathBuf,
    io_timeout: Duration,
    write_lock: Mutex<()>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            io_timeout: DEFAULT_IO_TIMEOUT,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(validate_key(key)?))
    }

    async fn bounded<T, F>(&self, key: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(result) => result.map_err(|source| StoreError::Io {
                key: key.to_string(),
                source,
            }),
            Err(_) => Err(StoreError::Timeout {
                key: key.to_string(),
                after: self.io_timeout,
            }),
        }
    }

    async fn read_path(&self, key: &str, path: &Path) -> Result<Option<Versioned>, StoreError> {
        let read = self
            .bounded(key, async {
                match tokio::fs::read(path).await {
                    Ok(data) => Ok(Some(data)),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(read.map(|data| Versioned {
            version: Version::of(&data),
            data,
        }))
    }
}

#[async_trait]
impl Store for FsStore {
    async fn read(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let path = self.path_for(key)?;
        self.read_path(key, &path).await
    }

    async fn write(&self, key: &str, data: Vec<u8>, expect: Expect) -> Result<Version, StoreError> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;

        let current = self.read_path(key, &path).await?;
        if !expect.admits(current.as_ref().map(|v| &v.version)) {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        let version = Version::of(&data);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
        self.bounded(key, async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&tmp, &data).await?;
            tokio::fs::rename(&tmp, &path).await
        })
        .await?;
        debug!(key, version = %version, bytes = data.len(), "Document written");
        Ok(version)
    }
}

/// In-process store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.docs.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        validate_key(key)?;
        Ok(self.docs.lock().await.get(key).map(|data| Versioned {
            version: Version::of(data),
            data: data.clone(),
        }))
    }

    async fn write(&self, key: &str, data: Vec<u8>, expect: Expect) -> Result<Version, StoreError> {
        validate_key(key)?;
        let mut docs = self.docs.lock().await;
        let current = docs.get(key).map(|d| Version::of(d));
        if !expect.admits(current.as_ref()) {
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }
        let version = Version::of(&data);
        docs.insert(key.to_string(), data);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise(store: &dyn Store) {
        assert!(store.read("gold/credit.csv").await.unwrap().is_none());

        let v1 = store
            .write("gold/credit.csv", b"a".to_vec(), Expect::Absent)
            .await
            .unwrap();
        let read = store.read("gold/credit.csv").await.unwrap().unwrap();
        assert_eq!(read.data, b"a");
        assert_eq!(read.version, v1);

        // A writer holding a stale version loses.
        store
            .write("gold/credit.csv", b"b".to_vec(), Expect::Version(v1.clone()))
            .await
            .unwrap();
        let err = store
            .write("gold/credit.csv", b"c".to_vec(), Expect::Version(v1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        let err = store
            .write("gold/credit.csv", b"c".to_vec(), Expect::Absent)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        store
            .write("gold/credit.csv", b"d".to_vec(), Expect::Any)
            .await
            .unwrap();
        assert_eq!(store.read("gold/credit.csv").await.unwrap().unwrap().data, b"d");
    }

    #[tokio::test]
    async fn memory_store_versions() {
        exercise(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn fs_store_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path());
        exercise(&store).await;
        assert!(dir.path().join("gold/credit.csv").exists());
        // No temp files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("gold"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_root() {
        let store = MemoryStore::new();
        for key in ["", "../x", "/etc/passwd", "a/../../b"] {
            assert!(matches!(
                store.read(key).await,
                Err(StoreError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn zero_timeout_surfaces_as_timeout_or_success() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path()).with_io_timeout(Duration::ZERO);
        match store.write("overrides.json", b"{}".to_vec(), Expect::Any).await {
            Ok(_) | Err(StoreError::Timeout { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
