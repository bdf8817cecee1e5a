//! Local storage for opaque license material
//!
//! The platform's secure store is consumed through the narrow
//! [`LicenseStore`] interface: save, load, remove, exists, keyed by asset
//! URI. License bytes are opaque to this crate.

use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::error;

/// Narrow interface to the local license-material store
#[async_trait]
pub trait LicenseStore: Send + Sync {
    async fn save(&self, key: &str, value: Bytes) -> Result<()>;
    async fn load(&self, key: &str) -> Result<Option<Bytes>>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> bool;
}

/// File-per-key store under a single directory.
///
/// Keys are asset URIs; each is encoded to a flat filename. Writes go
/// through a temp file and rename so a crash never leaves a torn license.
pub struct FsLicenseStore {
    dir: PathBuf,
}

impl FsLicenseStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lic", URL_SAFE_NO_PAD.encode(key)))
    }
}

#[async_trait]
impl LicenseStore for FsLicenseStore {
    async fn save(&self, key: &str, value: Bytes) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("lic.tmp");
        tokio::fs::write(&tmp, &value)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    async fn load(&self, key: &str) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.path_for(key))
            .await
            .unwrap_or(false)
    }
}

/// In-memory store, used in tests and by embedders without a secure store
#[derive(Default)]
pub struct MemoryLicenseStore {
    entries: RwLock<HashMap<String, Bytes>>,
}

impl MemoryLicenseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LicenseStore for MemoryLicenseStore {
    async fn save(&self, key: &str, value: Bytes) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Storage("store lock poisoned".to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Bytes>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::Storage("store lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::Storage("store lock poisoned".to_string()))?;
        entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }
}

/// No-op store for DRM-less configurations; logs every call
pub struct NullLicenseStore;

#[async_trait]
impl LicenseStore for NullLicenseStore {
    async fn save(&self, _key: &str, _value: Bytes) -> Result<()> {
        error!("License store not configured");
        Ok(())
    }

    async fn load(&self, _key: &str) -> Result<Option<Bytes>> {
        error!("License store not configured");
        Ok(None)
    }

    async fn remove(&self, _key: &str) -> Result<()> {
        error!("License store not configured");
        Ok(())
    }

    async fn exists(&self, _key: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryLicenseStore::new();
        let key = "https://cdn.example.com/a1.wvm";

        assert!(!store.exists(key).await);
        store.save(key, Bytes::from_static(b"license-bytes")).await.unwrap();
        assert!(store.exists(key).await);
        assert_eq!(
            store.load(key).await.unwrap(),
            Some(Bytes::from_static(b"license-bytes"))
        );

        store.remove(key).await.unwrap();
        assert!(!store.exists(key).await);
        assert_eq!(store.load(key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLicenseStore::new(dir.path());
        let key = "https://cdn.example.com/a1.wvm";

        store.save(key, Bytes::from_static(b"opaque")).await.unwrap();
        assert!(store.exists(key).await);
        assert_eq!(
            store.load(key).await.unwrap(),
            Some(Bytes::from_static(b"opaque"))
        );

        store.remove(key).await.unwrap();
        assert!(!store.exists(key).await);
    }

    #[tokio::test]
    async fn test_fs_store_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLicenseStore::new(dir.path());
        store.remove("never-saved").await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_store_key_encoding_is_filename_safe() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsLicenseStore::new(dir.path());
        // URI contains path separators and query characters
        let key = "https://cdn.example.com/movies/a1.wvm?session=3/4&x=%20";
        store.save(key, Bytes::from_static(b"v")).await.unwrap();
        assert!(store.exists(key).await);
    }

    #[tokio::test]
    async fn test_null_store_loads_nothing() {
        let store = NullLicenseStore;
        store.save("k", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), None);
        assert!(!store.exists("k").await);
    }
}
