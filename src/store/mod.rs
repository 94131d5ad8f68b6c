//! Object store abstraction for published variants.
//!
//! The pipeline needs exactly three things from wherever variants end up:
//! an existence check, a write carrying content type and cache policy, and a
//! prefix listing (used to rebuild the cache from what is already
//! published). [`ObjectStore`] is that seam.
//!
//! | Backend | Feature | Target |
//! |---|---|---|
//! | [`LocalStore`] | always | directory tree, metadata in `.meta.json` sidecars |
//! | `S3Store` | `s3` | S3-compatible bucket via `aws-sdk-s3` |
//!
//! Paths are `/`-separated keys relative to the store root, e.g.
//! `images/photo.jpeg_0.jpeg`.

mod local;
#[cfg(feature = "s3")]
mod s3;

pub use local::LocalStore;
#[cfg(feature = "s3")]
pub use s3::S3Store;

use crate::config::{StoreBackend, StoreConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid object path: {0}")]
    InvalidPath(String),
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("store configuration error: {0}")]
    Config(String),
}

/// HTTP metadata stored alongside an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub content_type: String,
    pub cache_control: String,
}

/// One listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub path: String,
    /// Creation time when the backend reports one.
    pub created: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name, for log lines.
    fn name(&self) -> &str;

    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// Create or overwrite `path`.
    async fn put(&self, path: &str, bytes: Vec<u8>, meta: &ObjectMeta) -> Result<(), StoreError>;

    /// Every object whose path starts with `prefix`, sorted by path.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError>;
}

/// Reject keys that are empty, absolute, or climb out of the store root.
pub fn validate_path(path: &str) -> Result<(), StoreError> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Construct the configured backend.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    match config.backend {
        StoreBackend::Local => Ok(Arc::new(LocalStore::new(&config.root)?)),
        #[cfg(feature = "s3")]
        StoreBackend::S3 => Ok(Arc::new(S3Store::from_config(config).await?)),
        #[cfg(not(feature = "s3"))]
        StoreBackend::S3 => Err(StoreError::Config(
            "this build has no S3 support (enable the `s3` feature)".into(),
        )),
    }
}
