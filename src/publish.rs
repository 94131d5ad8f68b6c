//! Idempotent variant uploads.
//!
//! Variant paths are derived from filename and width index, so a path that
//! already exists in the store is treated as published and never rewritten.
//! The existence check and the upload are not atomic against each other;
//! [`PathLocks`] serializes them per exact target path, which turns two
//! concurrent publishes of the same path into one upload plus one
//! already-present skip.

use crate::store::{ObjectMeta, ObjectStore, StoreError};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("existence check failed for {path}: {source}")]
    Check {
        path: String,
        #[source]
        source: StoreError,
    },
    #[error("upload failed for {path}: {source}")]
    Upload {
        path: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Uploaded,
    AlreadyPresent,
}

/// Lazily populated table of per-path async locks.
///
/// The map is sharded, so creating a slot only contends with paths in the
/// same shard, and no map lock is held while a slot is awaited. A slot is
/// dropped from the table when its last guard is released with nobody
/// else waiting, so the table only holds paths that are in use.
#[derive(Default)]
pub struct PathLocks {
    slots: DashMap<String, Arc<Mutex<()>>>,
}

/// Exclusive access to one path. Releases the lock, and evicts the slot
/// if it is idle, on drop.
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the slot, so a count of 1 means only the
        // table refers to it. The shard lock keeps new lockers out meanwhile.
        self.locks
            .slots
            .remove_if(self.path.as_str(), |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`. Released when the guard drops.
    pub async fn lock(&self, path: &str) -> PathGuard<'_> {
        let slot = self.slots.entry(path.to_string()).or_default().clone();
        let guard = slot.lock_owned().await;
        PathGuard {
            locks: self,
            path: path.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of paths currently held or waited on.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

pub struct Publisher {
    store: Arc<dyn ObjectStore>,
    locks: PathLocks,
    cache_control: String,
}

impl Publisher {
    pub fn new(store: Arc<dyn ObjectStore>, cache_control: impl Into<String>) -> Self {
        Self {
            store,
            locks: PathLocks::new(),
            cache_control: cache_control.into(),
        }
    }

    /// Upload `bytes` to `path` unless something is already there.
    pub async fn publish(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<PublishOutcome, PublishError> {
        let _guard = self.locks.lock(path).await;

        let exists = self
            .store
            .exists(path)
            .await
            .map_err(|source| PublishError::Check {
                path: path.to_string(),
                source,
            })?;
        if exists {
            debug!(path, "already published");
            return Ok(PublishOutcome::AlreadyPresent);
        }

        let meta = ObjectMeta {
            content_type: content_type.to_string(),
            cache_control: self.cache_control.clone(),
        };
        self.store
            .put(path, bytes, &meta)
            .await
            .map_err(|source| PublishError::Upload {
                path: path.to_string(),
                source,
            })?;
        debug!(path, store = self.store.name(), "uploaded");
        Ok(PublishOutcome::Uploaded)
    }
}
