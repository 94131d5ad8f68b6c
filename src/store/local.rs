//! Local filesystem object store.
//!
//! Objects are plain files under a root directory, written with `tokio::fs`.
//! A filesystem has nowhere to keep HTTP headers, so each object gets a
//! `<object>.meta.json` sidecar holding its [`ObjectMeta`] for whatever
//! deploys the tree. Sidecars never show up in listings.

use super::{ObjectInfo, ObjectMeta, ObjectStore, StoreError, validate_path};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        if root.exists() && !root.is_dir() {
            return Err(StoreError::Config(format!(
                "store root {} is not a directory",
                root.display()
            )));
        }
        // One-off at startup, not worth an async constructor
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }

    fn sidecar_path(absolute: &Path) -> PathBuf {
        let mut name = absolute.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    /// Read back the metadata sidecar of `path`.
    pub async fn meta(&self, path: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let sidecar = Self::sidecar_path(&self.absolute_path(path)?);
        match fs::read(&sidecar).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("{}: {e}", sidecar.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: sidecar,
                source,
            }),
        }
    }

    fn created(metadata: &Metadata) -> Option<DateTime<Utc>> {
        metadata
            .created()
            .or_else(|_| metadata.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    }

    fn relative_key(&self, absolute: &Path) -> Option<String> {
        let rel = absolute.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
        Some(parts?.join("/"))
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let absolute = self.absolute_path(path)?;
        fs::try_exists(&absolute).await.map_err(io_err(&absolute))
    }

    async fn put(&self, path: &str, bytes: Vec<u8>, meta: &ObjectMeta) -> Result<(), StoreError> {
        let absolute = self.absolute_path(path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }

        // Readers never observe a half-written variant
        let mut partial = absolute.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        fs::write(&partial, &bytes).await.map_err(io_err(&partial))?;
        if let Err(source) = fs::rename(&partial, &absolute).await {
            if let Err(e) = fs::remove_file(&partial).await {
                warn!(path = %partial.display(), error = %e, "failed to remove partial upload");
            }
            return Err(StoreError::Io {
                path: absolute,
                source,
            });
        }

        let sidecar = Self::sidecar_path(&absolute);
        let json = serde_json::to_vec_pretty(meta)
            .map_err(|e| StoreError::Backend(format!("{}: {e}", sidecar.display())))?;
        fs::write(&sidecar, json).await.map_err(io_err(&sidecar))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StoreError> {
        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(StoreError::Io { path: dir, source }),
            };
            while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
                let path = entry.path();
                let metadata = entry.metadata().await.map_err(io_err(&path))?;
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                // Broken symlinks and other oddities are skipped
                if !metadata.is_file() {
                    continue;
                }
                let Some(key) = self.relative_key(&path) else {
                    continue;
                };
                if key.ends_with(SIDECAR_SUFFIX) || key.ends_with(".partial") {
                    continue;
                }
                if key.starts_with(prefix) {
                    found.push(ObjectInfo {
                        path: key,
                        created: Self::created(&metadata),
                    });
                }
            }
        }

        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta() -> ObjectMeta {
        ObjectMeta {
            content_type: "image/jpeg".into(),
            cache_control: "public, max-age=31536000, immutable".into(),
        }
    }

    #[tokio::test]
    async fn put_then_exists() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path()).unwrap();

        assert!(!store.exists("images/a.jpeg_0.jpeg").await.unwrap());
        store
            .put("images/a.jpeg_0.jpeg", b"jpeg".to_vec(), &meta())
            .await
            .unwrap();
        assert!(store.exists("images/a.jpeg_0.jpeg").await.unwrap());
        assert_eq!(
            std::fs::read(tmp.path().join("images/a.jpeg_0.jpeg")).unwrap(),
            b"jpeg"
        );
    }

    #[tokio::test]
    async fn put_writes_metadata_sidecar() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path()).unwrap();
        store
            .put("images/a.jpeg", b"x".to_vec(), &meta())
            .await
            .unwrap();

        assert_eq!(store.meta("images/a.jpeg").await.unwrap(), Some(meta()));
        assert!(tmp.path().join("images/a.jpeg.meta.json").exists());
        assert_eq!(store.meta("images/other.jpeg").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites_existing_object() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path()).unwrap();
        store.put("a.jpeg", b"old".to_vec(), &meta()).await.unwrap();
        store.put("a.jpeg", b"new".to_vec(), &meta()).await.unwrap();
        assert_eq!(std::fs::read(tmp.path().join("a.jpeg")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_hides_sidecars() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path()).unwrap();
        for path in [
            "images/b.jpeg_0.jpeg",
            "images/a.jpeg",
            "images/nested/c.jpeg",
            "other/d.jpeg",
        ] {
            store.put(path, b"x".to_vec(), &meta()).await.unwrap();
        }

        let listed: Vec<String> = store
            .list("images/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.path)
            .collect();
        assert_eq!(
            listed,
            vec![
                "images/a.jpeg",
                "images/b.jpeg_0.jpeg",
                "images/nested/c.jpeg"
            ]
        );
    }

    #[tokio::test]
    async fn list_reports_creation_time() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path()).unwrap();
        store.put("images/a.jpeg", b"x".to_vec(), &meta()).await.unwrap();
        let listed = store.list("images/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].created.is_some());
    }

    #[tokio::test]
    async fn rejects_paths_outside_root() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().join("root")).unwrap();
        let err = store
            .put("../escape.jpeg", b"x".to_vec(), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
        assert!(!tmp.path().join("escape.jpeg").exists());
    }

    #[tokio::test]
    async fn failed_rename_removes_partial_file() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path()).unwrap();
        // A non-empty directory at the target path makes the rename fail
        let target = tmp.path().join("images/a.jpeg");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("keep"), "x").unwrap();

        let err = store
            .put("images/a.jpeg", b"x".to_vec(), &meta())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!tmp.path().join("images/a.jpeg.partial").exists());
        assert!(!tmp.path().join("images/a.jpeg.meta.json").exists());
    }

    #[test]
    fn root_must_be_a_directory() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("file");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            LocalStore::new(&file),
            Err(StoreError::Config(_))
        ));
    }
}
