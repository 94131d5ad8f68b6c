//! Cache maintenance: rebuild from the store, verification, repair, export.
//!
//! These run instead of a publishing pass, never alongside one, so they are
//! free to save the cache themselves.

use crate::cache::{CacheEntry, CacheError, ContentCache};
use crate::config::ImagesConfig;
use crate::naming::{base_filename, variant_paths};
use crate::store::{ObjectStore, StoreError};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum MaintenanceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("export failed: {0}")]
    Export(#[from] serde_json::Error),
}

// ============================================================================
// Rebuild
// ============================================================================

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// Objects listed under the prefix.
    pub objects: usize,
    /// Distinct source filenames inferred from them.
    pub discovered: usize,
    /// Filenames that were not cached yet and got an entry.
    pub added: usize,
    /// Listed paths that do not look like variants.
    pub unrecognized: Vec<String>,
}

/// Repopulate the cache from what is already published.
///
/// Every object under `<prefix>/` is mapped back to its source filename.
/// Filenames not yet cached get an entry with no hash and no dimensions,
/// the discovered variant paths (sorted), and the earliest creation time
/// among them. Existing entries are left alone. The cache is saved once.
pub async fn rebuild(
    cache: &ContentCache,
    store: &dyn ObjectStore,
    images: &ImagesConfig,
) -> Result<RebuildReport, MaintenanceError> {
    let prefix = format!("{}/", images.prefix.trim_end_matches('/'));
    let objects = store.list(&prefix).await?;

    let mut report = RebuildReport {
        objects: objects.len(),
        ..RebuildReport::default()
    };
    let mut found: BTreeMap<String, (Vec<String>, Option<i64>)> = BTreeMap::new();
    for object in objects {
        let Some(base) = base_filename(&object.path, &images.prefix, &images.widths) else {
            debug!(path = %object.path, "not a variant path");
            report.unrecognized.push(object.path);
            continue;
        };
        let (paths, earliest) = found.entry(base).or_default();
        if let Some(created) = object.created.map(|c| c.timestamp()) {
            *earliest = Some(earliest.map_or(created, |e| e.min(created)));
        }
        paths.push(object.path);
    }
    report.discovered = found.len();

    for (filename, (mut paths, earliest)) in found {
        if cache.has(&filename) {
            continue;
        }
        paths.sort();
        cache.add(CacheEntry {
            timestamp: earliest.unwrap_or(0),
            variants: paths,
            ..CacheEntry::legacy(filename)
        });
        report.added += 1;
    }

    cache.save()?;
    info!(
        store = store.name(),
        discovered = report.discovered,
        added = report.added,
        "cache rebuilt from store"
    );
    Ok(report)
}

// ============================================================================
// Verify / repair
// ============================================================================

/// A cache entry whose variants are not all present in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryProblem {
    pub filename: String,
    pub missing: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub entries_checked: usize,
    pub paths_checked: usize,
    /// Sorted by filename.
    pub problems: Vec<EntryProblem>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Paths an entry is expected to have in the store: the recorded ones, or
/// the derived ones for entries that never recorded any.
fn expected_paths(entry: &CacheEntry, images: &ImagesConfig) -> Vec<String> {
    if entry.variants.is_empty() {
        variant_paths(&images.prefix, &entry.filename, &images.widths)
    } else {
        entry.variants.clone()
    }
}

/// Check every cache entry's variants against the store, running up to
/// `parallelism` existence checks at once.
pub async fn verify(
    cache: &ContentCache,
    store: &dyn ObjectStore,
    images: &ImagesConfig,
    parallelism: usize,
) -> Result<VerifyReport, MaintenanceError> {
    let entries = cache.entries();
    let checks: Vec<(String, String)> = entries
        .iter()
        .flat_map(|entry| {
            expected_paths(entry, images)
                .into_iter()
                .map(|path| (entry.filename.clone(), path))
        })
        .collect();

    let results: Vec<(String, String, bool)> = stream::iter(checks)
        .map(|(filename, path)| async move {
            let exists = store.exists(&path).await?;
            Ok::<_, StoreError>((filename, path, exists))
        })
        .buffer_unordered(parallelism.max(1))
        .try_collect()
        .await?;

    let mut missing: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (filename, path, exists) in &results {
        if !exists {
            missing.entry(filename.clone()).or_default().push(path.clone());
        }
    }

    let problems: Vec<EntryProblem> = missing
        .into_iter()
        .map(|(filename, mut missing)| {
            missing.sort();
            warn!(%filename, missing = missing.len(), "cache entry has missing variants");
            EntryProblem { filename, missing }
        })
        .collect();

    Ok(VerifyReport {
        entries_checked: entries.len(),
        paths_checked: results.len(),
        problems,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub verify: VerifyReport,
    /// Entries dropped so the next run reprocesses them.
    pub removed: Vec<String>,
}

/// Verify, drop every entry with missing variants, then save.
pub async fn repair(
    cache: &ContentCache,
    store: &dyn ObjectStore,
    images: &ImagesConfig,
    parallelism: usize,
) -> Result<RepairReport, MaintenanceError> {
    let verify = verify(cache, store, images, parallelism).await?;
    let removed: Vec<String> = verify
        .problems
        .iter()
        .filter_map(|p| cache.remove(&p.filename).map(|e| e.filename))
        .collect();
    cache.save()?;
    info!(removed = removed.len(), "cache repaired");
    Ok(RepairReport { verify, removed })
}

// ============================================================================
// Export
// ============================================================================

/// All entries as pretty-printed JSON, sorted by filename.
pub fn export_json(cache: &ContentCache) -> Result<String, MaintenanceError> {
    Ok(serde_json::to_string_pretty(&cache.entries())?)
}
