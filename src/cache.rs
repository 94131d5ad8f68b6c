//! Persistent content cache for incremental publishing.
//!
//! Fetching, decoding and re-encoding every referenced image on each run is
//! the slow part of publishing. The cache records, per source filename, what
//! was published last time so unchanged images can be skipped.
//!
//! # Keys and validity
//!
//! Entries are keyed by the filename derived from the source URL (see
//! [`naming::filename_from_url`](crate::naming::filename_from_url)). The
//! `hash` field is the SHA-256 of the raw source bytes and is the only thing
//! used for change detection: an entry with an empty hash (a *legacy* entry)
//! counts as "already handled" for membership checks, but never validates
//! against a freshly computed hash.
//!
//! # Storage
//!
//! A plain text file, one entry per line, sorted by filename so diffs stay
//! readable when the file is committed alongside the site:
//!
//! ```text
//! # Version: 2.0
//! # Format: filename|hash|timestamp|width|height|variant_0|variant_1|...
//!
//! cat.png|9f86d0…|1717171717|1200|800|images/cat.png_0.jpeg|images/cat.png.jpeg
//! ```
//!
//! Older caches listed one bare filename per line. Those lines are read as
//! legacy entries and the cache is marked dirty so the next save rewrites
//! them in full form.
//!
//! # Saving
//!
//! The new contents are written to `<cache>.tmp` first. The current file is
//! then copied to `<cache>.bak` and the temp file renamed over it, so the
//! primary file is never missing even if the process dies mid-save.
//!
//! # Concurrency
//!
//! The entry map sits behind one read-write lock. [`ContentCache::save`]
//! only takes the read side, so callers must not run it while workers are
//! still calling [`ContentCache::add`] or [`ContentCache::remove`].

use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Version written to the header of every saved cache.
pub const CACHE_VERSION: &str = "2.0";

const VERSION_HEADER: &str = "# Version:";
const FORMAT_HEADER: &str = "# Format: filename|hash|timestamp|width|height|variant_0|variant_1|...";
const MIN_FIELDS: usize = 5;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to read cache {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write cache {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Metadata recorded for one published source image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub filename: String,
    /// Hex SHA-256 of the source bytes. Empty for legacy entries.
    pub hash: String,
    /// Unix seconds of the last successful processing.
    pub timestamp: i64,
    pub width: u32,
    pub height: u32,
    /// Published variant paths, in width-list order.
    pub variants: Vec<String>,
}

impl CacheEntry {
    /// Entry for a filename whose metadata is unknown.
    pub fn legacy(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            hash: String::new(),
            timestamp: 0,
            width: 0,
            height: 0,
            variants: Vec::new(),
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.hash.is_empty()
    }

    fn parse(line: &str) -> Result<Self, String> {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < MIN_FIELDS {
            return Err(format!(
                "expected at least {MIN_FIELDS} fields, got {}",
                parts.len()
            ));
        }
        if parts[0].is_empty() {
            return Err("empty filename".into());
        }
        let timestamp = parts[2]
            .parse::<i64>()
            .map_err(|e| format!("invalid timestamp {:?}: {e}", parts[2]))?;
        let width = parts[3]
            .parse::<u32>()
            .map_err(|e| format!("invalid width {:?}: {e}", parts[3]))?;
        let height = parts[4]
            .parse::<u32>()
            .map_err(|e| format!("invalid height {:?}: {e}", parts[4]))?;

        Ok(Self {
            filename: parts[0].to_string(),
            hash: parts[1].to_string(),
            timestamp,
            width,
            height,
            variants: parts[MIN_FIELDS..]
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| p.to_string())
                .collect(),
        })
    }

    /// Legacy lines are the whole trimmed line as a bare filename. A `|`
    /// means a malformed current-format line, not a legacy one.
    fn parse_legacy(line: &str) -> Option<Self> {
        let name = line.trim();
        if name.is_empty() || name.contains('|') {
            return None;
        }
        Some(Self::legacy(name))
    }

    fn to_line(&self) -> String {
        let mut line = format!(
            "{}|{}|{}|{}|{}",
            self.filename, self.hash, self.timestamp, self.width, self.height
        );
        for path in &self.variants {
            line.push('|');
            line.push_str(path);
        }
        line
    }
}

/// Result of [`ContentCache::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub entries: usize,
    /// At least one line was read in the legacy format.
    pub migrated: bool,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    version: String,
}

/// Thread-safe filename → [`CacheEntry`] map backed by a text file.
pub struct ContentCache {
    path: PathBuf,
    state: RwLock<CacheState>,
    dirty: AtomicBool,
}

impl ContentCache {
    /// Empty cache that will load from and save to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                version: CACHE_VERSION.to_string(),
            }),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the previous cache file is copied before each save.
    pub fn backup_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, ".bak")
    }

    /// Populate the cache from disk.
    ///
    /// A missing file is not an error. Unparseable lines are logged and
    /// skipped.
    pub fn load(&self) -> Result<LoadSummary, CacheError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no cache file yet, starting empty");
                return Ok(LoadSummary::default());
            }
            Err(source) => {
                return Err(CacheError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut state = self.state.write();
        let mut migrated = false;

        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| CacheError::Read {
                path: self.path.clone(),
                source,
            })?;
            let line = line.trim();

            if line.is_empty() {
                continue;
            }
            if line.starts_with('#') {
                if let Some(version) = line.strip_prefix(VERSION_HEADER) {
                    state.version = version.trim().to_string();
                }
                continue;
            }

            let entry = match CacheEntry::parse(line) {
                Ok(entry) => entry,
                Err(reason) => match CacheEntry::parse_legacy(line) {
                    Some(entry) => {
                        migrated = true;
                        entry
                    }
                    None => {
                        warn!(line = idx + 1, %reason, "skipping invalid cache line");
                        continue;
                    }
                },
            };
            state.entries.insert(entry.filename.clone(), entry);
        }

        if migrated {
            self.dirty.store(true, Ordering::Release);
            info!("cache contains legacy entries, it will be rewritten in the current format");
        }

        let summary = LoadSummary {
            entries: state.entries.len(),
            migrated,
        };
        info!(
            entries = summary.entries,
            version = %state.version,
            "loaded cache"
        );
        Ok(summary)
    }

    /// Persist every entry, sorted by filename.
    ///
    /// Must only be called once all workers that mutate the cache have
    /// finished.
    pub fn save(&self) -> Result<(), CacheError> {
        let state = self.state.read();
        let write_err = |source| CacheError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp_path = sibling_with_suffix(&self.path, ".tmp");
        write_entries(&tmp_path, &state.entries).map_err(write_err)?;

        if self.path.exists() {
            let backup = self.backup_path();
            if let Err(e) = fs::copy(&self.path, &backup) {
                warn!(backup = %backup.display(), error = %e, "failed to back up cache");
            }
        }

        fs::rename(&tmp_path, &self.path).map_err(write_err)?;
        self.dirty.store(false, Ordering::Release);
        debug!(path = %self.path.display(), entries = state.entries.len(), "saved cache");
        Ok(())
    }

    /// Clone of the entry for `filename`.
    pub fn get(&self, filename: &str) -> Option<CacheEntry> {
        self.state.read().entries.get(filename).cloned()
    }

    pub fn has(&self, filename: &str) -> bool {
        self.state.read().entries.contains_key(filename)
    }

    /// Insert or replace the entry for `entry.filename`.
    pub fn add(&self, entry: CacheEntry) {
        self.state
            .write()
            .entries
            .insert(entry.filename.clone(), entry);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn remove(&self, filename: &str) -> Option<CacheEntry> {
        let removed = self.state.write().entries.remove(filename);
        self.dirty.store(true, Ordering::Release);
        removed
    }

    /// Whether the stored hash for `filename` matches `hash`.
    ///
    /// Legacy entries never validate: the caller has to reprocess to learn
    /// the hash.
    pub fn validate_entry(&self, filename: &str, hash: &str) -> bool {
        match self.state.read().entries.get(filename) {
            Some(entry) if !entry.is_legacy() => entry.hash == hash,
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Version tag read from the file header (or the current version).
    pub fn version(&self) -> String {
        self.state.read().version.clone()
    }

    /// Snapshot of all entries sorted by filename.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.state.read().entries.values().cloned().collect();
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        entries
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        let with_hash = state.entries.values().filter(|e| !e.is_legacy()).count();
        CacheStats {
            version: state.version.clone(),
            entries: state.entries.len(),
            with_hash,
            without_hash: state.entries.len() - with_hash,
            variants: state.entries.values().map(|e| e.variants.len()).sum(),
            dirty: self.is_dirty(),
        }
    }
}

fn write_entries(path: &Path, entries: &HashMap<String, CacheEntry>) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "{VERSION_HEADER} {CACHE_VERSION}")?;
    writeln!(writer, "{FORMAT_HEADER}")?;
    writeln!(writer)?;

    let mut filenames: Vec<&String> = entries.keys().collect();
    filenames.sort();
    for filename in filenames {
        writeln!(writer, "{}", entries[filename].to_line())?;
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Summary of cache contents for `maintenance stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub version: String,
    pub entries: usize,
    pub with_hash: usize,
    pub without_hash: usize,
    pub variants: usize,
    pub dirty: bool,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version:              {}", self.version)?;
        writeln!(f, "total_entries:        {}", self.entries)?;
        writeln!(f, "entries_with_hash:    {}", self.with_hash)?;
        writeln!(f, "entries_without_hash: {}", self.without_hash)?;
        writeln!(f, "variant_paths:        {}", self.variants)?;
        write!(f, "dirty:                {}", self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(filename: &str, hash: &str) -> CacheEntry {
        CacheEntry {
            filename: filename.into(),
            hash: hash.into(),
            timestamp: 1_700_000_000,
            width: 1000,
            height: 500,
            variants: vec![
                format!("images/{filename}_0.jpeg"),
                format!("images/{filename}.jpeg"),
            ],
        }
    }

    fn cache_in(tmp: &TempDir) -> ContentCache {
        ContentCache::new(tmp.path().join("imager-cache.txt"))
    }

    // =========================================================================
    // Line parsing
    // =========================================================================

    #[test]
    fn parse_full_line() {
        let e = CacheEntry::parse("a.png|abc|12|300|200|images/a.png_0.jpeg|images/a.png.jpeg")
            .unwrap();
        assert_eq!(e.filename, "a.png");
        assert_eq!(e.hash, "abc");
        assert_eq!(e.timestamp, 12);
        assert_eq!((e.width, e.height), (300, 200));
        assert_eq!(e.variants, vec!["images/a.png_0.jpeg", "images/a.png.jpeg"]);
    }

    #[test]
    fn parse_line_without_variants() {
        let e = CacheEntry::parse("a.png||0|0|0").unwrap();
        assert!(e.is_legacy());
        assert!(e.variants.is_empty());
    }

    #[test]
    fn parse_rejects_short_and_malformed_lines() {
        assert!(CacheEntry::parse("a.png|abc|12").is_err());
        assert!(CacheEntry::parse("a.png|abc|soon|1|1").is_err());
        assert!(CacheEntry::parse("a.png|abc|1|-4|1").is_err());
        assert!(CacheEntry::parse("|abc|1|1|1").is_err());
    }

    #[test]
    fn to_line_matches_parse() {
        let e = entry("cat.jpeg", "ff00");
        assert_eq!(CacheEntry::parse(&e.to_line()).unwrap(), e);
    }

    // =========================================================================
    // Load
    // =========================================================================

    #[test]
    fn load_missing_file_is_empty_and_clean() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        let summary = cache.load().unwrap();
        assert_eq!(summary, LoadSummary::default());
        assert!(cache.is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn load_reads_version_and_skips_comments() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        fs::write(
            cache.path(),
            "# Version: 1.9\n# some note\n\na.png|h|1|2|3\n   \nb.png|h2|4|5|6|images/b.png.jpeg\n",
        )
        .unwrap();

        let summary = cache.load().unwrap();
        assert_eq!(summary.entries, 2);
        assert!(!summary.migrated);
        assert_eq!(cache.version(), "1.9");
        assert!(!cache.is_dirty());
        assert_eq!(cache.get("b.png").unwrap().variants, vec!["images/b.png.jpeg"]);
    }

    #[test]
    fn load_migrates_legacy_lines() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        fs::write(cache.path(), "one.jpeg\ntwo.png\n").unwrap();

        let summary = cache.load().unwrap();
        assert_eq!(summary.entries, 2);
        assert!(summary.migrated);
        assert!(cache.is_dirty());

        let one = cache.get("one.jpeg").unwrap();
        assert_eq!(one, CacheEntry::legacy("one.jpeg"));
        assert_eq!((one.width, one.height), (0, 0));
    }

    #[test]
    fn load_skips_lines_in_neither_format() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        fs::write(cache.path(), "good.png|h|1|2|3\nbad|line\nshort|h|1\n").unwrap();

        let summary = cache.load().unwrap();
        assert_eq!(summary.entries, 1);
        assert!(!summary.migrated);
        assert!(cache.has("good.png"));
        assert!(!cache.has("bad"));
    }

    #[test]
    fn legacy_filenames_may_contain_spaces() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        fs::write(cache.path(), "  my photo.png \nplain.png\n").unwrap();

        let summary = cache.load().unwrap();
        assert_eq!(summary.entries, 2);
        assert!(summary.migrated);
        assert!(cache.is_dirty());
        assert_eq!(cache.get("my photo.png").unwrap(), CacheEntry::legacy("my photo.png"));
        assert!(cache.has("plain.png"));
    }

    #[test]
    fn save_rewrites_legacy_entries_in_full_form() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        fs::write(cache.path(), "one.jpeg\ntwo.png\n").unwrap();
        cache.load().unwrap();
        cache.save().unwrap();
        assert!(!cache.is_dirty());

        let content = fs::read_to_string(cache.path()).unwrap();
        assert!(content.contains("one.jpeg||0|0|0\n"));
        assert!(content.contains("two.png||0|0|0\n"));
    }

    // =========================================================================
    // Save
    // =========================================================================

    #[test]
    fn save_writes_headers_and_sorted_entries() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        cache.add(entry("zebra.png", "z"));
        cache.add(entry("apple.png", "a"));
        cache.add(entry("mango.png", "m"));
        cache.save().unwrap();

        let content = fs::read_to_string(cache.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "# Version: 2.0");
        assert_eq!(lines[1], FORMAT_HEADER);
        assert_eq!(lines[2], "");
        assert!(lines[3].starts_with("apple.png|a|"));
        assert!(lines[4].starts_with("mango.png|m|"));
        assert!(lines[5].starts_with("zebra.png|z|"));
    }

    #[test]
    fn save_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        for name in ["c.png", "a.png", "b.png"] {
            cache.add(entry(name, name));
        }
        cache.save().unwrap();
        let first = fs::read_to_string(cache.path()).unwrap();
        cache.save().unwrap();
        let second = fs::read_to_string(cache.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn save_then_load_restores_entries() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        cache.add(entry("a.png", "h1"));
        cache.add(CacheEntry::legacy("b.png"));
        cache.save().unwrap();

        let reloaded = cache_in(&tmp);
        reloaded.load().unwrap();
        assert_eq!(reloaded.entries(), cache.entries());
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn backup_holds_previous_contents() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        cache.add(entry("a.png", "h1"));
        cache.save().unwrap();
        let before_second = fs::read_to_string(cache.path()).unwrap();

        cache.add(entry("b.png", "h2"));
        cache.save().unwrap();

        let backup = fs::read_to_string(cache.backup_path()).unwrap();
        assert_eq!(backup, before_second);
        assert!(fs::read_to_string(cache.path()).unwrap().contains("b.png|h2|"));
        assert!(!sibling_with_suffix(cache.path(), ".tmp").exists());
    }

    #[test]
    fn first_save_creates_no_backup() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        cache.save().unwrap();
        assert!(cache.path().exists());
        assert!(!cache.backup_path().exists());
    }

    #[test]
    fn save_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let cache = ContentCache::new(tmp.path().join("state/nested/cache.txt"));
        cache.add(entry("a.png", "h"));
        cache.save().unwrap();
        assert!(cache.path().exists());
    }

    // =========================================================================
    // Mutation and lookups
    // =========================================================================

    #[test]
    fn add_and_remove_set_dirty() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        cache.add(entry("a.png", "h"));
        assert!(cache.is_dirty());
        cache.save().unwrap();
        assert!(!cache.is_dirty());

        assert!(cache.remove("a.png").is_some());
        assert!(cache.is_dirty());
        assert!(!cache.has("a.png"));
    }

    #[test]
    fn validate_entry_rules() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        cache.add(entry("hashed.png", "abc"));
        cache.add(CacheEntry::legacy("legacy.png"));

        assert!(cache.validate_entry("hashed.png", "abc"));
        assert!(!cache.validate_entry("hashed.png", "def"));
        assert!(!cache.validate_entry("legacy.png", ""));
        assert!(!cache.validate_entry("missing.png", "abc"));
        // Legacy entries still count as present.
        assert!(cache.has("legacy.png"));
    }

    #[test]
    fn stats_counts_legacy_and_variants() {
        let tmp = TempDir::new().unwrap();
        let cache = cache_in(&tmp);
        cache.add(entry("a.png", "h"));
        cache.add(CacheEntry::legacy("b.png"));

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.with_hash, 1);
        assert_eq!(stats.without_hash, 1);
        assert_eq!(stats.variants, 2);
        assert!(stats.dirty);
        assert!(format!("{stats}").contains("total_entries:        2"));
    }

    #[test]
    fn hash_bytes_is_sha256_hex() {
        assert_eq!(
            hash_bytes(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_ne!(hash_bytes(b"version 1"), hash_bytes(b"version 2"));
    }
}
