//! Publisher configuration.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. Stock defaults ([`PublisherConfig::default`])
//! 2. An optional `image-publisher.toml` (only the keys it sets are applied)
//! 3. Command-line flags (applied by `main`)
//!
//! ## Configuration Options
//!
//! ```toml
//! content_dir = "site/content"     # Markdown tree scanned for image references
//! cache_file = "imager-cache.txt"  # Backup goes to <cache_file>.bak
//! parallelism = 20                 # Images processed concurrently
//! progress_interval_ms = 2000      # Status line refresh period
//!
//! [images]
//! widths = [240, 480, 960, 0]      # 0 = keep the original width
//! quality = 75                     # JPEG quality (1-100)
//! prefix = "images"                # Object path prefix
//!
//! [fetch]
//! max_retries = 3                  # Retries after the first attempt
//! base_backoff_ms = 1000           # Doubled after every failed attempt
//! timeout_secs = 120
//!
//! [publish]
//! cache_control = "public, max-age=31536000, immutable"
//!
//! [store]
//! backend = "local"                # "local" or "s3"
//! root = "public"                  # local: output directory
//! bucket = ""                      # s3: bucket name
//! region = "us-east-1"             # s3: region
//! endpoint = ""                    # s3: custom endpoint, empty for AWS
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config filename looked up in the working directory.
pub const CONFIG_FILENAME: &str = "image-publisher.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Top-level configuration. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublisherConfig {
    /// Directory scanned for markdown documents.
    pub content_dir: PathBuf,
    /// Cache file location.
    pub cache_file: PathBuf,
    /// Maximum number of images processed at once.
    pub parallelism: usize,
    /// How often the progress line is redrawn.
    pub progress_interval_ms: u64,
    pub images: ImagesConfig,
    pub fetch: FetchConfig,
    pub publish: PublishConfig,
    pub store: StoreConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("site/content"),
            cache_file: PathBuf::from("imager-cache.txt"),
            parallelism: 20,
            progress_interval_ms: 2000,
            images: ImagesConfig::default(),
            fetch: FetchConfig::default(),
            publish: PublishConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl PublisherConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::Validation("parallelism must be at least 1".into()));
        }
        if self.images.widths.is_empty() {
            return Err(ConfigError::Validation("images.widths must not be empty".into()));
        }
        let mut seen = self.images.widths.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.images.widths.len() {
            return Err(ConfigError::Validation(
                "images.widths must not contain duplicates".into(),
            ));
        }
        if !(1..=100).contains(&self.images.quality) {
            return Err(ConfigError::Validation("images.quality must be 1-100".into()));
        }
        if self.images.prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation("images.prefix must not be empty".into()));
        }
        if self.store.backend == StoreBackend::S3 && self.store.bucket.is_empty() {
            return Err(ConfigError::Validation(
                "store.bucket is required for the s3 backend".into(),
            ));
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

/// Variant generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Target widths in pixels, `0` meaning the original width. The position
    /// of each width is part of the published object path, so reordering
    /// this list changes every path.
    pub widths: Vec<u32>,
    /// JPEG encoding quality.
    pub quality: u8,
    /// Object path prefix for published variants.
    pub prefix: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            widths: vec![240, 480, 960, 0],
            quality: 75,
            prefix: "images".into(),
        }
    }
}

/// Source download settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 1000,
            timeout_secs: 120,
        }
    }
}

impl FetchConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Upload settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    /// `Cache-Control` sent with every upload. Variant paths are never
    /// rewritten in place, so a long immutable policy is safe.
    pub cache_control: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            cache_control: "public, max-age=31536000, immutable".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Local,
    S3,
}

/// Object store selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Output directory for the local backend.
    pub root: PathBuf,
    pub bucket: String,
    pub region: String,
    /// Custom S3 endpoint; empty means AWS.
    pub endpoint: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Local,
            root: PathBuf::from("public"),
            bucket: String::new(),
            region: "us-east-1".into(),
            endpoint: String::new(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(PublisherConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value, `Ok(None)` if it does not exist.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(toml::from_str(&content)?))
}

/// Merge the file at `path` (if present) over the stock defaults and
/// validate the result.
pub fn load_config(path: &Path) -> Result<PublisherConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match load_raw_config(path)? {
        Some(overlay) => merge_toml(base, overlay),
        None => base,
    };
    let config: PublisherConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Fully commented stock config, printed by `--gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# image-publisher configuration
# =============================
# All settings are optional. Values shown are the defaults.
# Unknown keys cause an error.

# Markdown tree scanned for image references.
content_dir = "site/content"

# Cache of already-published images. The previous version is kept at
# <cache_file>.bak on every save.
cache_file = "imager-cache.txt"

# Number of images fetched and processed at the same time.
parallelism = 20

# How often the progress line is redrawn, in milliseconds.
progress_interval_ms = 2000

# ---------------------------------------------------------------------------
# Variants
# ---------------------------------------------------------------------------
[images]
# Target widths in pixels. 0 keeps the original width. Heights follow the
# source aspect ratio. The position of each width is part of the published
# object path, so changing the order republishes everything.
widths = [240, 480, 960, 0]

# JPEG quality (1-100).
quality = 75

# Object path prefix.
prefix = "images"

# ---------------------------------------------------------------------------
# Downloads
# ---------------------------------------------------------------------------
[fetch]
# Retries after the first failed attempt. Waits base_backoff_ms, then
# doubles the wait after every further failure.
max_retries = 3
base_backoff_ms = 1000
timeout_secs = 120

# ---------------------------------------------------------------------------
# Uploads
# ---------------------------------------------------------------------------
[publish]
cache_control = "public, max-age=31536000, immutable"

# ---------------------------------------------------------------------------
# Object store
# ---------------------------------------------------------------------------
[store]
# "local" writes into `root`; "s3" needs a build with the `s3` feature and
# AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY in the environment.
backend = "local"
root = "public"
bucket = ""
region = "us-east-1"
endpoint = ""
"##
}
