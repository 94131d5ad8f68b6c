//! Filename and object-path conventions shared by every stage.
//!
//! A source image is identified by a *filename* derived from its URL. Each
//! configured width produces one variant whose object path depends only on
//! `(prefix, filename, index, width)`, so the full path list can be rebuilt
//! from a cache entry plus the configured widths without touching the store.
//!
//! ```text
//! https://example.com/assets/abc123          → abc123.jpeg
//! https://cdn.example.com/photo.png?size=xl  → photo.png
//!
//! widths = [240, 480, 960, 0], filename = photo.png, prefix = images
//!   index 0 (240px)    → images/photo.png_0.jpeg
//!   index 1 (480px)    → images/photo.png_1.jpeg
//!   index 2 (960px)    → images/photo.png_2.jpeg
//!   index 3 (original) → images/photo.png.jpeg
//! ```

/// Extension every published variant carries.
pub const VARIANT_EXTENSION: &str = ".jpeg";

/// Source extensions that are kept as-is when deriving a filename.
const KNOWN_EXTENSIONS: &[&str] = &[".jpeg", ".jpg", ".png"];

/// Derive the cache/target filename for a source URL.
///
/// Takes the last path segment, drops any query string, and appends
/// `.jpeg` unless the name already ends in a known image extension (GitHub
/// asset URLs have no extension at all).
pub fn filename_from_url(url: &str) -> String {
    let last = url.rsplit('/').next().unwrap_or(url);
    let name = match last.find('?') {
        Some(idx) => &last[..idx],
        None => last,
    };
    if KNOWN_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
        name.to_string()
    } else {
        format!("{name}{VARIANT_EXTENSION}")
    }
}

/// One configured output width and its position in the width list.
///
/// `width == 0` means "same as the original".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantSpec {
    pub index: usize,
    pub width: u32,
}

impl VariantSpec {
    /// Enumerate the specs for a configured width list, in order.
    pub fn from_widths(widths: &[u32]) -> Vec<VariantSpec> {
        widths
            .iter()
            .enumerate()
            .map(|(index, &width)| VariantSpec { index, width })
            .collect()
    }

    pub fn is_original(&self) -> bool {
        self.width == 0
    }

    /// Object path for this variant of `filename` under `prefix`.
    pub fn target_path(&self, prefix: &str, filename: &str) -> String {
        let prefix = prefix.trim_end_matches('/');
        if self.is_original() {
            format!("{prefix}/{filename}{VARIANT_EXTENSION}")
        } else {
            format!("{prefix}/{filename}_{}{VARIANT_EXTENSION}", self.index)
        }
    }
}

/// All variant paths for `filename`, in width-list order.
pub fn variant_paths(prefix: &str, filename: &str, widths: &[u32]) -> Vec<String> {
    VariantSpec::from_widths(widths)
        .iter()
        .map(|spec| spec.target_path(prefix, filename))
        .collect()
}

/// Infer the source filename from a published object path.
///
/// Inverse of [`VariantSpec::target_path`]: strips the prefix, the variant
/// extension, and an `_<index>` suffix when `index` is a valid position in
/// `widths` for a non-original variant. Returns `None` for paths outside the
/// prefix or without the variant extension.
pub fn base_filename(path: &str, prefix: &str, widths: &[u32]) -> Option<String> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?.strip_prefix('/')?;
    let stem = rest.strip_suffix(VARIANT_EXTENSION)?;
    if stem.is_empty() {
        return None;
    }

    if let Some((base, index)) = stem.rsplit_once('_')
        && let Ok(index) = index.parse::<usize>()
        && widths.get(index).is_some_and(|&w| w != 0)
        && !base.is_empty()
    {
        return Some(base.to_string());
    }
    Some(stem.to_string())
}
