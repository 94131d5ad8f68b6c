//! Discovery of image references in the markdown content tree.
//!
//! Every `*.md` file under the content directory is parsed with
//! pulldown-cmark and each image tag becomes an [`ImageRef`]. Only web
//! references (`http://` / `https://`) are published; local references are
//! reported but left to the site generator.

use crate::naming::filename_from_url;
use pulldown_cmark::{Event, Parser, Tag};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to walk {0}: {1}")]
    Walk(PathBuf, walkdir::Error),
}

/// One image tag found in a markdown document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Destination exactly as written in the document.
    pub location: String,
    /// Set when `location` is an http(s) URL.
    pub web: Option<String>,
    /// Set when `location` is anything else (relative path, etc).
    pub local: Option<String>,
    /// Markdown file the reference was found in.
    pub document: PathBuf,
}

impl ImageRef {
    fn new(location: &str, document: &Path) -> Self {
        let is_web = location.starts_with("http://") || location.starts_with("https://");
        Self {
            location: location.to_string(),
            web: is_web.then(|| location.to_string()),
            local: (!is_web).then(|| location.to_string()),
            document: document.to_path_buf(),
        }
    }

    /// Target filename for web references.
    pub fn filename(&self) -> Option<String> {
        self.web.as_deref().map(filename_from_url)
    }
}

/// All markdown files under `root`, sorted.
pub fn markdown_files(root: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| ScanError::Walk(root.to_path_buf(), e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_markdown = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "md" || e == "MD");
        if is_markdown {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Extract image references from one markdown source.
pub fn images_in_markdown(markdown: &str, document: &Path) -> Vec<ImageRef> {
    Parser::new(markdown)
        .filter_map(|event| match event {
            Event::Start(Tag::Image { dest_url, .. }) if !dest_url.is_empty() => {
                Some(ImageRef::new(&dest_url, document))
            }
            _ => None,
        })
        .collect()
}

/// Every image reference in the content tree, in document order.
pub fn images(root: &Path) -> Result<Vec<ImageRef>, ScanError> {
    let mut images = Vec::new();
    for path in markdown_files(root)? {
        let content = fs::read_to_string(&path).map_err(|source| ScanError::Io {
            path: path.clone(),
            source,
        })?;
        images.extend(images_in_markdown(&content, &path));
    }
    Ok(images)
}

/// Only the references that point at the web.
pub fn web_images(root: &Path) -> Result<Vec<ImageRef>, ScanError> {
    Ok(images(root)?
        .into_iter()
        .filter(|image| image.web.is_some())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_markdown;
    use tempfile::TempDir;

    #[test]
    fn extracts_web_and_local_images() {
        let md = "# Post\n\n![cat](https://x.test/cat.png) text ![](./local/dog.jpg)\n";
        let refs = images_in_markdown(md, Path::new("post.md"));
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].web.as_deref(), Some("https://x.test/cat.png"));
        assert_eq!(refs[0].filename().as_deref(), Some("cat.png"));
        assert_eq!(refs[1].local.as_deref(), Some("./local/dog.jpg"));
        assert_eq!(refs[1].filename(), None);
        assert_eq!(refs[1].document, PathBuf::from("post.md"));
    }

    #[test]
    fn ignores_plain_links() {
        let md = "[not an image](https://x.test/cat.png)";
        assert!(images_in_markdown(md, Path::new("a.md")).is_empty());
    }

    #[test]
    fn walks_nested_markdown_only() {
        let tmp = TempDir::new().unwrap();
        write_markdown(tmp.path(), "index.md", "![a](https://x.test/a.png)");
        write_markdown(tmp.path(), "posts/2024/trip.MD", "![b](https://x.test/b)\n![c](c.png)");
        write_markdown(tmp.path(), "posts/2024/notes.txt", "![d](https://x.test/d.png)");

        let all = images(tmp.path()).unwrap();
        assert_eq!(all.len(), 3);

        let web = web_images(tmp.path()).unwrap();
        let names: Vec<String> = web.iter().filter_map(|i| i.filename()).collect();
        assert_eq!(names, vec!["a.png", "b.jpeg"]);
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(images(&tmp.path().join("nope")).is_err());
    }
}
