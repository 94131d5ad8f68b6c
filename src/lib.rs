//! # Image Publisher
//!
//! Publishes resized variants of the images a markdown site links to. Every
//! remote image referenced from the content tree is downloaded, resized to a
//! fixed set of widths, re-encoded as JPEG and uploaded to an object store,
//! with a plain-text cache so each image is only handled once.
//!
//! # Architecture: One Batch Run
//!
//! ```text
//! content/*.md ──scan──► image refs ──partition vs cache──► jobs
//!                                                            │
//!        ┌───────────── up to `parallelism` at once ─────────┘
//!        ▼
//!   fetch (retry) → sha256 → decode → variants (parallel per width)
//!        → publish (per-path lock, skip if present) → cache entry
//!        │
//!        ▼
//!   join all jobs → final summary → cache saved once
//! ```
//!
//! A failed image never stops the others; failures are listed in the summary
//! and make the process exit non-zero.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Walks the content directory and extracts image references from markdown |
//! | [`naming`] | Filename and variant object-path conventions |
//! | [`cache`] | Versioned text cache of published images, with legacy migration |
//! | [`fetch`] | HTTP downloads with exponential backoff |
//! | [`imaging`] | Decode, resize, JPEG encode, Exif transplant |
//! | [`store`] | Object store trait with local-directory and S3 backends |
//! | [`publish`] | Idempotent uploads serialized per target path |
//! | [`progress`] | Thread-safe counters and the periodic status line |
//! | [`pipeline`] | Partitioning, bounded concurrency, single final save |
//! | [`maintenance`] | Cache rebuild, verify, repair, export |
//! | [`config`] | `image-publisher.toml` loading, merging and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Paths Are Identity
//!
//! A variant's object path is derived from the source filename and the
//! position of its width in the configured list, nothing else. The cache can
//! therefore be rebuilt from a store listing, verification needs no extra
//! metadata, and uploads can be immutable: an existing path is never
//! rewritten.
//!
//! ## Content Hashes, Not Timestamps
//!
//! Change detection compares the SHA-256 of the downloaded bytes with the
//! cached hash. Remote servers rarely report useful modification times, and
//! a hash also catches a different image served under the same URL.
//!
//! ## Two Levels of Parallelism
//!
//! Images are I/O bound (download, upload) and run as tokio tasks under a
//! semaphore. Resizing is CPU bound and runs on the blocking pool, fanning
//! out across widths with rayon.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod imaging;
pub mod maintenance;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod publish;
pub mod scan;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;
