//! The publishing run: partition, bounded fan-out, join, single save.
//!
//! ```text
//! refs ──partition──► cached (counted, never touched)
//!                └──► jobs ──Semaphore(parallelism)──► per-image job
//!                                                         │
//!   Fetching → hash → (entry hash equal? Skipped)         │
//!   Decoding → GeneratingVariants (rayon, per width)      │
//!   Publishing (all variants concurrently) → cache.add    │
//!                                                         ▼
//!                               JoinSet barrier → ticker stop → cache.save
//! ```
//!
//! Each job holds one limiter permit from before it is spawned until it
//! finishes, so at most `parallelism` images are in flight. Decode and
//! resize are CPU work and run on the blocking pool; the width fan-out
//! inside uses rayon. A job failure is recorded on the [`ProgressTracker`]
//! and never affects its siblings. The cache is written once, after every
//! job has joined, and not at all on a dry run.

use crate::cache::{CacheEntry, CacheError, ContentCache, LoadSummary, hash_bytes};
use crate::config::PublisherConfig;
use crate::fetch::{Fetch, FetchError, HttpFetcher, RetryPolicy, fetch_with_retry};
use crate::imaging::{
    EncodedVariant, ImagingError, Quality, SourceImage, VARIANT_CONTENT_TYPE, VariantGenerator,
};
use crate::output;
use crate::progress::{ProcessingError, ProgressSnapshot, ProgressTracker, Ticker};
use crate::publish::{PublishError, PublishOutcome, Publisher};
use crate::scan::ImageRef;
use crate::store::{ObjectStore, StoreError, open_store};
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

// ============================================================================
// Errors
// ============================================================================

/// Fatal, run-level failures. Per-job failures are [`JobError`]s.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to load cache: {0}")]
    CacheLoad(#[source] CacheError),
    #[error("failed to open object store: {0}")]
    Store(#[source] StoreError),
    #[error("failed to create HTTP client: {0}")]
    Client(#[source] FetchError),
    /// Jobs ran to completion but the cache could not be written. The
    /// report is kept so the summary can still be shown.
    #[error("failed to save cache: {source}")]
    Save {
        report: Box<RunReport>,
        #[source]
        source: CacheError,
    },
}

/// Where in the per-image sequence a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Fetching,
    Decoding,
    GeneratingVariants,
    Publishing,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStage::Fetching => "fetch",
            JobStage::Decoding => "decode",
            JobStage::GeneratingVariants => "variants",
            JobStage::Publishing => "publish",
        })
    }
}

#[derive(Error, Debug)]
pub enum JobFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Imaging(#[from] ImagingError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("worker task failed: {0}")]
    Worker(String),
}

#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct JobError {
    pub stage: JobStage,
    #[source]
    pub source: JobFailure,
}

impl JobError {
    pub fn new(stage: JobStage, source: impl Into<JobFailure>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

// ============================================================================
// Jobs and partitioning
// ============================================================================

/// One image to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub filename: String,
    /// Source URL.
    pub source: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Web references seen.
    pub found: usize,
    /// References already in the cache and left alone.
    pub cached: usize,
    pub jobs: Vec<Job>,
}

/// Terminal state of a job that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Fetched bytes hash to the cached value.
    Skipped,
    Processed { uploaded: usize, already_present: usize },
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub parallelism: usize,
    pub dry_run: bool,
    /// Turn every reference into a job; the hash check decides.
    pub recheck: bool,
    /// Status line period; `None` renders nothing while running.
    pub progress_interval: Option<Duration>,
}

impl RunOptions {
    pub fn from_config(config: &PublisherConfig) -> Self {
        Self {
            parallelism: config.parallelism,
            dry_run: false,
            recheck: false,
            progress_interval: Some(config.progress_interval()),
        }
    }
}

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub found: usize,
    pub cached: usize,
    pub snapshot: ProgressSnapshot,
    pub errors: Vec<ProcessingError>,
    pub dry_run: bool,
    /// Whether the cache file was written.
    pub saved: bool,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty()
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Cache and store, opened and loaded. Shared by publishing and maintenance.
pub struct Resources {
    pub cache: Arc<ContentCache>,
    pub store: Arc<dyn ObjectStore>,
    pub loaded: LoadSummary,
}

pub async fn open_resources(config: &PublisherConfig) -> Result<Resources, PipelineError> {
    let cache = Arc::new(ContentCache::new(&config.cache_file));
    let loaded = cache.load().map_err(PipelineError::CacheLoad)?;
    let store = open_store(&config.store)
        .await
        .map_err(PipelineError::Store)?;
    Ok(Resources {
        cache,
        store,
        loaded,
    })
}

// ============================================================================
// Per-image processing
// ============================================================================

/// Everything a job needs, shared by all jobs of one run.
pub struct PipelineContext {
    cache: Arc<ContentCache>,
    fetcher: Arc<dyn Fetch>,
    publisher: Publisher,
    generator: Arc<VariantGenerator>,
    retry: RetryPolicy,
}

impl PipelineContext {
    pub fn new(
        config: &PublisherConfig,
        cache: Arc<ContentCache>,
        fetcher: Arc<dyn Fetch>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            cache,
            fetcher,
            publisher: Publisher::new(store, config.publish.cache_control.clone()),
            generator: Arc::new(VariantGenerator::new(
                &config.images.widths,
                Quality::new(config.images.quality),
                config.images.prefix.clone(),
            )),
            retry: RetryPolicy {
                max_retries: config.fetch.max_retries,
                base_backoff: config.fetch.base_backoff(),
            },
        }
    }

    /// Run the per-image sequence for one job.
    ///
    /// The cache entry is written only after every variant is published.
    pub async fn process(&self, job: &Job) -> Result<JobOutcome, JobError> {
        debug!(filename = %job.filename, "fetching");
        let bytes = fetch_with_retry(self.fetcher.as_ref(), &job.source, self.retry)
            .await
            .map_err(|e| JobError::new(JobStage::Fetching, e))?;

        let hash = hash_bytes(&bytes);
        if self.cache.validate_entry(&job.filename, &hash) {
            debug!(filename = %job.filename, "content unchanged");
            return Ok(JobOutcome::Skipped);
        }

        debug!(filename = %job.filename, "decoding");
        let generator = self.generator.clone();
        let filename = job.filename.clone();
        let (dimensions, variants) = tokio::task::spawn_blocking(move || {
            let source = SourceImage::decode(&bytes)
                .map_err(|e| JobError::new(JobStage::Decoding, e))?;
            let variants = generator
                .generate(&source, &filename)
                .map_err(|e| JobError::new(JobStage::GeneratingVariants, e))?;
            Ok::<_, JobError>((source.dimensions(), variants))
        })
        .await
        .map_err(|e| {
            JobError::new(JobStage::GeneratingVariants, JobFailure::Worker(e.to_string()))
        })??;

        debug!(filename = %job.filename, variants = variants.len(), "publishing");
        let paths: Vec<String> = variants.iter().map(|v| v.path.clone()).collect();
        let uploads = variants.into_iter().map(|variant| {
            let EncodedVariant { path, bytes, .. } = variant;
            async move {
                self.publisher
                    .publish(&path, bytes, VARIANT_CONTENT_TYPE)
                    .await
            }
        });
        let results = futures::future::join_all(uploads).await;

        let mut uploaded = 0;
        let mut already_present = 0;
        for result in results {
            match result.map_err(|e| JobError::new(JobStage::Publishing, e))? {
                PublishOutcome::Uploaded => uploaded += 1,
                PublishOutcome::AlreadyPresent => already_present += 1,
            }
        }

        let (width, height) = dimensions;
        self.cache.add(CacheEntry {
            filename: job.filename.clone(),
            hash,
            timestamp: Utc::now().timestamp(),
            width,
            height,
            variants: paths,
        });
        Ok(JobOutcome::Processed {
            uploaded,
            already_present,
        })
    }
}

// ============================================================================
// Orchestration
// ============================================================================

pub struct Pipeline {
    context: Arc<PipelineContext>,
    options: RunOptions,
}

impl Pipeline {
    pub fn new(context: PipelineContext, options: RunOptions) -> Self {
        Self {
            context: Arc::new(context),
            options,
        }
    }

    /// Wire up the HTTP fetcher for an opened cache and store.
    pub fn from_config(
        config: &PublisherConfig,
        resources: &Resources,
        options: RunOptions,
    ) -> Result<Self, PipelineError> {
        let fetcher = HttpFetcher::new(config.fetch.timeout()).map_err(PipelineError::Client)?;
        let context = PipelineContext::new(
            config,
            resources.cache.clone(),
            Arc::new(fetcher),
            resources.store.clone(),
        );
        Ok(Self::new(context, options))
    }

    /// Split web references into cached ones and jobs.
    ///
    /// Legacy entries count as cached here. With `recheck`, nothing is
    /// excluded and the per-job hash check decides.
    pub fn partition(&self, refs: &[ImageRef]) -> Partition {
        let mut partition = Partition::default();
        for image in refs {
            let (Some(source), Some(filename)) = (image.web.as_deref(), image.filename()) else {
                continue;
            };
            partition.found += 1;

            if !self.options.recheck
                && let Some(entry) = self.context.cache.get(&filename)
            {
                partition.cached += 1;
                debug!(%filename, legacy = entry.is_legacy(), "cached");
                continue;
            }
            partition.jobs.push(Job {
                filename,
                source: source.to_string(),
            });
        }
        partition
    }

    /// Partition and run in one go.
    pub async fn run(&self, refs: &[ImageRef]) -> Result<RunReport, PipelineError> {
        let partition = self.partition(refs);
        self.run_jobs(partition).await
    }

    /// Run every job under the concurrency cap, then save the cache once.
    pub async fn run_jobs(&self, partition: Partition) -> Result<RunReport, PipelineError> {
        let Partition { found, cached, jobs } = partition;
        let tracker = Arc::new(ProgressTracker::new(jobs.len()));
        let dry_run = self.options.dry_run;
        let has_work = !jobs.is_empty();

        if has_work {
            let ticker = self
                .options
                .progress_interval
                .map(|period| Ticker::spawn(tracker.clone(), period, output::print_status_line));

            self.execute(jobs, &tracker).await;

            if let Some(ticker) = ticker {
                ticker.stop().await;
            }
        }

        let mut report = RunReport {
            found,
            cached,
            snapshot: tracker.snapshot(),
            errors: tracker.errors(),
            dry_run,
            saved: false,
        };

        // An empty work set saves even on a dry run, so a migrated legacy
        // cache is still rewritten
        if dry_run && has_work {
            return Ok(report);
        }
        if let Err(source) = self.context.cache.save() {
            return Err(PipelineError::Save {
                report: Box::new(report),
                source,
            });
        }
        report.saved = true;
        Ok(report)
    }

    async fn execute(&self, jobs: Vec<Job>, tracker: &Arc<ProgressTracker>) {
        let limiter = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
        let mut set = JoinSet::new();
        let mut in_flight = HashMap::new();

        for job in jobs {
            let permit = match limiter.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracker.add_error(&job.filename, &job.source, e);
                    continue;
                }
            };
            let context = self.context.clone();
            let tracker = tracker.clone();
            let dry_run = self.options.dry_run;
            let task = job.clone();
            let handle = set.spawn(async move {
                let _permit = permit;
                run_job(&context, &tracker, &task, dry_run).await;
            });
            in_flight.insert(handle.id(), job);
        }

        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((id, ())) => {
                    in_flight.remove(&id);
                }
                Err(e) => {
                    if let Some(job) = in_flight.remove(&e.id()) {
                        warn!(filename = %job.filename, error = %e, "job task aborted");
                        tracker.add_error(&job.filename, &job.source, &e);
                    }
                }
            }
        }
    }
}

async fn run_job(context: &PipelineContext, tracker: &ProgressTracker, job: &Job, dry_run: bool) {
    tracker.set_current(&job.filename);
    if dry_run {
        info!(filename = %job.filename, source = %job.source, "dry run: would process");
        tracker.record_skipped();
        return;
    }

    match context.process(job).await {
        Ok(JobOutcome::Processed {
            uploaded,
            already_present,
        }) => {
            debug!(filename = %job.filename, uploaded, already_present, "processed");
            tracker.record_processed();
        }
        Ok(JobOutcome::Skipped) => tracker.record_skipped(),
        Err(e) => {
            warn!(filename = %job.filename, stage = %e.stage, error = %e.source, "job failed");
            tracker.add_error(&job.filename, &job.source, &e);
        }
    }
}
