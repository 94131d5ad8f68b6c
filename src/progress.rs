//! Run progress: counters, the error list, and the periodic status ticker.
//!
//! All state sits behind one mutex and every method holds it only for the
//! duration of a counter bump or a copy, never across an await.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A failed job as reported in the final summary.
#[derive(Debug, Clone)]
pub struct ProcessingError {
    pub filename: String,
    /// Source URL of the image.
    pub source: String,
    pub error: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ProgressState {
    total: usize,
    processed: usize,
    skipped: usize,
    failed: usize,
    current: Option<String>,
    errors: Vec<ProcessingError>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub current: Option<String>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn completed(&self) -> usize {
        self.processed + self.skipped + self.failed
    }

    /// Percent complete; 100 for an empty run.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed() as f64 / self.total as f64 * 100.0
    }

    /// Linear extrapolation of the remaining time from throughput so far.
    /// `None` until the first job completes.
    pub fn eta(&self) -> Option<Duration> {
        let completed = self.completed();
        if completed == 0 || self.elapsed.is_zero() {
            return None;
        }
        let rate = completed as f64 / self.elapsed.as_secs_f64();
        let remaining = self.total.saturating_sub(completed);
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    /// Average wall time per processed image.
    pub fn average_per_processed(&self) -> Option<Duration> {
        (self.processed > 0).then(|| self.elapsed / self.processed as u32)
    }

    /// `skipped / total`, `None` when there was nothing to do.
    pub fn cache_hit_ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| self.skipped as f64 / self.total as f64)
    }
}

#[derive(Debug)]
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            state: Mutex::new(ProgressState {
                total,
                ..ProgressState::default()
            }),
            started: Instant::now(),
        }
    }

    pub fn set_current(&self, filename: &str) {
        self.state.lock().current = Some(filename.to_string());
    }

    pub fn record_processed(&self) {
        self.state.lock().processed += 1;
    }

    pub fn record_skipped(&self) {
        self.state.lock().skipped += 1;
    }

    /// Count a failed job and keep its error for the summary.
    pub fn add_error(&self, filename: &str, source: &str, error: impl ToString) {
        let mut state = self.state.lock();
        state.failed += 1;
        state.errors.push(ProcessingError {
            filename: filename.to_string(),
            source: source.to_string(),
            error: error.to_string(),
            time: Utc::now(),
        });
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock();
        ProgressSnapshot {
            total: state.total,
            processed: state.processed,
            skipped: state.skipped,
            failed: state.failed,
            current: state.current.clone(),
            elapsed: self.started.elapsed(),
        }
    }

    pub fn errors(&self) -> Vec<ProcessingError> {
        self.state.lock().errors.clone()
    }

    pub fn has_errors(&self) -> bool {
        !self.state.lock().errors.is_empty()
    }
}

/// Renders the tracker on a fixed interval until stopped.
///
/// Ticks are independent of job completions. After [`Ticker::stop`]
/// returns, the render callback is never invoked again.
pub struct Ticker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Ticker {
    pub fn spawn<F>(tracker: Arc<ProgressTracker>, period: Duration, render: F) -> Self
    where
        F: Fn(&ProgressSnapshot) + Send + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = interval.tick() => render(&tracker.snapshot()),
                }
            }
        });
        Self { stop, handle }
    }

    /// Signal the ticker and wait for its task to finish.
    pub async fn stop(self) {
        // A send error means the task is already gone
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(total: usize, processed: usize, skipped: usize, failed: usize) -> ProgressSnapshot {
        ProgressSnapshot {
            total,
            processed,
            skipped,
            failed,
            current: None,
            elapsed: Duration::from_secs(10),
        }
    }

    // =========================================================================
    // Counters
    // =========================================================================

    #[test]
    fn counters_accumulate() {
        let t = ProgressTracker::new(4);
        t.record_processed();
        t.record_processed();
        t.record_skipped();
        t.add_error("a.jpeg", "https://x/a", "HTTP 404");
        t.set_current("b.jpeg");

        let s = t.snapshot();
        assert_eq!((s.total, s.processed, s.skipped, s.failed), (4, 2, 1, 1));
        assert_eq!(s.completed(), 4);
        assert_eq!(s.current.as_deref(), Some("b.jpeg"));
    }

    #[test]
    fn errors_are_kept_in_order() {
        let t = ProgressTracker::new(2);
        assert!(!t.has_errors());
        t.add_error("a.jpeg", "https://x/a", "first");
        t.add_error("b.jpeg", "https://x/b", "second");

        let errors = t.errors();
        assert!(t.has_errors());
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].filename, "a.jpeg");
        assert_eq!(errors[0].source, "https://x/a");
        assert_eq!(errors[1].error, "second");
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let t = Arc::new(ProgressTracker::new(800));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let t = &t;
                scope.spawn(move || {
                    for _ in 0..100 {
                        t.record_processed();
                    }
                });
            }
        });
        assert_eq!(t.snapshot().processed, 800);
    }

    // =========================================================================
    // Derived figures
    // =========================================================================

    #[test]
    fn eta_extrapolates_linearly() {
        // 5 done in 10s → 0.5/s, 5 remaining → 10s
        let s = snapshot(10, 3, 1, 1);
        assert_eq!(s.eta(), Some(Duration::from_secs(10)));
        assert_eq!(s.percent(), 50.0);
    }

    #[test]
    fn eta_unknown_before_first_completion() {
        assert_eq!(snapshot(10, 0, 0, 0).eta(), None);
    }

    #[test]
    fn cache_hit_ratio_guards_zero_total() {
        assert_eq!(snapshot(0, 0, 0, 0).cache_hit_ratio(), None);
        assert_eq!(snapshot(4, 1, 3, 0).cache_hit_ratio(), Some(0.75));
        assert_eq!(snapshot(0, 0, 0, 0).percent(), 100.0);
    }

    #[test]
    fn average_only_over_processed() {
        assert_eq!(snapshot(5, 0, 5, 0).average_per_processed(), None);
        assert_eq!(
            snapshot(5, 4, 1, 0).average_per_processed(),
            Some(Duration::from_millis(2500))
        );
    }

    // =========================================================================
    // Ticker
    // =========================================================================

    #[tokio::test]
    async fn ticker_renders_until_stopped() {
        let tracker = Arc::new(ProgressTracker::new(1));
        let renders = Arc::new(AtomicUsize::new(0));
        let counter = renders.clone();
        let ticker = Ticker::spawn(tracker, Duration::from_millis(10), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        ticker.stop().await;
        let after_stop = renders.load(Ordering::SeqCst);
        assert!(after_stop >= 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(renders.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn ticker_stopped_immediately_never_renders() {
        let tracker = Arc::new(ProgressTracker::new(1));
        let renders = Arc::new(AtomicUsize::new(0));
        let counter = renders.clone();
        let ticker = Ticker::spawn(tracker, Duration::from_secs(60), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        ticker.stop().await;
        assert_eq!(renders.load(Ordering::SeqCst), 0);
    }
}
