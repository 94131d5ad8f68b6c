//! CLI output formatting for publishing runs and maintenance commands.
//!
//! # Output Format
//!
//! ## Run
//!
//! ```text
//! Found 42 images in markdown files
//! Cached: 39 | To process: 3
//!
//! [ 67%] 2/3 images | Processed: 1 | Skipped: 1 | Failed: 0 | Elapsed: 4s | ETA: 2s
//!
//! === Processing Summary ===
//! Total images:     3
//! Processed:        2
//! Skipped (cached): 0
//! Failed:           1
//! Total time:       7s
//! Avg time/image:   3s
//!
//! === Errors ===
//! 1. abc.jpeg (https://example.com/abc): fetch failed: failed after 3 retries: HTTP 404
//!
//! Cache hit rate: 0.0%
//! ```
//!
//! ## Verify
//!
//! ```text
//! Checked 40 entries (160 variant paths)
//! broken.jpeg: 2 missing
//!     images/broken.jpeg_1.jpeg
//!     images/broken.jpeg.jpeg
//! ```
//!
//! # Architecture
//!
//! Each report has a `format_*` function (returns `Vec<String>` or `String`)
//! for testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::cache::CacheStats;
use crate::maintenance::{RebuildReport, RepairReport, VerifyReport};
use crate::pipeline::{Partition, RunReport};
use crate::progress::ProgressSnapshot;
use std::io::Write;
use std::time::Duration;

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

/// Whole seconds, largest units first: `1h2m3s`, `2m5s`, `4s`.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs_f64().round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

// ============================================================================
// Run progress
// ============================================================================

/// The single overwritten status line shown while jobs run.
pub fn format_status_line(s: &ProgressSnapshot) -> String {
    let eta = match s.eta() {
        Some(eta) => format_duration(eta),
        None => "calculating...".to_string(),
    };
    format!(
        "[{:3.0}%] {}/{} images | Processed: {} | Skipped: {} | Failed: {} | Elapsed: {} | ETA: {}",
        s.percent(),
        s.completed(),
        s.total,
        s.processed,
        s.skipped,
        s.failed,
        format_duration(s.elapsed),
        eta
    )
}

pub fn print_status_line(snapshot: &ProgressSnapshot) {
    print!("\r{}", format_status_line(snapshot));
    // Nothing useful to do if stdout is gone
    let _ = std::io::stdout().flush();
}

pub fn format_partition(partition: &Partition) -> Vec<String> {
    let mut lines = vec![
        format!("Found {} images in markdown files", partition.found),
        format!(
            "Cached: {} | To process: {}",
            partition.cached,
            partition.jobs.len()
        ),
    ];
    if partition.jobs.is_empty() {
        lines.push("All images are cached, nothing to process".to_string());
    }
    lines
}

pub fn print_partition(partition: &Partition) {
    print_lines(&format_partition(partition));
}

/// Final summary. Shown after every run, failed or not.
pub fn format_run_summary(report: &RunReport) -> Vec<String> {
    let s = &report.snapshot;
    if s.total == 0 {
        return Vec::new();
    }

    let mut lines = vec![
        String::new(),
        "=== Processing Summary ===".to_string(),
        format!("Total images:     {}", s.total),
        format!("Processed:        {}", s.processed),
        format!("Skipped (cached): {}", s.skipped),
        format!("Failed:           {}", s.failed),
        format!("Total time:       {}", format_duration(s.elapsed)),
    ];
    if let Some(avg) = s.average_per_processed() {
        lines.push(format!("Avg time/image:   {}", format_duration(avg)));
    }

    if !report.errors.is_empty() {
        lines.push(String::new());
        lines.push("=== Errors ===".to_string());
        for (i, e) in report.errors.iter().enumerate() {
            lines.push(format!("{}. {} ({}): {}", i + 1, e.filename, e.source, e.error));
        }
    }

    if let Some(ratio) = s.cache_hit_ratio() {
        lines.push(String::new());
        lines.push(format!("Cache hit rate: {:.1}%", ratio * 100.0));
    }
    if report.dry_run {
        lines.push("Dry run: nothing was fetched, published or saved".to_string());
    }
    lines
}

pub fn print_run_summary(report: &RunReport) {
    // Step off the status line first
    if report.snapshot.total > 0 {
        println!();
    }
    print_lines(&format_run_summary(report));
}

// ============================================================================
// Maintenance
// ============================================================================

pub fn format_cache_stats(stats: &CacheStats) -> Vec<String> {
    let mut lines = vec!["=== Cache Statistics ===".to_string()];
    lines.extend(stats.to_string().lines().map(str::to_string));
    lines
}

pub fn print_cache_stats(stats: &CacheStats) {
    print_lines(&format_cache_stats(stats));
}

pub fn format_rebuild(report: &RebuildReport) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Found {} unique images in {} stored objects",
            report.discovered, report.objects
        ),
        format!("Added {} cache entries", report.added),
    ];
    if !report.unrecognized.is_empty() {
        lines.push(format!(
            "Ignored {} objects that are not variants:",
            report.unrecognized.len()
        ));
        lines.extend(report.unrecognized.iter().map(|p| format!("    {p}")));
    }
    lines
}

pub fn print_rebuild(report: &RebuildReport) {
    print_lines(&format_rebuild(report));
}

pub fn format_verify(report: &VerifyReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Checked {} entries ({} variant paths)",
        report.entries_checked, report.paths_checked
    )];
    if report.is_clean() {
        lines.push("All variants present".to_string());
    }
    for problem in &report.problems {
        lines.push(format!(
            "{}: {} missing",
            problem.filename,
            problem.missing.len()
        ));
        lines.extend(problem.missing.iter().map(|p| format!("    {p}")));
    }
    lines
}

pub fn print_verify(report: &VerifyReport) {
    print_lines(&format_verify(report));
}

pub fn format_repair(report: &RepairReport) -> Vec<String> {
    let mut lines = format_verify(&report.verify);
    if !report.removed.is_empty() {
        lines.push(format!(
            "Removed {} entries; they will be reprocessed on the next run",
            report.removed.len()
        ));
    }
    lines
}

pub fn print_repair(report: &RepairReport) {
    print_lines(&format_repair(report));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maintenance::EntryProblem;
    use crate::pipeline::Job;
    use crate::progress::ProcessingError;
    use chrono::Utc;

    fn snapshot(total: usize, processed: usize, skipped: usize, failed: usize) -> ProgressSnapshot {
        ProgressSnapshot {
            total,
            processed,
            skipped,
            failed,
            current: None,
            elapsed: Duration::from_secs(8),
        }
    }

    fn report(snapshot: ProgressSnapshot, errors: Vec<ProcessingError>) -> RunReport {
        RunReport {
            found: snapshot.total,
            cached: 0,
            snapshot,
            errors,
            dry_run: false,
            saved: true,
        }
    }

    // =========================================================================
    // Durations / status line
    // =========================================================================

    #[test]
    fn duration_units() {
        assert_eq!(format_duration(Duration::from_millis(400)), "0s");
        assert_eq!(format_duration(Duration::from_millis(4_600)), "5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m5s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h2m3s");
    }

    #[test]
    fn status_line_before_first_completion() {
        assert_eq!(
            format_status_line(&snapshot(4, 0, 0, 0)),
            "[  0%] 0/4 images | Processed: 0 | Skipped: 0 | Failed: 0 | Elapsed: 8s | ETA: calculating..."
        );
    }

    #[test]
    fn status_line_with_eta() {
        // 2 of 4 in 8s → 8s left
        assert_eq!(
            format_status_line(&snapshot(4, 1, 0, 1)),
            "[ 50%] 2/4 images | Processed: 1 | Skipped: 0 | Failed: 1 | Elapsed: 8s | ETA: 8s"
        );
    }

    // =========================================================================
    // Partition / summary
    // =========================================================================

    #[test]
    fn partition_lines() {
        let partition = Partition {
            found: 3,
            cached: 2,
            jobs: vec![Job {
                filename: "a.jpeg".into(),
                source: "https://x/a".into(),
            }],
        };
        assert_eq!(
            format_partition(&partition),
            vec!["Found 3 images in markdown files", "Cached: 2 | To process: 1"]
        );
    }

    #[test]
    fn partition_nothing_to_do() {
        let lines = format_partition(&Partition {
            found: 2,
            cached: 2,
            jobs: vec![],
        });
        assert_eq!(lines[2], "All images are cached, nothing to process");
    }

    #[test]
    fn summary_lists_errors_and_hit_rate() {
        let errors = vec![ProcessingError {
            filename: "a.jpeg".into(),
            source: "https://x/a".into(),
            error: "fetch failed: HTTP 404".into(),
            time: Utc::now(),
        }];
        let lines = format_run_summary(&report(snapshot(4, 2, 1, 1), errors));

        assert!(lines.contains(&"Total images:     4".to_string()));
        assert!(lines.contains(&"Avg time/image:   4s".to_string()));
        assert!(lines.contains(&"1. a.jpeg (https://x/a): fetch failed: HTTP 404".to_string()));
        assert_eq!(lines.last().unwrap(), "Cache hit rate: 25.0%");
    }

    #[test]
    fn summary_without_processed_has_no_average() {
        let lines = format_run_summary(&report(snapshot(2, 0, 2, 0), vec![]));
        assert!(!lines.iter().any(|l| l.starts_with("Avg time")));
        assert!(!lines.iter().any(|l| l.contains("=== Errors ===")));
        assert_eq!(lines.last().unwrap(), "Cache hit rate: 100.0%");
    }

    #[test]
    fn summary_of_empty_run_is_empty() {
        assert!(format_run_summary(&report(snapshot(0, 0, 0, 0), vec![])).is_empty());
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    #[test]
    fn verify_lines() {
        let report = VerifyReport {
            entries_checked: 2,
            paths_checked: 8,
            problems: vec![EntryProblem {
                filename: "b.jpeg".into(),
                missing: vec!["images/b.jpeg_0.jpeg".into()],
            }],
        };
        assert_eq!(
            format_verify(&report),
            vec![
                "Checked 2 entries (8 variant paths)",
                "b.jpeg: 1 missing",
                "    images/b.jpeg_0.jpeg",
            ]
        );
    }

    #[test]
    fn clean_verify() {
        let lines = format_verify(&VerifyReport::default());
        assert_eq!(lines[1], "All variants present");
    }

    #[test]
    fn stats_lines_have_header() {
        let stats = CacheStats {
            version: "2.0".into(),
            entries: 3,
            with_hash: 2,
            without_hash: 1,
            variants: 8,
            dirty: false,
        };
        let lines = format_cache_stats(&stats);
        assert_eq!(lines[0], "=== Cache Statistics ===");
        assert!(lines.iter().any(|l| l.starts_with("entries_without_hash:") && l.ends_with('1')));
    }
}
