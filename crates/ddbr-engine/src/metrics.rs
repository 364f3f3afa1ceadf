//! Restore metrics and the final report
//!
//! Counters sit on the hot path of every worker, so they are plain atomics
//! with relaxed ordering. The processing-time sum is updated once per batch
//! under a short-held lock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Thread-safe restore counters
pub struct Metrics {
    records_processed: AtomicI64,
    batches_written: AtomicI64,
    errors: AtomicI64,
    corrupt_count: AtomicI64,

    // Total time spent inside table writes
    processing_time: Mutex<Duration>,
    started: Instant,
    start_time: DateTime<Utc>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            records_processed: AtomicI64::new(0),
            batches_written: AtomicI64::new(0),
            errors: AtomicI64::new(0),
            corrupt_count: AtomicI64::new(0),
            processing_time: Mutex::new(Duration::ZERO),
            started: Instant::now(),
            start_time: Utc::now(),
        }
    }

    pub fn record_processed(&self) {
        self.records_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_written(&self) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_corrupt(&self) {
        self.corrupt_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processing_time(&self, elapsed: Duration) {
        if let Ok(mut total) = self.processing_time.lock() {
            *total += elapsed;
        }
    }

    pub fn records_processed(&self) -> i64 {
        self.records_processed.load(Ordering::Relaxed)
    }

    pub fn batches_written(&self) -> i64 {
        self.batches_written.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> i64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn corrupt_count(&self) -> i64 {
        self.corrupt_count.load(Ordering::Relaxed)
    }

    /// Snapshot the counters into a final report
    pub fn report(&self) -> Report {
        let duration = self.started.elapsed();
        let total_items = self.records_processed();
        let throughput = if duration.as_secs_f64() > 0.0 {
            total_items as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Report {
            start_time: self.start_time,
            end_time: Utc::now(),
            total_items,
            corrupt_count: self.corrupt_count(),
            duration,
            throughput,
        }
    }
}

/// Final restore report, serializable as JSON and printable as text
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_items: i64,
    pub corrupt_count: i64,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    pub throughput: f64,
}

fn serialize_duration<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_duration(*d))
}

/// Render a duration the way a human reads one: "250ms", "12.40s", "3m5s"
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", d.as_millis())
    } else if secs < 60.0 {
        format!("{secs:.2}s")
    } else {
        let whole = d.as_secs();
        let h = whole / 3600;
        let m = (whole % 3600) / 60;
        let s = whole % 60;
        if h > 0 {
            format!("{h}h{m}m{s}s")
        } else {
            format!("{m}m{s}s")
        }
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Restore finished in {}\nTotal items: {}\nCorrupt items: {}\nThroughput: {:.2} items/sec",
            format_duration(self.duration),
            self.total_items,
            self.corrupt_count,
            self.throughput,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let m = Metrics::new();
        m.record_processed();
        m.record_processed();
        m.record_batch_written();
        m.record_error();
        m.record_corrupt();

        assert_eq!(m.records_processed(), 2);
        assert_eq!(m.batches_written(), 1);
        assert_eq!(m.errors(), 1);
        assert_eq!(m.corrupt_count(), 1);
    }

    #[test]
    fn test_report_snapshot() {
        let m = Metrics::new();
        for _ in 0..10 {
            m.record_processed();
        }
        m.record_corrupt();

        let report = m.report();
        assert_eq!(report.total_items, 10);
        assert_eq!(report.corrupt_count, 1);
        assert!(report.end_time >= report.start_time);
        assert!(report.throughput >= 0.0);
    }

    #[test]
    fn test_report_json_shape() {
        let report = Report {
            start_time: Utc::now(),
            end_time: Utc::now(),
            total_items: 42,
            corrupt_count: 2,
            duration: Duration::from_millis(1500),
            throughput: 28.0,
        };
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["totalItems"], 42);
        assert_eq!(json["corruptCount"], 2);
        assert_eq!(json["duration"], "1.50s");
        assert_eq!(json["throughput"], 28.0);
        assert!(json.get("startTime").is_some());
        assert!(json.get("endTime").is_some());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(12_400)), "12.40s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m5s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h2m3s");
    }

    #[test]
    fn test_display_is_four_lines() {
        let report = Report {
            start_time: Utc::now(),
            end_time: Utc::now(),
            total_items: 3,
            corrupt_count: 0,
            duration: Duration::from_secs(2),
            throughput: 1.5,
        };
        let text = report.to_string();
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("Total items: 3"));
        assert!(text.contains("Throughput: 1.50 items/sec"));
    }
}
