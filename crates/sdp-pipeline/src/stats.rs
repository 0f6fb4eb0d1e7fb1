//! Per-unit counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sink::LoadReport;

/// Statistics collected while a unit runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UnitStats {
    /// Rows read from the source
    pub rows_extracted: u64,
    /// Rows written by the sink, summed over every load call
    pub rows_loaded: u64,
    /// Sink calls made
    pub load_calls: u64,
    /// Identifiers skipped after a non-success response
    pub identifiers_skipped: u64,
    /// Bytes read from a remote file
    pub bytes_read: u64,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UnitStats {
    /// Start a new set of counters now
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Stamp completion time and duration
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn add_extracted(&mut self, rows: usize) {
        self.rows_extracted += rows as u64;
    }

    pub fn record_load(&mut self, report: &LoadReport) {
        self.load_calls += 1;
        self.rows_loaded += report.rows_written;
    }

    pub fn inc_skipped(&mut self) {
        self.identifiers_skipped += 1;
    }

    pub fn add_bytes(&mut self, bytes: usize) {
        self.bytes_read += bytes as u64;
    }

    /// Fold another unit's counters into these, keeping the widest time span
    pub fn merge(&mut self, other: &UnitStats) {
        self.rows_extracted += other.rows_extracted;
        self.rows_loaded += other.rows_loaded;
        self.load_calls += other.load_calls;
        self.identifiers_skipped += other.identifiers_skipped;
        self.bytes_read += other.bytes_read;
        self.started_at = match (self.started_at, other.started_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.completed_at = match (self.completed_at, other.completed_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    /// Loaded rows per second
    pub fn rows_per_second(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.rows_loaded as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_load() {
        let mut stats = UnitStats::new();
        stats.record_load(&LoadReport::written("api_raw", 1));
        stats.record_load(&LoadReport::written("api_raw", 2));
        stats.record_load(&LoadReport::skipped("api_raw"));

        assert_eq!(stats.load_calls, 3);
        assert_eq!(stats.rows_loaded, 3);
    }

    #[test]
    fn test_complete_sets_duration() {
        let mut stats = UnitStats::new();
        stats.started_at = Some(Utc::now() - Duration::seconds(2));
        stats.rows_loaded = 10;
        stats.complete();

        assert!(stats.completed_at.is_some());
        assert!(stats.duration_secs >= 2.0);
        assert!(stats.rows_per_second() > 0.0);
    }

    #[test]
    fn test_merge() {
        let now = Utc::now();
        let mut a = UnitStats {
            rows_extracted: 5,
            rows_loaded: 5,
            load_calls: 1,
            started_at: Some(now),
            completed_at: Some(now + Duration::seconds(1)),
            ..Default::default()
        };
        let b = UnitStats {
            rows_extracted: 9,
            rows_loaded: 45,
            load_calls: 9,
            identifiers_skipped: 2,
            started_at: Some(now - Duration::seconds(1)),
            completed_at: Some(now + Duration::seconds(3)),
            ..Default::default()
        };

        a.merge(&b);
        assert_eq!(a.rows_extracted, 14);
        assert_eq!(a.rows_loaded, 50);
        assert_eq!(a.load_calls, 10);
        assert_eq!(a.identifiers_skipped, 2);
        assert_eq!(a.duration_secs, 4.0);
    }
}
