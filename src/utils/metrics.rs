use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::millis;

/// Summary of one batch run's cost split.
///
/// `avg_compute_ms` and `avg_io_ms` are per written (item, score) pair;
/// `io_compute_ratio` is W/C and is `None` when no compute time was measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
    pub users: u64,
    pub segments: u64,
    pub items_written: u64,
    pub compute_ms: f64,
    pub io_ms: f64,
    pub avg_compute_ms: f64,
    pub avg_io_ms: f64,
    pub io_compute_ratio: Option<f64>,
}

/// Accumulates pure-scoring time separately from cache-write time.
#[derive(Debug, Clone, Default)]
pub struct BatchTimings {
    compute: Duration,
    io: Duration,
    items_written: u64,
    users: u64,
    segments: std::collections::HashSet<String>,
}

impl BatchTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_compute(&mut self, elapsed: Duration) {
        self.compute += elapsed;
        self.users += 1;
    }

    pub fn record_write(&mut self, segment: &str, elapsed: Duration, written: usize) {
        self.io += elapsed;
        self.items_written += written as u64;
        if !self.segments.contains(segment) {
            self.segments.insert(segment.to_string());
        }
    }

    pub fn calculate_metrics(&self) -> BatchMetrics {
        // empty runs divide by one
        let n = self.items_written.max(1) as f64;
        let compute_ms = millis(self.compute);
        let io_ms = millis(self.io);
        let avg_compute_ms = compute_ms / n;
        let avg_io_ms = io_ms / n;

        BatchMetrics {
            users: self.users,
            segments: self.segments.len() as u64,
            items_written: self.items_written,
            compute_ms,
            io_ms,
            avg_compute_ms,
            avg_io_ms,
            io_compute_ratio: if avg_compute_ms > 0.0 {
                Some(avg_io_ms / avg_compute_ms)
            } else {
                None
            },
        }
    }
}
