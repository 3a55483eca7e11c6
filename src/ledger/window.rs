//! Bucketed rolling spend window.

use std::time::Duration;
use tokio::time::Instant;

/// Fixed-size ring of spend buckets covering the rolling window.
///
/// Amounts are integer micro-dollars so accumulation is exact. Reading the
/// total is O(1) once expired buckets have been rotated out.
#[derive(Debug, Clone)]
pub struct SpendWindow {
    buckets: Vec<u64>,
    bucket_width: Duration,
    origin: Instant,
    /// Absolute index of the newest bucket
    head: i64,
    total: u64,
}

impl SpendWindow {
    pub fn new(window: Duration, bucket_count: u32, origin: Instant) -> Self {
        let count = bucket_count.max(1);
        let bucket_width = (window / count).max(Duration::from_millis(1));
        Self {
            buckets: vec![0; count as usize],
            bucket_width,
            origin,
            head: 0,
            total: 0,
        }
    }

    fn absolute_index(&self, at: Instant) -> i64 {
        let since = at.saturating_duration_since(self.origin);
        (since.as_nanos() / self.bucket_width.as_nanos()) as i64
    }

    fn slot(&self, absolute: i64) -> usize {
        absolute.rem_euclid(self.buckets.len() as i64) as usize
    }

    /// Rotate out buckets that fell out of the window by `now`.
    fn advance(&mut self, now: Instant) {
        let target = self.absolute_index(now);
        if target <= self.head {
            return;
        }

        let len = self.buckets.len() as i64;
        if target - self.head >= len {
            self.buckets.iter_mut().for_each(|b| *b = 0);
            self.total = 0;
        } else {
            for absolute in (self.head + 1)..=target {
                let slot = self.slot(absolute);
                self.total -= self.buckets[slot];
                self.buckets[slot] = 0;
            }
        }
        self.head = target;
    }

    /// Add spend at `now`.
    pub fn add(&mut self, micros: u64, now: Instant) {
        self.advance(now);
        let slot = self.slot(self.head);
        self.buckets[slot] += micros;
        self.total += micros;
    }

    /// Add spend that happened `age` before `now` (used on warm start).
    ///
    /// Returns false when the spend is already outside the window.
    pub fn add_aged(&mut self, micros: u64, age: Duration, now: Instant) -> bool {
        self.advance(now);
        let back = (age.as_nanos() / self.bucket_width.as_nanos()) as i64;
        if back >= self.buckets.len() as i64 {
            return false;
        }
        let slot = self.slot(self.head - back);
        self.buckets[slot] += micros;
        self.total += micros;
        true
    }

    /// Spend inside the window ending at `now`.
    pub fn total(&mut self, now: Instant) -> u64 {
        self.advance(now);
        self.total
    }

    pub fn window(&self) -> Duration {
        self.bucket_width * self.buckets.len() as u32
    }
}
