//! Bounded per-process history of computed entries.
//!
//! Each watched process keeps the most recent N entries for moving-average
//! smoothing of its CPU utilization. Oldest entries are evicted first.

use std::collections::VecDeque;

use crate::snapshot::ComputedEntry;

/// Number of entries retained per process.
pub const ROLLING_LOG_CAPACITY: usize = 10;

/// A FIFO log with fixed capacity.
#[derive(Debug, Default)]
pub struct RollingLog {
    entries: VecDeque<ComputedEntry>,
}

impl RollingLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(ROLLING_LOG_CAPACITY),
        }
    }

    /// Appends an entry, evicting the oldest if the log is full.
    pub fn push(&mut self, entry: ComputedEntry) {
        if self.entries.len() == ROLLING_LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Mean of `current` together with every retained `cpu_pct` value.
    /// With a full log this is an 11-element moving average, current
    /// sample included.
    pub fn average_with(&self, current: f64) -> f64 {
        let sum: f64 = self.entries.iter().map(|e| e.cpu_pct).sum();
        (sum + current) / (self.entries.len() + 1) as f64
    }

    /// Entries in chronological order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ComputedEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(time: f64, cpu_pct: f64) -> ComputedEntry {
        ComputedEntry {
            time,
            pid: 1,
            name: "test".into(),
            cpu_pct,
            avg_cpu_pct: cpu_pct,
            user_cpu_pct: cpu_pct,
            sys_cpu_pct: 0.0,
            vm_rss_kb: 0,
            vm_size_kb: 0,
            read_bytes_per_sec: 0.0,
            write_bytes_per_sec: 0.0,
            read_syscalls_per_sec: 0.0,
            write_syscalls_per_sec: 0.0,
        }
    }

    #[test]
    fn test_push_and_order() {
        let mut log = RollingLog::new();
        assert!(log.is_empty());

        log.push(entry(1.0, 10.0));
        log.push(entry(2.0, 20.0));
        log.push(entry(3.0, 30.0));

        assert_eq!(log.len(), 3);
        let times: Vec<f64> = log.iter().map(|e| e.time).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_fifo_eviction_after_many_ticks() {
        let mut log = RollingLog::new();
        for i in 0..50 {
            log.push(entry(i as f64, i as f64));
        }

        // Never more than the capacity, oldest evicted first.
        assert_eq!(log.len(), ROLLING_LOG_CAPACITY);
        let times: Vec<f64> = log.iter().map(|e| e.time).collect();
        assert_eq!(times[0], 40.0);
        assert_eq!(times[9], 49.0);
    }

    #[test]
    fn test_average_with_empty_log() {
        let log = RollingLog::new();
        assert_eq!(log.average_with(60.0), 60.0);
    }

    #[test]
    fn test_average_with_partial_log() {
        let mut log = RollingLog::new();
        log.push(entry(1.0, 10.0));
        log.push(entry(2.0, 20.0));

        // (10 + 20 + 30) / 3
        assert_eq!(log.average_with(30.0), 20.0);
    }

    #[test]
    fn test_average_with_full_log_uses_last_ten() {
        let mut log = RollingLog::new();
        for i in 0..20 {
            log.push(entry(i as f64, i as f64));
        }

        // Retained cpu values are 10..=19; average with current = 30 is
        // (10+11+...+19 + 30) / 11.
        let expected = (145.0 + 30.0) / 11.0;
        assert!((log.average_with(30.0) - expected).abs() < 1e-12);
    }
}
