//! Typed snapshots of kernel accounting counters.
//!
//! A snapshot is the decoded state of one tick's raw reads. CPU and I/O
//! fields are cumulative since process start; the memory fields are
//! instantaneous gauges. Rates and percentages come from differencing two
//! chronologically ordered snapshots, never from a single one.

use ahash::AHashMap as HashMap;
use serde::Serialize;

/// System-wide CPU counters at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SystemSnapshot {
    /// Sum of all per-mode tick counters from the first line of the
    /// system stat record. Monotonically non-decreasing between ticks
    /// under normal operation.
    pub total_cpu_ticks: u64,
}

/// Raw per-process counters at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    /// Kernel-reported process identity, resolved once at watch time.
    pub name: String,
    /// Cumulative user-mode CPU ticks.
    pub utime_ticks: u64,
    /// Cumulative kernel-mode CPU ticks.
    pub stime_ticks: u64,
    pub num_threads: u64,
    /// Virtual memory size gauge, kilobytes.
    pub vm_size_kb: u64,
    /// Resident set size gauge, kilobytes.
    pub vm_rss_kb: u64,
    /// Cumulative bytes read (rchar).
    pub rchar_bytes: u64,
    /// Cumulative bytes written (wchar).
    pub wchar_bytes: u64,
    /// Cumulative read syscalls (syscr).
    pub syscr_count: u64,
    /// Cumulative write syscalls (syscw).
    pub syscw_count: u64,
}

/// One full tick's decoded state: the system counters plus every watched
/// process that was successfully read, keyed by PID.
#[derive(Debug, Clone)]
pub struct TickSnapshot {
    /// Wall-clock seconds since the engine started, stamped by the
    /// scheduler when the tick's reads complete.
    pub time: f64,
    pub system: SystemSnapshot,
    pub processes: HashMap<u32, ProcessSnapshot>,
}

/// The record emitted for one process on one tick. Immutable once
/// produced; appended to the owning process's rolling log and handed to
/// the emitter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputedEntry {
    /// Seconds since engine start.
    pub time: f64,
    pub pid: u32,
    pub name: String,
    /// Total CPU utilization percent over the interval. Always equals
    /// `user_cpu_pct + sys_cpu_pct`; can exceed 100 on multi-core hosts.
    pub cpu_pct: f64,
    /// Moving average of `cpu_pct` over this entry and up to the 10 most
    /// recent prior entries for the same process.
    pub avg_cpu_pct: f64,
    pub user_cpu_pct: f64,
    pub sys_cpu_pct: f64,
    pub vm_rss_kb: u64,
    pub vm_size_kb: u64,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
    pub read_syscalls_per_sec: f64,
    pub write_syscalls_per_sec: f64,
}
