//! Differencing of successive snapshots into rates and percentages.
//!
//! Cumulative counters only become meaningful as deltas between two
//! chronologically ordered snapshots: CPU ticks are scaled against the
//! elapsed system-wide total, I/O counters against elapsed wall time.

use ahash::AHashMap as HashMap;
use once_cell::sync::Lazy;
use tracing::warn;

use crate::error::Error;
use crate::rolling::RollingLog;
use crate::snapshot::{ComputedEntry, TickSnapshot};

fn get_num_cores() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf is safe to call with _SC_NPROCESSORS_ONLN.
        // Returns -1 on error, handled by the > 0 check.
        unsafe {
            let n = libc::sysconf(libc::_SC_NPROCESSORS_ONLN);
            if n > 0 {
                return n as usize;
            }
        }
    }
    1
}

/// Online core count, captured once at startup. Utilization percentages
/// are scaled by this, so a saturated 4-core host reads as 400%.
pub static NUM_CORES: Lazy<usize> = Lazy::new(get_num_cores);

/// Computes one tick's entries from the previous and current snapshots.
///
/// Pairing is by PID. A PID present in `prev` but absent from `curr`
/// (exited or dropped) is silently skipped. `logs` supplies each
/// process's rolling history for the moving average; entries are
/// returned in ascending PID order so serialization is deterministic.
///
/// A zero elapsed tick count or non-positive elapsed wall time would
/// divide to non-finite values, so such a tick deliberately emits
/// nothing and logs a warning instead. A system counter regression is
/// fatal.
pub fn diff_ticks(
    prev: &TickSnapshot,
    curr: &TickSnapshot,
    num_cores: usize,
    logs: &HashMap<u32, RollingLog>,
) -> Result<Vec<ComputedEntry>, Error> {
    if curr.system.total_cpu_ticks < prev.system.total_cpu_ticks {
        return Err(Error::CounterRegression {
            prev: prev.system.total_cpu_ticks,
            curr: curr.system.total_cpu_ticks,
        });
    }

    let elapsed_ticks = curr.system.total_cpu_ticks - prev.system.total_cpu_ticks;
    let elapsed_wall = curr.time - prev.time;

    if elapsed_ticks == 0 || elapsed_wall <= 0.0 {
        warn!(
            elapsed_ticks,
            elapsed_wall, "zero-length sample interval, skipping tick output"
        );
        return Ok(Vec::new());
    }

    let scale = num_cores as f64 * 100.0 / elapsed_ticks as f64;

    let mut pids: Vec<u32> = curr
        .processes
        .keys()
        .copied()
        .filter(|pid| prev.processes.contains_key(pid))
        .collect();
    pids.sort_unstable();

    let mut entries = Vec::with_capacity(pids.len());
    for pid in pids {
        let cp = &curr.processes[&pid];
        let pp = &prev.processes[&pid];

        // Saturating deltas: a fresh exec reusing a PID restarts its
        // cumulative counters from zero.
        let du = cp.utime_ticks.saturating_sub(pp.utime_ticks);
        let ds = cp.stime_ticks.saturating_sub(pp.stime_ticks);

        let user_cpu_pct = scale * du as f64;
        let sys_cpu_pct = scale * ds as f64;
        let cpu_pct = user_cpu_pct + sys_cpu_pct;

        let avg_cpu_pct = match logs.get(&pid) {
            Some(log) => log.average_with(cpu_pct),
            None => cpu_pct,
        };

        let per_sec =
            |c: u64, p: u64| -> f64 { c.saturating_sub(p) as f64 / elapsed_wall };

        entries.push(ComputedEntry {
            time: curr.time,
            pid,
            name: cp.name.clone(),
            cpu_pct,
            avg_cpu_pct,
            user_cpu_pct,
            sys_cpu_pct,
            vm_rss_kb: cp.vm_rss_kb,
            vm_size_kb: cp.vm_size_kb,
            read_bytes_per_sec: per_sec(cp.rchar_bytes, pp.rchar_bytes),
            write_bytes_per_sec: per_sec(cp.wchar_bytes, pp.wchar_bytes),
            read_syscalls_per_sec: per_sec(cp.syscr_count, pp.syscr_count),
            write_syscalls_per_sec: per_sec(cp.syscw_count, pp.syscw_count),
        });
    }

    Ok(entries)
}
