//! The set of currently tracked processes.
//!
//! Entries are keyed by PID; the kernel-reported name is resolved once at
//! watch time and kept as a display attribute. Each entry owns its open
//! accounting handles and a rolling log of recent computed entries (held
//! in a side table keyed by the same PID so the differ can borrow all
//! logs at once). Pausing keeps both; removal drops both.

use ahash::AHashMap as HashMap;
use std::fmt;

use crate::reader::ProcHandles;
use crate::rolling::RollingLog;
use crate::snapshot::ComputedEntry;

/// A watch target: either a PID or a process name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    Pid(u32),
    Name(String),
}

impl From<u32> for WatchTarget {
    fn from(pid: u32) -> Self {
        WatchTarget::Pid(pid)
    }
}

impl From<&str> for WatchTarget {
    fn from(name: &str) -> Self {
        WatchTarget::Name(name.to_string())
    }
}

impl From<String> for WatchTarget {
    fn from(name: String) -> Self {
        WatchTarget::Name(name)
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchTarget::Pid(pid) => write!(f, "{}", pid),
            WatchTarget::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Identity and resources for one tracked process.
#[derive(Debug)]
pub struct WatchedProcess {
    pub pid: u32,
    pub name: String,
    /// `false` marks a paused entry: registered, handles kept open, but
    /// excluded from reads and output.
    pub watching: bool,
    /// `None` after the engine stops and releases all handles.
    pub handles: Option<ProcHandles>,
}

impl WatchedProcess {
    pub fn new(pid: u32, name: String, handles: ProcHandles) -> Self {
        Self {
            pid,
            name,
            watching: true,
            handles: Some(handles),
        }
    }
}

/// All tracked processes for one engine instance.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    procs: HashMap<u32, WatchedProcess>,
    logs: HashMap<u32, RollingLog>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.procs.contains_key(&pid)
    }

    /// Registers a process, creating its empty rolling log.
    pub fn insert(&mut self, proc: WatchedProcess) {
        self.logs.insert(proc.pid, RollingLog::new());
        self.procs.insert(proc.pid, proc);
    }

    /// Maps a target onto a registered PID. Name lookups that match more
    /// than one entry pick the lowest PID so the result is deterministic.
    pub fn resolve(&self, target: &WatchTarget) -> Option<u32> {
        match target {
            WatchTarget::Pid(pid) => self.procs.contains_key(pid).then_some(*pid),
            WatchTarget::Name(name) => self
                .procs
                .values()
                .filter(|p| p.name == *name)
                .map(|p| p.pid)
                .min(),
        }
    }

    pub fn get(&self, pid: u32) -> Option<&WatchedProcess> {
        self.procs.get(&pid)
    }

    /// Marks an entry as reporting or paused.
    pub fn set_watching(&mut self, pid: u32, watching: bool) -> bool {
        match self.procs.get_mut(&pid) {
            Some(p) => {
                p.watching = watching;
                true
            }
            None => false,
        }
    }

    /// Drops an entry together with its rolling log; the returned value
    /// carries the handles, which close on drop.
    pub fn remove(&mut self, pid: u32) -> Option<WatchedProcess> {
        self.logs.remove(&pid);
        self.procs.remove(&pid)
    }

    /// Entries that participate in reads this tick: watching, with
    /// handles still open.
    pub fn active(&self) -> impl Iterator<Item = &WatchedProcess> {
        self.procs
            .values()
            .filter(|p| p.watching && p.handles.is_some())
    }

    /// Appends a computed entry to its process's rolling log.
    pub fn record_entry(&mut self, entry: ComputedEntry) {
        if let Some(log) = self.logs.get_mut(&entry.pid) {
            log.push(entry);
        }
    }

    /// All rolling logs, keyed by PID, for the differ's moving average.
    pub fn logs(&self) -> &HashMap<u32, RollingLog> {
        &self.logs
    }

    pub fn log_for(&self, pid: u32) -> Option<&RollingLog> {
        self.logs.get(&pid)
    }

    /// Releases every open handle, watching or not. Entries and rolling
    /// logs stay registered.
    pub fn close_all(&mut self) {
        for p in self.procs.values_mut() {
            p.handles = None;
        }
    }

    /// Number of entries whose handles are still open.
    pub fn open_handle_count(&self) -> usize {
        self.procs.values().filter(|p| p.handles.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchedProcess> {
        self.procs.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::open_process;
    use tempfile::tempdir;

    fn fake_handles(dir: &std::path::Path, pid: u32) -> ProcHandles {
        let proc_dir = dir.join(pid.to_string());
        std::fs::create_dir_all(&proc_dir).unwrap();
        for f in ["stat", "status", "io"] {
            std::fs::write(proc_dir.join(f), "x").unwrap();
        }
        open_process(dir, pid).unwrap()
    }

    fn registry_with(dir: &std::path::Path, entries: &[(u32, &str)]) -> WatchRegistry {
        let mut reg = WatchRegistry::new();
        for (pid, name) in entries {
            reg.insert(WatchedProcess::new(
                *pid,
                name.to_string(),
                fake_handles(dir, *pid),
            ));
        }
        reg
    }

    #[test]
    fn test_resolve_by_pid_and_name() {
        let dir = tempdir().unwrap();
        let reg = registry_with(dir.path(), &[(10, "nginx"), (20, "postgres")]);

        assert_eq!(reg.resolve(&WatchTarget::Pid(10)), Some(10));
        assert_eq!(reg.resolve(&WatchTarget::from("postgres")), Some(20));
        assert_eq!(reg.resolve(&WatchTarget::Pid(99)), None);
        assert_eq!(reg.resolve(&WatchTarget::from("mysql")), None);
    }

    #[test]
    fn test_resolve_duplicate_name_picks_lowest_pid() {
        let dir = tempdir().unwrap();
        let reg = registry_with(dir.path(), &[(30, "worker"), (12, "worker"), (25, "worker")]);

        assert_eq!(reg.resolve(&WatchTarget::from("worker")), Some(12));
    }

    #[test]
    fn test_pause_excludes_from_active() {
        let dir = tempdir().unwrap();
        let mut reg = registry_with(dir.path(), &[(1, "a"), (2, "b")]);

        assert!(reg.set_watching(1, false));
        let active: Vec<u32> = reg.active().map(|p| p.pid).collect();
        assert_eq!(active, vec![2]);

        // Paused entry keeps its handles and its log.
        assert!(reg.get(1).unwrap().handles.is_some());
        assert!(reg.log_for(1).is_some());
    }

    #[test]
    fn test_remove_drops_log() {
        let dir = tempdir().unwrap();
        let mut reg = registry_with(dir.path(), &[(1, "a")]);

        assert!(reg.remove(1).is_some());
        assert!(reg.log_for(1).is_none());
        assert!(reg.is_empty());
        assert!(reg.remove(1).is_none());
    }

    #[test]
    fn test_close_all_releases_handles_once() {
        let dir = tempdir().unwrap();
        let mut reg = registry_with(dir.path(), &[(1, "a"), (2, "b")]);
        reg.set_watching(2, false);

        assert_eq!(reg.open_handle_count(), 2);
        reg.close_all();
        // Closed regardless of watching state; entries stay registered.
        assert_eq!(reg.open_handle_count(), 0);
        assert_eq!(reg.len(), 2);
        reg.close_all(); // idempotent
        assert_eq!(reg.open_handle_count(), 0);
    }

    #[test]
    fn test_record_entry_goes_to_owning_log() {
        let dir = tempdir().unwrap();
        let mut reg = registry_with(dir.path(), &[(1, "a")]);

        let entry = ComputedEntry {
            time: 1.0,
            pid: 1,
            name: "a".into(),
            cpu_pct: 50.0,
            avg_cpu_pct: 50.0,
            user_cpu_pct: 50.0,
            sys_cpu_pct: 0.0,
            vm_rss_kb: 0,
            vm_size_kb: 0,
            read_bytes_per_sec: 0.0,
            write_bytes_per_sec: 0.0,
            read_syscalls_per_sec: 0.0,
            write_syscalls_per_sec: 0.0,
        };
        reg.record_entry(entry);
        assert_eq!(reg.log_for(1).unwrap().len(), 1);
    }
}
