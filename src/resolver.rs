//! Name-to-PID resolution.
//!
//! Watching by name needs an external lookup; the default implementation
//! scans the proc root for numeric directories and compares each stat
//! record's parenthesised name. Callers watching "the process" by name
//! should be aware that when several PIDs share the name only one is
//! tracked: the last in resolver order.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Error;
use crate::parse::parse_proc_stat;

/// Collaborator interface for resolving a process name to PIDs.
///
/// Implementations return every matching PID in a deterministic order;
/// an empty list means the name did not resolve.
pub trait PidResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Vec<u32>, Error>;
}

/// Default resolver: walks the proc root directly.
///
/// PIDs are returned in ascending order, so the engine's last-PID
/// tie-break selects the highest (most recently spawned, PID wraparound
/// aside).
#[derive(Debug, Clone)]
pub struct ProcScanResolver {
    proc_root: PathBuf,
}

impl ProcScanResolver {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }
}

impl PidResolver for ProcScanResolver {
    fn resolve(&self, name: &str) -> Result<Vec<u32>, Error> {
        let mut pids = Vec::new();

        let entries = fs::read_dir(&self.proc_root).map_err(|source| Error::Read {
            path: self.proc_root.clone(),
            source,
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            let pid: u32 = match path.file_name().and_then(|s| s.to_str()) {
                Some(s) if s.chars().all(|c| c.is_ascii_digit()) => match s.parse() {
                    Ok(v) => v,
                    Err(_) => continue,
                },
                _ => continue,
            };

            // Processes can exit between the directory listing and the
            // stat read; such candidates are simply skipped.
            let Ok(buf) = fs::read(path.join("stat")) else {
                continue;
            };
            let Ok(record) = parse_proc_stat(&buf) else {
                continue;
            };
            if record.name == name {
                pids.push(pid);
            }
        }

        pids.sort_unstable();
        Ok(pids)
    }
}

/// Resolves a name to the single PID the engine will track.
///
/// Multiple matches select the last PID in resolver order; the ambiguity
/// is surfaced with a warning rather than silently swallowed. No match
/// is a [`Error::Resolution`].
pub fn pick_pid(resolver: &dyn PidResolver, name: &str) -> Result<u32, Error> {
    let pids = resolver.resolve(name)?;
    match pids.as_slice() {
        [] => Err(Error::Resolution(name.to_string())),
        [pid] => Ok(*pid),
        many => {
            let pid = many[many.len() - 1];
            warn!(
                name,
                candidates = ?many,
                selected = pid,
                "process name matches multiple pids, tracking the last"
            );
            Ok(pid)
        }
    }
}

/// Writes a minimal but well-formed stat record for a synthetic proc
/// tree.
#[cfg(test)]
pub(crate) fn write_fake_stat(proc_root: &Path, pid: u32, name: &str, utime: u64, stime: u64) {
    let dir = proc_root.join(pid.to_string());
    fs::create_dir_all(&dir).unwrap();
    let stat = format!(
        "{pid} ({name}) S 1 {pid} {pid} 0 -1 4194304 0 0 0 0 {utime} {stime} 0 0 20 0 1 0 100 200 300 400 0 0 0 0 0 0 0 0 0 0 0 0 17 1 0 0 0 0 0"
    );
    fs::write(dir.join("stat"), stat).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct StubResolver(Vec<u32>);

    impl PidResolver for StubResolver {
        fn resolve(&self, _name: &str) -> Result<Vec<u32>, Error> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_pick_pid_single_match() {
        let resolver = StubResolver(vec![42]);
        assert_eq!(pick_pid(&resolver, "nginx").unwrap(), 42);
    }

    #[test]
    fn test_pick_pid_tie_break_is_last() {
        let resolver = StubResolver(vec![111, 222, 333]);
        assert_eq!(pick_pid(&resolver, "worker").unwrap(), 333);
    }

    #[test]
    fn test_pick_pid_no_match() {
        let resolver = StubResolver(vec![]);
        let err = pick_pid(&resolver, "ghost").unwrap_err();
        assert!(matches!(err, Error::Resolution(name) if name == "ghost"));
    }

    #[test]
    fn test_proc_scan_resolver_matches_by_name() {
        let dir = tempdir().expect("Failed to create temp dir");
        write_fake_stat(dir.path(), 101, "alpha", 0, 0);
        write_fake_stat(dir.path(), 305, "beta", 0, 0);
        write_fake_stat(dir.path(), 207, "alpha", 0, 0);
        // Non-process entries are skipped.
        fs::create_dir_all(dir.path().join("sys")).unwrap();

        let resolver = ProcScanResolver::new(dir.path());
        assert_eq!(resolver.resolve("alpha").unwrap(), vec![101, 207]);
        assert_eq!(resolver.resolve("beta").unwrap(), vec![305]);
        assert!(resolver.resolve("gamma").unwrap().is_empty());
    }

    #[test]
    fn test_proc_scan_resolver_with_pick() {
        let dir = tempdir().expect("Failed to create temp dir");
        write_fake_stat(dir.path(), 11, "dup", 0, 0);
        write_fake_stat(dir.path(), 99, "dup", 0, 0);

        let resolver = ProcScanResolver::new(dir.path());
        assert_eq!(pick_pid(&resolver, "dup").unwrap(), 99);
    }
}
