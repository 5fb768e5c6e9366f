//! Accounting file access.
//!
//! Handles are opened once, at watch time, and re-read from offset 0 on
//! every tick: the kernel regenerates the record on each read, so the
//! files behave as live state, not streams. One tick's reads are fanned
//! out across the whole batch in parallel and joined before parsing.

use rayon::prelude::*;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Bytes read per handle per tick. The tracked fields of every record
/// sit within the first kilobyte.
pub const READ_LEN: usize = 1024;

/// The three per-process accounting handles, opened at watch time and
/// held for the lifetime of the watch.
#[derive(Debug)]
pub struct ProcHandles {
    pub stat: File,
    pub status: File,
    pub io: File,
}

/// Identifies which accounting source a raw buffer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// System-wide CPU totals.
    System,
    /// Per-process primary stat record.
    Stat(u32),
    /// Per-process extended status record.
    Status(u32),
    /// Per-process I/O counters.
    Io(u32),
}

impl Slot {
    /// Path of the underlying file, for error reporting.
    pub fn path(&self, proc_root: &Path) -> PathBuf {
        match self {
            Slot::System => proc_root.join("stat"),
            Slot::Stat(pid) => proc_root.join(pid.to_string()).join("stat"),
            Slot::Status(pid) => proc_root.join(pid.to_string()).join("status"),
            Slot::Io(pid) => proc_root.join(pid.to_string()).join("io"),
        }
    }

    /// The PID this slot belongs to, if it is a per-process slot.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Slot::System => None,
            Slot::Stat(pid) | Slot::Status(pid) | Slot::Io(pid) => Some(*pid),
        }
    }
}

fn open(path: PathBuf) -> Result<File, Error> {
    File::open(&path).map_err(|source| Error::Read { path, source })
}

/// Opens the system-wide stat handle.
pub fn open_system(proc_root: &Path) -> Result<File, Error> {
    open(Slot::System.path(proc_root))
}

/// Opens the three accounting handles for one process.
pub fn open_process(proc_root: &Path, pid: u32) -> Result<ProcHandles, Error> {
    Ok(ProcHandles {
        stat: open(Slot::Stat(pid).path(proc_root))?,
        status: open(Slot::Status(pid).path(proc_root))?,
        io: open(Slot::Io(pid).path(proc_root))?,
    })
}

/// Reads the first [`READ_LEN`] bytes of a handle from offset 0.
pub fn read_slot(file: &File) -> io::Result<Vec<u8>> {
    let mut buf = [0u8; READ_LEN];
    let n = file.read_at(&mut buf, 0)?;
    Ok(buf[..n].to_vec())
}

/// Performs one fully parallel read of every handle in the batch.
///
/// Results come back in job order, each tagged with its slot; failures
/// stay per-handle so the caller can apply its isolation policy.
pub fn read_batch(jobs: Vec<(Slot, &File)>) -> Vec<(Slot, io::Result<Vec<u8>>)> {
    jobs.into_par_iter()
        .map(|(slot, file)| (slot, read_slot(file)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_read_slot_rereads_from_offset_zero() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("stat");
        std::fs::write(&path, "first").unwrap();

        let file = File::open(&path).unwrap();
        assert_eq!(read_slot(&file).unwrap(), b"first");

        // Rewrite the backing file; a second read must observe the new
        // content from offset 0, not continue past the old one.
        let mut f = File::create(&path).unwrap();
        f.write_all(b"second").unwrap();
        assert_eq!(read_slot(&file).unwrap(), b"second");
    }

    #[test]
    fn test_read_slot_truncates_to_buffer() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("big");
        std::fs::write(&path, vec![b'x'; READ_LEN * 2]).unwrap();

        let file = File::open(&path).unwrap();
        assert_eq!(read_slot(&file).unwrap().len(), READ_LEN);
    }

    #[test]
    fn test_open_process_missing_names_path() {
        let dir = tempdir().expect("Failed to create temp dir");
        let err = open_process(dir.path(), 4242).unwrap_err();
        match err {
            Error::Read { path, .. } => {
                assert!(path.ends_with("4242/stat"), "unexpected path {:?}", path);
            }
            other => panic!("expected read error, got {:?}", other),
        }
    }

    #[test]
    fn test_read_batch_preserves_order() {
        let dir = tempdir().expect("Failed to create temp dir");
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, "aaa").unwrap();
        std::fs::write(&b, "bbb").unwrap();

        let fa = File::open(&a).unwrap();
        let fb = File::open(&b).unwrap();
        let results = read_batch(vec![(Slot::Stat(1), &fa), (Slot::Io(2), &fb)]);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, Slot::Stat(1));
        assert_eq!(results[0].1.as_ref().unwrap(), b"aaa");
        assert_eq!(results[1].0, Slot::Io(2));
        assert_eq!(results[1].1.as_ref().unwrap(), b"bbb");
    }

    #[test]
    fn test_slot_paths() {
        let root = Path::new("/proc");
        assert_eq!(Slot::System.path(root), PathBuf::from("/proc/stat"));
        assert_eq!(Slot::Status(77).path(root), PathBuf::from("/proc/77/status"));
        assert_eq!(Slot::System.pid(), None);
        assert_eq!(Slot::Io(9).pid(), Some(9));
    }
}
