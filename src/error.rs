//! Error taxonomy.
//!
//! Field-level decoding problems are [`ParseError`]; everything the
//! engine surfaces to callers is [`Error`], with read and parse variants
//! carrying the path of the offending accounting file so a fatal stop
//! names its cause.

use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error as ThisError;

/// A malformed accounting record.
#[derive(Debug, ThisError)]
pub enum ParseError {
    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid integer in field {field}: {source}")]
    InvalidInt {
        field: &'static str,
        source: ParseIntError,
    },

    /// The stat record had no parenthesised process name.
    #[error("process name not found")]
    MissingName,

    #[error("record is not valid UTF-8")]
    NotUtf8,
}

/// Any failure surfaced by the engine or its collaborators.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("could not read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed record in {}: {source}", path.display())]
    Parse { path: PathBuf, source: ParseError },

    /// A process name did not resolve to any PID.
    #[error("no process found with name {0}")]
    Resolution(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("pid {0} is already watched")]
    AlreadyWatched(u32),

    /// The target of a pause, resume or unwatch is not registered.
    #[error("{0} is not watched")]
    NotWatched(String),

    /// The system-wide tick total decreased between two snapshots, which
    /// normal operation never produces.
    #[error("system cpu counter went backwards: {prev} -> {curr}")]
    CounterRegression { prev: u64, curr: u64 },

    #[error("could not write to output sink: {0}")]
    Sink(io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_read_error_names_path() {
        let err = Error::Read {
            path: Path::new("/proc/101/stat").to_path_buf(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("/proc/101/stat"));
    }

    #[test]
    fn test_parse_error_carries_field_and_path() {
        let source = "abc".parse::<u64>().unwrap_err();
        let err = Error::Parse {
            path: Path::new("/proc/101/io").to_path_buf(),
            source: ParseError::InvalidInt {
                field: "rchar",
                source,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("/proc/101/io"));
        assert!(msg.contains("rchar"));
    }
}
