//! CLI arguments for the procusage binary.

use clap::{Parser, ValueEnum};
use procusage::WatchTarget;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "procusage",
    about = "Sample per-process CPU, memory and I/O usage from /proc and log it as CSV",
    long_about = "Sample per-process CPU, memory and I/O usage from /proc and log it as CSV.\n\n\
                  Watches one or more processes (by PID or name) and writes one record per \
                  process per polling interval: instantaneous and smoothed CPU utilization, \
                  resident/virtual memory, and per-second read/write byte and syscall rates.",
    version = "0.1.0",
    propagate_version = true
)]
pub struct Args {
    /// PIDs or process names to watch
    pub targets: Vec<String>,

    /// Polling interval (ms) for gathering stats
    #[arg(short = 'i', long, default_value_t = 500)]
    pub interval: u64,

    /// File to write records to ("-" = stdout)
    #[arg(short = 'o', long, default_value = "-")]
    pub outfile: String,

    /// Execute a command and monitor its system usage until it exits
    #[arg(short = 'e', long)]
    pub execute: Option<String>,

    /// Drop a failing process and keep monitoring the rest, instead of
    /// stopping on the first failure
    #[arg(long)]
    pub isolate: bool,

    /// Log level (logs go to stderr; records go to the outfile)
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,
}

/// Interprets a positional target: all-digits means a PID, anything else
/// a process name.
pub fn parse_target(raw: &str) -> WatchTarget {
    match raw.parse::<u32>() {
        Ok(pid) => WatchTarget::Pid(pid),
        Err(_) => WatchTarget::Name(raw.to_string()),
    }
}
