//! Lightweight per-process resource usage sampling for Linux.
//!
//! At a fixed interval the engine re-reads a small set of `/proc`
//! accounting files for every watched process plus the system-wide CPU
//! totals, converts cumulative counters into utilization percentages and
//! per-second rates by differencing successive snapshots, and emits one
//! CSV record per process per tick.
//!
//! # Usage
//!
//! ```no_run
//! use procusage::{Engine, EngineConfig, EngineEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::new(EngineConfig::default());
//!     engine.set_sink(Box::new(std::io::stdout()));
//!     let mut events = engine.subscribe();
//!
//!     engine.watch("nginx")?; // first watch starts the loop
//!
//!     while let Ok(event) = events.recv().await {
//!         if let EngineEvent::Entry { entry, .. } = event {
//!             println!("{} is at {:.1}% cpu", entry.name, entry.cpu_pct);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod diff;
pub mod emit;
pub mod engine;
pub mod error;
pub mod parse;
pub mod reader;
pub mod registry;
pub mod resolver;
pub mod rolling;
pub mod snapshot;

// Re-export main types for convenience
pub use config::EngineConfig;
pub use emit::{serialize_entry, EngineEvent, CSV_HEADER};
pub use engine::Engine;
pub use error::{Error, ParseError};
pub use registry::WatchTarget;
pub use resolver::{PidResolver, ProcScanResolver};
pub use rolling::ROLLING_LOG_CAPACITY;
pub use snapshot::{ComputedEntry, ProcessSnapshot, SystemSnapshot, TickSnapshot};
