//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default polling interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Configuration for a sampling engine instance.
///
/// The output sink is configured separately via [`crate::Engine::set_sink`]
/// since writers are not serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between the end of one tick and the start of the next. The
    /// actual inter-tick spacing is interval + processing time, not a
    /// fixed-rate clock.
    pub poll_interval_ms: u64,

    /// Root of the process-information pseudo-filesystem. Overridable for
    /// tests that run against a synthetic tree.
    pub proc_root: PathBuf,

    /// When true, a read or parse failure confined to one watched process
    /// drops that process and the tick continues for the rest. When false
    /// (the default, matching fail-fast semantics) any such failure stops
    /// the whole engine.
    pub isolate_failures: bool,

    /// Core count used to scale utilization percentages. `None` captures
    /// the online core count at engine construction; containers with CPU
    /// quotas may want to pin this.
    pub num_cores: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            proc_root: PathBuf::from("/proc"),
            isolate_failures: false,
            num_cores: None,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
