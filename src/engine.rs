//! The sampling engine: watch lifecycle and the fixed-interval tick loop.
//!
//! One tick is read -> parse -> diff -> emit, run as one synchronous
//! pipeline under the engine's state lock; the next tick is armed only
//! after the current one completes, so ticks never overlap and registry
//! mutations are serialized with tick execution. `stop()` is cooperative:
//! the flag is observed at the next tick boundary, at which point every
//! open handle is released exactly once.
//!
//! Engines are explicit instances; several can coexist in one process.

use ahash::AHashMap as HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::diff::{diff_ticks, NUM_CORES};
use crate::emit::{Emitter, EngineEvent};
use crate::error::Error;
use crate::parse;
use crate::reader::{self, Slot};
use crate::registry::{WatchRegistry, WatchTarget, WatchedProcess};
use crate::resolver::{pick_pid, PidResolver, ProcScanResolver};
use crate::snapshot::{ProcessSnapshot, SystemSnapshot, TickSnapshot};

/// Capacity of the event broadcast channel. Slow subscribers miss
/// entries rather than stalling the loop.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Inner {
    registry: WatchRegistry,
    system: Option<File>,
    prev: Option<TickSnapshot>,
    started_at: Option<Instant>,
    emitter: Emitter,
}

struct Shared {
    config: EngineConfig,
    num_cores: usize,
    resolver: Box<dyn PidResolver>,
    running: AtomicBool,
    /// Bumped on every start. A loop whose captured generation no longer
    /// matches has been superseded by a restart and must exit without
    /// touching shared state.
    generation: AtomicU64,
    events: broadcast::Sender<EngineEvent>,
    inner: Mutex<Inner>,
}

/// A process usage sampling engine.
///
/// Cheap to clone; clones share the same state, so a CLI can hand one
/// clone to a signal handler and keep another for the watch calls.
/// Starting requires a tokio runtime: the tick loop runs as a spawned
/// task.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Creates an engine with the default proc-scanning resolver.
    pub fn new(config: EngineConfig) -> Self {
        let resolver = Box::new(ProcScanResolver::new(config.proc_root.clone()));
        Self::with_resolver(config, resolver)
    }

    /// Creates an engine with a custom name-to-PID resolver.
    pub fn with_resolver(config: EngineConfig, resolver: Box<dyn PidResolver>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let num_cores = config.num_cores.unwrap_or(*NUM_CORES);
        let emitter = Emitter::new(events.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                num_cores,
                resolver,
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                events,
                inner: Mutex::new(Inner {
                    registry: WatchRegistry::new(),
                    system: None,
                    prev: None,
                    started_at: None,
                    emitter,
                }),
            }),
        }
    }

    /// Configures the output sink. Call before `start` so the header
    /// line lands first.
    pub fn set_sink(&self, sink: Box<dyn std::io::Write + Send>) {
        self.lock().emitter.set_sink(sink);
    }

    /// Subscribes to engine events: one `Entry` per computed entry per
    /// tick, and a terminal `Stopped`.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of registered processes, paused included.
    pub fn watched_count(&self) -> usize {
        self.lock().registry.len()
    }

    /// Number of registered processes whose accounting handles are open.
    pub fn open_handle_count(&self) -> usize {
        self.lock().registry.open_handle_count()
    }

    /// Registered processes as `(pid, name, watching)`, sorted by PID.
    pub fn watched(&self) -> Vec<(u32, String, bool)> {
        let inner = self.lock();
        let mut list: Vec<_> = inner
            .registry
            .iter()
            .map(|p| (p.pid, p.name.clone(), p.watching))
            .collect();
        list.sort_by_key(|e| e.0);
        list
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.shared.inner.lock().expect("engine state lock poisoned")
    }

    /// Starts tracking a process by PID or name.
    ///
    /// The name form resolves through the configured resolver, tracking
    /// the last PID when several share the name. Opens the three
    /// accounting handles, resolves the kernel-reported name from the
    /// stat record, and registers the process. If this is the first
    /// watch and the engine is stopped, the scheduler starts.
    pub fn watch(&self, target: impl Into<WatchTarget>) -> Result<(), Error> {
        let pid = match target.into() {
            WatchTarget::Pid(pid) => pid,
            WatchTarget::Name(name) => pick_pid(self.shared.resolver.as_ref(), &name)?,
        };

        let first = {
            let mut inner = self.lock();
            if inner.registry.contains(pid) {
                return Err(Error::AlreadyWatched(pid));
            }

            let proc_root = &self.shared.config.proc_root;
            let handles = reader::open_process(proc_root, pid)?;
            let stat_path = Slot::Stat(pid).path(proc_root);
            let buf = reader::read_slot(&handles.stat).map_err(|source| Error::Read {
                path: stat_path.clone(),
                source,
            })?;
            let record = parse::parse_proc_stat(&buf).map_err(|source| Error::Parse {
                path: stat_path,
                source,
            })?;

            info!(pid, name = %record.name, "watching process");
            inner.registry.insert(WatchedProcess::new(pid, record.name, handles));
            inner.registry.len() == 1
        };

        if first && !self.is_running() {
            self.start()?;
        }
        Ok(())
    }

    /// Pauses reporting for a process without losing its handles or
    /// history.
    pub fn pause(&self, target: impl Into<WatchTarget>) -> Result<(), Error> {
        self.set_watching(target.into(), false)
    }

    /// Resumes reporting for a paused process. Its first tick after
    /// resuming only re-establishes a baseline, so output restarts one
    /// interval later.
    pub fn resume(&self, target: impl Into<WatchTarget>) -> Result<(), Error> {
        self.set_watching(target.into(), true)
    }

    fn set_watching(&self, target: WatchTarget, watching: bool) -> Result<(), Error> {
        let mut inner = self.lock();
        let pid = inner
            .registry
            .resolve(&target)
            .ok_or_else(|| Error::NotWatched(target.to_string()))?;
        inner.registry.set_watching(pid, watching);
        debug!(pid, watching, "watch state changed");
        Ok(())
    }

    /// Removes a process from the registry, closing its handles and
    /// dropping its rolling log.
    pub fn unwatch(&self, target: impl Into<WatchTarget>) -> Result<(), Error> {
        let target = target.into();
        let mut inner = self.lock();
        let pid = inner
            .registry
            .resolve(&target)
            .ok_or_else(|| Error::NotWatched(target.to_string()))?;
        // Handles close when the removed entry drops.
        let removed = inner.registry.remove(pid);
        drop(removed);
        info!(pid, "unwatched process");
        Ok(())
    }

    /// Transitions Stopped -> Running: opens the system-wide handle,
    /// stamps the start time, writes the CSV header, and spawns the tick
    /// loop. The first tick has no previous snapshot, so the first
    /// emitted batch is always empty.
    pub fn start(&self) -> Result<(), Error> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }

        // A previous loop may still be parked in its tick gap. Bumping
        // the generation retires it, and any cleanup it had not gotten
        // to yet (the prior session's terminal event included) happens
        // here instead.
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        shutdown(&self.shared, None);

        let setup = (|| -> Result<(), Error> {
            let mut inner = self.lock();
            inner.system = Some(reader::open_system(&self.shared.config.proc_root)?);
            inner.started_at = Some(Instant::now());
            inner.prev = None;
            inner.emitter.write_header().map_err(Error::Sink)?;
            Ok(())
        })();

        if let Err(e) = setup {
            self.shared.running.store(false, Ordering::SeqCst);
            let mut inner = self.lock();
            inner.system = None;
            inner.started_at = None;
            return Err(e);
        }

        info!(
            interval_ms = self.shared.config.poll_interval_ms,
            num_cores = self.num_cores(),
            "engine started"
        );

        let shared = self.shared.clone();
        tokio::spawn(run_loop(shared, generation));
        Ok(())
    }

    /// Requests a stop. The in-flight or next-scheduled tick observes
    /// the flag; no further ticks occur after that.
    pub fn stop(&self) {
        debug!("stop requested");
        self.shared.running.store(false, Ordering::SeqCst);
    }

    pub fn num_cores(&self) -> usize {
        self.shared.num_cores
    }
}

async fn run_loop(shared: Arc<Shared>, generation: u64) {
    loop {
        // A restart while this loop was parked hands the state to the
        // new loop; exit without cleanup.
        if shared.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        let result = {
            let mut guard = shared.inner.lock().expect("engine state lock poisoned");
            tick(&shared, &mut guard)
        };

        if let Err(e) = result {
            error!(error = %e, "fatal tick failure, stopping engine");
            shared.running.store(false, Ordering::SeqCst);
            shutdown(&shared, Some(e.to_string()));
            return;
        }

        tokio::time::sleep(shared.config.poll_interval()).await;
    }
    shutdown(&shared, None);
}

/// Releases every handle exactly once and publishes the terminal event.
/// Idempotent per session: a session is open while `started_at` is set,
/// and only the first shutdown for it does anything.
fn shutdown(shared: &Arc<Shared>, error: Option<String>) {
    let mut guard = shared.inner.lock().expect("engine state lock poisoned");
    if guard.started_at.is_none() {
        return;
    }
    guard.system = None;
    guard.registry.close_all();
    guard.prev = None;
    guard.started_at = None;
    if let Err(e) = guard.emitter.flush() {
        warn!(error = %e, "failed to flush sink on shutdown");
    }
    guard.emitter.notify_stopped(error);
    info!("engine stopped");
}

/// One tick: batch read, parse, diff against the previous snapshot,
/// emit, reschedule is the caller's job.
fn tick(shared: &Shared, inner: &mut Inner) -> Result<(), Error> {
    let proc_root = &shared.config.proc_root;

    let Some(system) = inner.system.as_ref() else {
        return Ok(());
    };

    // Fan out one read per handle: the system file plus three per
    // active process.
    let mut jobs: Vec<(Slot, &File)> = vec![(Slot::System, system)];
    for p in inner.registry.active() {
        if let Some(h) = &p.handles {
            jobs.push((Slot::Stat(p.pid), &h.stat));
            jobs.push((Slot::Status(p.pid), &h.status));
            jobs.push((Slot::Io(p.pid), &h.io));
        }
    }
    let results = reader::read_batch(jobs);

    // Snapshot time is stamped when the reads complete, independent of
    // the tick interval, to tolerate scheduling jitter.
    let time = inner
        .started_at
        .map(|t| t.elapsed().as_secs_f64())
        .unwrap_or_default();

    let mut total: Option<u64> = None;
    let mut stats: HashMap<u32, parse::StatRecord> = HashMap::new();
    let mut statuses: HashMap<u32, parse::StatusRecord> = HashMap::new();
    let mut ios: HashMap<u32, parse::IoRecord> = HashMap::new();
    let mut failures: Vec<(Option<u32>, Error)> = Vec::new();

    for (slot, result) in results {
        match result {
            Err(source) => failures.push((
                slot.pid(),
                Error::Read {
                    path: slot.path(proc_root),
                    source,
                },
            )),
            Ok(buf) => {
                let parsed = match slot {
                    Slot::System => parse::parse_system_total(&buf).map(|t| {
                        total = Some(t);
                    }),
                    Slot::Stat(pid) => parse::parse_proc_stat(&buf).map(|r| {
                        stats.insert(pid, r);
                    }),
                    Slot::Status(pid) => parse::parse_proc_status(&buf).map(|r| {
                        statuses.insert(pid, r);
                    }),
                    Slot::Io(pid) => parse::parse_proc_io(&buf).map(|r| {
                        ios.insert(pid, r);
                    }),
                };
                if let Err(source) = parsed {
                    failures.push((
                        slot.pid(),
                        Error::Parse {
                            path: slot.path(proc_root),
                            source,
                        },
                    ));
                }
            }
        }
    }

    // Failure policy: a system-file failure is always fatal. Per-process
    // failures (the process exited, or its records went unreadable) are
    // fatal unless isolation is configured, in which case only the one
    // process is dropped.
    for (pid, err) in failures {
        match pid {
            None => return Err(err),
            Some(pid) if shared.config.isolate_failures => {
                warn!(pid, error = %err, "dropping watched process after failure");
                inner.registry.remove(pid);
                stats.remove(&pid);
                statuses.remove(&pid);
                ios.remove(&pid);
            }
            Some(_) => return Err(err),
        }
    }

    let Some(total_cpu_ticks) = total else {
        return Ok(());
    };

    let mut processes = HashMap::with_capacity(stats.len());
    for (pid, stat) in stats {
        let (Some(status), Some(io)) = (statuses.get(&pid), ios.get(&pid)) else {
            continue;
        };
        let Some(watched) = inner.registry.get(pid) else {
            continue;
        };
        processes.insert(
            pid,
            ProcessSnapshot {
                pid,
                // Identity resolved at watch time stays stable even if
                // the kernel-reported comm changes mid-flight.
                name: watched.name.clone(),
                utime_ticks: stat.utime_ticks,
                stime_ticks: stat.stime_ticks,
                num_threads: stat.num_threads,
                vm_size_kb: status.vm_size_kb,
                vm_rss_kb: status.vm_rss_kb,
                rchar_bytes: io.rchar_bytes,
                wchar_bytes: io.wchar_bytes,
                syscr_count: io.syscr_count,
                syscw_count: io.syscw_count,
            },
        );
    }

    let curr = TickSnapshot {
        time,
        system: SystemSnapshot { total_cpu_ticks },
        processes,
    };

    if let Some(prev) = &inner.prev {
        let entries = diff_ticks(prev, &curr, shared.num_cores, inner.registry.logs())?;
        inner.emitter.emit_batch(&entries).map_err(Error::Sink)?;
        for entry in entries {
            inner.registry.record_entry(entry);
        }
    }

    inner.prev = Some(curr);
    Ok(())
}
