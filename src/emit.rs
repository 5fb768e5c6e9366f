//! Record serialization and publication.
//!
//! Each computed entry becomes one newline-terminated CSV line with a
//! fixed field order. Entries are published on a broadcast channel (with
//! both the structured entry and the formatted line) and, when a sink is
//! configured, all of a tick's lines go out as a single batched write.

use std::io::{self, Write};
use tokio::sync::broadcast;

use crate::snapshot::ComputedEntry;

/// CSV header, written to the sink once when the engine starts.
///
/// Process names are not quoted; a name containing a comma breaks the
/// column alignment (known limitation).
pub const CSV_HEADER: &str = "Time,PID,ProcessName,CPU,AvgCPU,UserCPU,SysCPU,VmRSS,VmSize,rcharPerSecond,wcharPerSecond,syscrPerSecond,syscwPerSecond";

/// Events published by a running engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// One computed entry, with its serialized CSV line.
    Entry {
        entry: ComputedEntry,
        line: String,
    },
    /// Terminal event: the loop has ended, either by request (`error` is
    /// `None`) or because of a fatal tick failure.
    Stopped { error: Option<String> },
}

/// Formats one entry as a newline-terminated CSV line.
pub fn serialize_entry(e: &ComputedEntry) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
        e.time,
        e.pid,
        e.name,
        e.cpu_pct,
        e.avg_cpu_pct,
        e.user_cpu_pct,
        e.sys_cpu_pct,
        e.vm_rss_kb,
        e.vm_size_kb,
        e.read_bytes_per_sec,
        e.write_bytes_per_sec,
        e.read_syscalls_per_sec,
        e.write_syscalls_per_sec,
    )
}

/// Publishes computed entries to subscribers and an optional sink.
pub struct Emitter {
    events: broadcast::Sender<EngineEvent>,
    sink: Option<Box<dyn Write + Send>>,
}

impl Emitter {
    pub fn new(events: broadcast::Sender<EngineEvent>) -> Self {
        Self { events, sink: None }
    }

    pub fn set_sink(&mut self, sink: Box<dyn Write + Send>) {
        self.sink = Some(sink);
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Writes the CSV header line, if a sink is configured.
    pub fn write_header(&mut self) -> io::Result<()> {
        if let Some(sink) = &mut self.sink {
            sink.write_all(CSV_HEADER.as_bytes())?;
            sink.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Publishes one tick's entries: an event per entry, then a single
    /// batched write of every formatted line.
    pub fn emit_batch(&mut self, entries: &[ComputedEntry]) -> io::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut batch = String::new();
        for entry in entries {
            let line = serialize_entry(entry);
            batch.push_str(&line);
            // Send failures just mean there are no subscribers.
            let _ = self.events.send(EngineEvent::Entry {
                entry: entry.clone(),
                line,
            });
        }

        if let Some(sink) = &mut self.sink {
            sink.write_all(batch.as_bytes())?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(sink) = &mut self.sink {
            sink.flush()?;
        }
        Ok(())
    }

    /// Publishes the terminal event.
    pub fn notify_stopped(&self, error: Option<String>) {
        let _ = self.events.send(EngineEvent::Stopped { error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn entry() -> ComputedEntry {
        ComputedEntry {
            time: 1.5,
            pid: 42,
            name: "nginx".into(),
            cpu_pct: 60.0,
            avg_cpu_pct: 40.0,
            user_cpu_pct: 40.0,
            sys_cpu_pct: 20.0,
            vm_rss_kb: 1234,
            vm_size_kb: 9500,
            read_bytes_per_sec: 500.0,
            write_bytes_per_sec: 0.0,
            read_syscalls_per_sec: 2.5,
            write_syscalls_per_sec: 0.0,
        }
    }

    #[test]
    fn test_header_field_order() {
        let fields: Vec<&str> = CSV_HEADER.split(',').collect();
        assert_eq!(fields.len(), 13);
        assert_eq!(fields[0], "Time");
        assert_eq!(fields[2], "ProcessName");
        assert_eq!(fields[12], "syscwPerSecond");
    }

    #[test]
    fn test_serialize_entry_exact() {
        assert_eq!(
            serialize_entry(&entry()),
            "1.5,42,nginx,60,40,40,20,1234,9500,500,0,2.5,0\n"
        );
    }

    #[test]
    fn test_emit_batch_single_write_and_events() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut emitter = Emitter::new(tx);
        let buf = SharedBuf::default();
        emitter.set_sink(Box::new(buf.clone()));

        emitter.write_header().unwrap();
        let entries = vec![entry(), entry()];
        emitter.emit_batch(&entries).unwrap();

        let text = buf.contents();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], lines[2]);

        // One event per entry, each carrying the formatted line.
        for _ in 0..2 {
            match rx.try_recv().unwrap() {
                EngineEvent::Entry { entry: e, line } => {
                    assert_eq!(e.pid, 42);
                    assert_eq!(line, serialize_entry(&e));
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_batch_without_sink_still_broadcasts() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut emitter = Emitter::new(tx);
        emitter.emit_batch(&[entry()]).unwrap();
        assert!(matches!(rx.try_recv(), Ok(EngineEvent::Entry { .. })));
    }

    #[test]
    fn test_empty_batch_writes_nothing() {
        let (tx, _rx) = broadcast::channel(16);
        let mut emitter = Emitter::new(tx);
        let buf = SharedBuf::default();
        emitter.set_sink(Box::new(buf.clone()));

        emitter.emit_batch(&[]).unwrap();
        assert!(buf.contents().is_empty());
    }
}
