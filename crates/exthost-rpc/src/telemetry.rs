//! Telemetry sinks (opt-in, privacy-safe).
//! - TelemetryService: event + JSON properties
//! - NullTelemetry: drops everything
//! - JsonlTelemetry: buffered append-only JSONL file
//! - MemoryTelemetry: keeps events in memory for embedders and tests

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::warn;

pub trait TelemetryService: Send + Sync {
    fn public_log(&self, event: &str, data: Value);

    fn flush(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

impl TelemetryService for NullTelemetry {
    fn public_log(&self, _event: &str, _data: Value) {}
}

/// Writes one JSON record per event, `flush_every` events at a time.
pub struct JsonlTelemetry {
    sink: Mutex<TelemetrySink>,
}

impl JsonlTelemetry {
    #[must_use]
    pub fn new(path: PathBuf, flush_every: usize) -> Self {
        Self {
            sink: Mutex::new(TelemetrySink {
                path,
                pending: Vec::new(),
                flush_every: flush_every.max(1),
            }),
        }
    }
}

impl TelemetryService for JsonlTelemetry {
    fn public_log(&self, event: &str, data: Value) {
        let mut sink = self.sink.lock();
        sink.record(event, data);
        if sink.pending.len() >= sink.flush_every {
            sink.flush();
        }
    }

    fn flush(&self) {
        self.sink.lock().flush();
    }
}

impl Drop for JsonlTelemetry {
    fn drop(&mut self) {
        self.sink.get_mut().flush();
    }
}

struct TelemetrySink {
    path: PathBuf,
    pending: Vec<Value>,
    flush_every: usize,
}

impl TelemetrySink {
    fn record(&mut self, event: &str, data: Value) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        self.pending.push(json!({
            "timestamp": timestamp,
            "event": event,
            "data": data,
        }));
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let records = std::mem::take(&mut self.pending);
        if let Some(parent) = self.path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(
                    "Failed to create telemetry directory {}: {err}",
                    parent.display()
                );
                return;
            }
        }

        let mut file = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(err) => {
                warn!(
                    "Failed to open telemetry file {}: {err}",
                    self.path.display()
                );
                return;
            }
        };
        for record in records {
            if let Err(err) = writeln!(file, "{record}") {
                warn!("Failed to write telemetry record: {err}");
                return;
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<(String, Value)>>,
}

impl MemoryTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().clone()
    }

    /// Events with the given name, in emission order.
    #[must_use]
    pub fn named(&self, event: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, data)| data.clone())
            .collect()
    }
}

impl TelemetryService for MemoryTelemetry {
    fn public_log(&self, event: &str, data: Value) {
        self.events.lock().push((event.to_string(), data));
    }
}
