// SPDX-License-Identifier: Apache-2.0 OR MIT
// Output sinks for log entries

use std::io::Write;
use std::sync::{Arc, Mutex};

use super::entry::LogEntry;

/// Output sink for log entries
///
/// All control-plane work happens on one event loop, so sinks write
/// synchronously; the only requirement is that they can be shared between
/// cloned `Logger` handles.
pub trait LogSink: Send + Sync {
    fn write_entry(&self, entry: &LogEntry);
}

/// One JSON object per line on stderr
pub struct StderrJsonSink;

impl LogSink for StderrJsonSink {
    fn write_entry(&self, entry: &LogEntry) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", entry.to_json_line());
    }
}

/// Plain text on stdout
pub struct StdoutSink;

impl LogSink for StdoutSink {
    fn write_entry(&self, entry: &LogEntry) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", entry.to_text_line());
    }
}

/// Captures entries in memory. Used by tests to assert on logged decisions.
#[derive(Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// True if any captured message contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|e| e.message.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut e) = self.entries.lock() {
            e.clear();
        }
    }
}

impl LogSink for MemorySink {
    fn write_entry(&self, entry: &LogEntry) {
        if let Ok(mut e) = self.entries.lock() {
            e.push(entry.clone());
        }
    }
}

/// Discards everything
pub struct NullSink;

impl LogSink for NullSink {
    fn write_entry(&self, _entry: &LogEntry) {}
}
