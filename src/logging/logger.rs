// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger handle with global and per-facility filtering

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use super::entry::LogEntry;
use super::sink::{LogSink, MemorySink, NullSink, StderrJsonSink, StdoutSink};
use super::{Facility, Severity};

/// Logger handle for writing log entries
///
/// This is a lightweight handle that can be cloned and passed around.
/// Clones share the sink and the level configuration, so changing the
/// level through one handle affects all of them.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    /// Global minimum log level (default: Info)
    global_min_level: Arc<AtomicU8>,
    /// Per-facility minimum log levels
    facility_min_levels: Arc<RwLock<HashMap<Facility, Severity>>>,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            global_min_level: Arc::new(AtomicU8::new(Severity::Info as u8)),
            facility_min_levels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Logger that writes JSON lines to stderr
    pub fn stderr_json() -> Self {
        Self::new(Arc::new(StderrJsonSink))
    }

    /// Logger that writes human-readable lines to stdout
    pub fn stdout() -> Self {
        Self::new(Arc::new(StdoutSink))
    }

    /// Logger capturing every entry (Debug and above) in memory
    pub fn memory() -> (Self, MemorySink) {
        let sink = MemorySink::new();
        let logger = Self::new(Arc::new(sink.clone()));
        logger.set_global_level(Severity::Debug);
        (logger, sink)
    }

    /// Logger that discards everything
    pub fn null() -> Self {
        Self::new(Arc::new(NullSink))
    }

    /// Check if a log message should be written based on severity filtering
    #[inline]
    fn should_log(&self, severity: Severity, facility: Facility) -> bool {
        // A facility-specific level overrides the global one
        if let Ok(levels) = self.facility_min_levels.read() {
            if let Some(&min_level) = levels.get(&facility) {
                return severity <= min_level;
            }
        }
        (severity as u8) <= self.global_min_level.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        if !self.should_log(severity, facility) {
            return;
        }
        self.sink
            .write_entry(&LogEntry::new(severity, facility, message));
    }

    /// Write a log entry with key-value context
    pub fn log_kv(
        &self,
        severity: Severity,
        facility: Facility,
        message: &str,
        kvs: &[(&str, &str)],
    ) {
        if !self.should_log(severity, facility) {
            return;
        }
        let mut entry = LogEntry::new(severity, facility, message);
        for (key, value) in kvs {
            entry.add_kv(key, value);
        }
        self.sink.write_entry(&entry);
    }

    #[inline]
    pub fn emergency(&self, facility: Facility, message: &str) {
        self.log(Severity::Emergency, facility, message);
    }

    #[inline]
    pub fn alert(&self, facility: Facility, message: &str) {
        self.log(Severity::Alert, facility, message);
    }

    #[inline]
    pub fn critical(&self, facility: Facility, message: &str) {
        self.log(Severity::Critical, facility, message);
    }

    #[inline]
    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    #[inline]
    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    #[inline]
    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    #[inline]
    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    #[inline]
    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }

    pub fn set_global_level(&self, level: Severity) {
        self.global_min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn global_level(&self) -> Severity {
        Severity::from_u8(self.global_min_level.load(Ordering::Relaxed)).unwrap_or(Severity::Info)
    }

    pub fn set_facility_level(&self, facility: Facility, level: Severity) {
        if let Ok(mut levels) = self.facility_min_levels.write() {
            levels.insert(facility, level);
        }
    }

    /// Clear the facility-specific log level (fall back to global)
    pub fn clear_facility_level(&self, facility: Facility) {
        if let Ok(mut levels) = self.facility_min_levels.write() {
            levels.remove(&facility);
        }
    }

    /// Effective level for a facility
    pub fn facility_level(&self, facility: Facility) -> Severity {
        self.facility_min_levels
            .read()
            .ok()
            .and_then(|levels| levels.get(&facility).copied())
            .unwrap_or_else(|| self.global_level())
    }
}
