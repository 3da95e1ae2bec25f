// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log entry structure

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Facility, Severity};

/// A single structured log record.
///
/// Key-value pairs carry the flow/interface context of control-plane
/// decisions (`sg`, `vif`, `iface`) so they can be filtered in JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub facility: Facility,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kvs: Vec<(String, String)>,
}

impl LogEntry {
    pub fn new(severity: Severity, facility: Facility, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            facility,
            message: message.to_string(),
            kvs: Vec::new(),
        }
    }

    pub fn add_kv(&mut self, key: &str, value: &str) {
        self.kvs.push((key.to_string(), value.to_string()));
    }

    pub fn get_kv(&self, key: &str) -> Option<&str> {
        self.kvs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Render as a single JSON line
    pub fn to_json_line(&self) -> String {
        let mut obj = serde_json::json!({
            "timestamp": self.timestamp.to_rfc3339(),
            "level": self.severity.as_str(),
            "facility": self.facility.as_str(),
            "message": self.message,
        });
        if let Some(map) = obj.as_object_mut() {
            for (k, v) in &self.kvs {
                map.insert(k.clone(), serde_json::Value::String(v.clone()));
            }
        }
        obj.to_string()
    }

    /// Render as `[LEVEL] [Facility] message k=v ...`
    pub fn to_text_line(&self) -> String {
        let mut line = format!(
            "[{}] [{}] {}",
            self.severity.as_str(),
            self.facility.as_str(),
            self.message
        );
        for (k, v) in &self.kvs {
            line.push_str(&format!(" {}={}", k, v));
        }
        line
    }
}
