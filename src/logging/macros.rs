// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros
//
// Every macro takes a logger, a facility and either a plain message or a
// format string with arguments:
//
//     log_info!(logger, Facility::Oil, "entry created");
//     log_debug!(logger, Facility::Rpf, "no route to {}", addr);

#[macro_export]
macro_rules! log_emergency {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.emergency($facility, &format!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.error($facility, &format!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.warning($facility, &format!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_notice {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.notice($facility, &format!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.info($facility, &format!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $facility:expr, $($arg:tt)+) => {
        $logger.debug($facility, &format!($($arg)+))
    };
}

/// Log a message with key-value pairs
///
/// ```ignore
/// log_kv!(logger, Severity::Info, Facility::Oil, "oif added",
///         "sg" => &sg.to_string(), "vif" => &vif.to_string());
/// ```
#[macro_export]
macro_rules! log_kv {
    ($logger:expr, $severity:expr, $facility:expr, $msg:expr, $($key:expr => $value:expr),+) => {{
        let kvs: &[(&str, &str)] = &[$(($key, $value)),+];
        $logger.log_kv($severity, $facility, $msg, kvs)
    }};
}

#[cfg(test)]
mod tests {
    use crate::logging::{Facility, Logger, Severity};

    #[test]
    fn test_log_macros_format_arguments() {
        let (logger, sink) = Logger::memory();
        let vif = 3;

        log_error!(logger, Facility::Test, "plain");
        log_warning!(logger, Facility::Test, "vif {} looped", vif);
        log_debug!(logger, Facility::Test, "{}-{}", "a", "b");

        let messages: Vec<String> = sink.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["plain", "vif 3 looped", "a-b"]);
    }

    #[test]
    fn test_log_kv_macro() {
        let (logger, sink) = Logger::memory();
        log_kv!(
            logger,
            Severity::Info,
            Facility::Test,
            "with context",
            "iface" => "eth0",
            "vif" => "1"
        );
        assert_eq!(sink.entries()[0].get_kv("iface"), Some("eth0"));
    }
}
