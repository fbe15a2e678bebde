//! Producer-level error and log relay.
//!
//! Errors and log lines the engine raises outside of any single message are
//! forwarded verbatim to an [`EventHandler`]. Nothing is buffered or retried.
//! [`TracingRelay`] is the default handler and re-emits everything through
//! `tracing`, so engine output shares the application's subscriber.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::error::KafkaCode;

/// Syslog severity used by the engine for its log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl LogLevel {
    /// Map a raw syslog level, clamping out-of-range values.
    pub fn from_syslog(level: i32) -> Self {
        match level {
            i32::MIN..=0 => LogLevel::Emergency,
            1 => LogLevel::Alert,
            2 => LogLevel::Critical,
            3 => LogLevel::Error,
            4 => LogLevel::Warning,
            5 => LogLevel::Notice,
            6 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    #[inline]
    pub const fn as_syslog(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Emergency => "EMERG",
            LogLevel::Alert => "ALERT",
            LogLevel::Critical => "CRIT",
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNING",
            LogLevel::Notice => "NOTICE",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        };
        f.write_str(name)
    }
}

/// Receives producer-level errors and log lines.
///
/// Called from the engine's own threads; implementations must not block.
pub trait EventHandler: Send + Sync {
    fn on_error(&self, code: KafkaCode, reason: &str);

    fn on_log(&self, level: LogLevel, facility: &str, message: &str);
}

/// Forwards engine events into `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRelay;

impl EventHandler for TracingRelay {
    fn on_error(&self, code: KafkaCode, reason: &str) {
        error!(code = code.raw(), error = %code, reason, "Producer error");
    }

    fn on_log(&self, level: LogLevel, facility: &str, message: &str) {
        match level {
            LogLevel::Emergency | LogLevel::Alert | LogLevel::Critical | LogLevel::Error => {
                error!(target: "kafkaesque_bridge::engine", facility, "{}", message)
            }
            LogLevel::Warning => {
                warn!(target: "kafkaesque_bridge::engine", facility, "{}", message)
            }
            LogLevel::Notice | LogLevel::Info => {
                info!(target: "kafkaesque_bridge::engine", facility, "{}", message)
            }
            LogLevel::Debug => {
                debug!(target: "kafkaesque_bridge::engine", facility, "{}", message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        errors: Mutex<Vec<(KafkaCode, String)>>,
        logs: Mutex<Vec<(LogLevel, String, String)>>,
    }

    impl EventHandler for Recorder {
        fn on_error(&self, code: KafkaCode, reason: &str) {
            self.errors.lock().unwrap().push((code, reason.to_string()));
        }

        fn on_log(&self, level: LogLevel, facility: &str, message: &str) {
            self.logs
                .lock()
                .unwrap()
                .push((level, facility.to_string(), message.to_string()));
        }
    }

    #[test]
    fn test_syslog_mapping_clamps() {
        assert_eq!(LogLevel::from_syslog(-5), LogLevel::Emergency);
        assert_eq!(LogLevel::from_syslog(3), LogLevel::Error);
        assert_eq!(LogLevel::from_syslog(7), LogLevel::Debug);
        assert_eq!(LogLevel::from_syslog(42), LogLevel::Debug);
        assert_eq!(LogLevel::Warning.as_syslog(), 4);
        assert!(LogLevel::Critical < LogLevel::Info);
    }

    #[test]
    fn test_handler_receives_events_verbatim() {
        let recorder = Recorder::default();
        let handler: &dyn EventHandler = &recorder;
        handler.on_error(KafkaCode::AllBrokersDown, "3/3 brokers are down");
        handler.on_log(LogLevel::Notice, "BROKER", "connected");

        let errors = recorder.errors.lock().unwrap();
        assert_eq!(
            errors[0],
            (KafkaCode::AllBrokersDown, "3/3 brokers are down".to_string())
        );
        let logs = recorder.logs.lock().unwrap();
        assert_eq!(
            logs[0],
            (LogLevel::Notice, "BROKER".to_string(), "connected".to_string())
        );
    }

    #[test]
    fn test_tracing_relay_does_not_panic_without_subscriber() {
        TracingRelay.on_error(KafkaCode::Transport, "connection reset");
        for level in 0..8 {
            TracingRelay.on_log(LogLevel::from_syslog(level), "TEST", "line");
        }
    }
}
