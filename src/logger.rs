use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const BUFFER_CAPACITY: usize = 1000;

/// Log level enum for type-safe logging
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug = 0,
    #[default]
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Log entry with optional structured context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, serde_json::Value>>,
}

/// Fixed-size ring of the most recent entries
struct CircularBuffer {
    buffer: Vec<LogEntry>,
    head: usize,
    capacity: usize,
}

impl CircularBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    fn push(&mut self, item: LogEntry) {
        if self.buffer.len() < self.capacity {
            self.buffer.push(item);
        } else {
            self.buffer[self.head] = item;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    fn to_vec(&self) -> Vec<LogEntry> {
        // Oldest first
        let mut result = Vec::with_capacity(self.buffer.len());
        result.extend_from_slice(&self.buffer[self.head..]);
        result.extend_from_slice(&self.buffer[..self.head]);
        result
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.head = 0;
    }
}

/// Commands for the logger thread
enum LogCommand {
    Log(LogEntry),
    GetLogs(Sender<Vec<LogEntry>>),
    Clear,
}

/// In-process log recorder.
///
/// Entries are handed to a background thread over a bounded channel, so
/// recording never blocks a running pipeline. When the channel is full the
/// entry is dropped.
pub struct Logger {
    sender: Sender<LogCommand>,
    min_level: Arc<AtomicU8>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(BUFFER_CAPACITY);
        let min_level = Arc::new(AtomicU8::new(LogLevel::Debug as u8));

        std::thread::spawn(move || {
            Self::logger_thread(receiver);
        });

        Self { sender, min_level }
    }

    fn logger_thread(receiver: Receiver<LogCommand>) {
        let mut buffer = CircularBuffer::new(BUFFER_CAPACITY);

        for cmd in receiver {
            match cmd {
                LogCommand::Log(entry) => buffer.push(entry),
                LogCommand::GetLogs(response_tx) => {
                    let _ = response_tx.send(buffer.to_vec());
                }
                LogCommand::Clear => buffer.clear(),
            }
        }
    }

    fn enabled(&self, level: LogLevel) -> bool {
        (level as u8) >= self.min_level.load(Ordering::Relaxed)
    }

    /// Record an entry (non-blocking)
    pub fn log(&self, level: LogLevel, message: &str, source: &str) {
        self.record(level, message, source, None);
    }

    /// Record an entry carrying structured fields, such as the step a
    /// pipeline just finished
    pub fn log_with_context(
        &self,
        level: LogLevel,
        message: &str,
        source: &str,
        context: HashMap<String, serde_json::Value>,
    ) {
        self.record(level, message, source, Some(context));
    }

    fn record(
        &self,
        level: LogLevel,
        message: &str,
        source: &str,
        context: Option<HashMap<String, serde_json::Value>>,
    ) {
        if !self.enabled(level) {
            return;
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            source: source.to_string(),
            context,
        };
        // Dropped when the channel is full
        let _ = self.sender.try_send(LogCommand::Log(entry));
    }

    pub fn set_min_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn get_min_level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    pub fn get_logs(&self) -> Vec<LogEntry> {
        let (response_tx, response_rx) = bounded(1);
        if self.sender.send(LogCommand::GetLogs(response_tx)).is_ok() {
            response_rx.recv().unwrap_or_default()
        } else {
            Vec::new()
        }
    }

    pub fn clear_logs(&self) {
        let _ = self.sender.send(LogCommand::Clear);
    }
}

// Global logger instance
lazy_static::lazy_static! {
    pub static ref LOGGER: Logger = Logger::new();
}

/// Install a `tracing` fmt subscriber filtered by `filter` (e.g. `"stageline=debug"`).
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing(filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}

/// Record into [`LOGGER`] and forward the same message to `tracing`
///
/// A `context: map` argument after the source attaches structured fields to
/// the recorded entry.
#[macro_export]
macro_rules! pipeline_log {
    (@trace $level:expr, $source:expr, $message:expr) => {
        match $level {
            $crate::logger::LogLevel::Error => $crate::tracing::error!(source = $source, "{}", $message),
            $crate::logger::LogLevel::Warn => $crate::tracing::warn!(source = $source, "{}", $message),
            $crate::logger::LogLevel::Info => $crate::tracing::info!(source = $source, "{}", $message),
            $crate::logger::LogLevel::Debug => $crate::tracing::debug!(source = $source, "{}", $message),
        }
    };
    ($level:expr, $source:expr, context: $context:expr, $($arg:tt)*) => {
        {
            let level: $crate::logger::LogLevel = $level;
            let message = format!($($arg)*);
            $crate::logger::LOGGER.log_with_context(level, &message, $source, $context);
            $crate::pipeline_log!(@trace level, $source, message);
        }
    };
    ($level:expr, $source:expr, $($arg:tt)*) => {
        {
            let level: $crate::logger::LogLevel = $level;
            let message = format!($($arg)*);
            $crate::logger::LOGGER.log(level, &message, $source);
            $crate::pipeline_log!(@trace level, $source, message);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.to_string(),
            source: "test".to_string(),
            context: None,
        }
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" debug "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("verbose"), None);
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert!(LogLevel::Error > LogLevel::Info);
    }

    #[test]
    fn test_circular_buffer_wraps_in_order() {
        let mut buffer = CircularBuffer::new(3);
        for i in 0..5 {
            buffer.push(entry(&format!("m{}", i)));
        }
        let messages: Vec<_> = buffer.to_vec().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["m2", "m3", "m4"]);

        buffer.clear();
        assert!(buffer.to_vec().is_empty());
    }

    #[test]
    fn test_logger_records_and_filters() {
        let logger = Logger::new();
        logger.set_min_level(LogLevel::Warn);
        assert_eq!(logger.get_min_level(), LogLevel::Warn);

        logger.log(LogLevel::Info, "dropped", "test");
        logger.log(LogLevel::Error, "kept", "test");

        let logs = logger.get_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message, "kept");
        assert_eq!(logs[0].source, "test");
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing("stageline=debug");
        init_tracing("stageline=warn");

        crate::pipeline_log!(LogLevel::Info, "test", "tracing installed: {}", true);
        let mut fields = HashMap::new();
        fields.insert("step".to_string(), serde_json::json!("reduce#1"));
        crate::pipeline_log!(LogLevel::Debug, "test", context: fields, "with {}", "fields");

        let logs = LOGGER.get_logs();
        assert!(logs.iter().any(|e| e.message == "tracing installed: true"));
        assert!(logs.iter().any(|e| {
            e.message == "with fields"
                && e.context.as_ref().and_then(|c| c.get("step"))
                    == Some(&serde_json::json!("reduce#1"))
        }));
    }

    #[test]
    fn test_logger_context_and_clear() {
        let logger = Logger::new();
        let mut context = HashMap::new();
        context.insert("step".to_string(), serde_json::json!("filter"));
        logger.log_with_context(LogLevel::Info, "with context", "test", context);

        let logs = logger.get_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(
            logs[0].context.as_ref().and_then(|c| c.get("step")),
            Some(&serde_json::json!("filter"))
        );

        logger.clear_logs();
        assert!(logger.get_logs().is_empty());
    }
}
