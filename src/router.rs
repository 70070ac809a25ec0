//! Event & Log Router
//!
//! Formats `(type, action, data)` records from lifecycle actions and running
//! tasks into `[timestamp] message` lines, appends them to the log sink in the
//! order they are routed, and keeps the condensed one-line status current.

use crate::task::LogEvent;
use chrono::{DateTime, Local};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Display form of one log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedMessage {
    pub date: String,
    pub msg: String,
}

impl FormattedMessage {
    /// `[date] msg`, as appended to the log stream
    pub fn line(&self) -> String {
        format!("[{}] {}", self.date, self.msg)
    }
}

/// Condensed "last status" derived from the most recent record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusProjection {
    pub last_log_line: String,
    pub timestamp: DateTime<Local>,
}

impl StatusProjection {
    pub fn text(&self) -> String {
        format!("FileSync: {}", self.last_log_line)
    }
}

/// Format a record stamped with the current local time
pub fn record(kind: &str, action: &str, data: &Value) -> FormattedMessage {
    record_at(kind, action, data, Local::now())
}

/// Format a record with an explicit timestamp
pub fn record_at(kind: &str, action: &str, data: &Value, at: DateTime<Local>) -> FormattedMessage {
    let detail = describe(data);
    let msg = if detail.is_empty() {
        format!("{} {}", kind, action)
    } else {
        format!("{} {}: {}", kind, action, detail)
    };

    FormattedMessage {
        date: at.format(DATE_FORMAT).to_string(),
        msg,
    }
}

fn describe(data: &Value) -> String {
    match data {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Destination for the log stream and the status line
pub trait LogSink: Send + Sync {
    fn append_line(&self, line: &str);

    /// Called on every record; `visible` follows `showStatusBarInfo`
    fn set_status(&self, status: &StatusProjection, visible: bool);
}

/// Writes the log stream through `tracing`
#[derive(Debug, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn append_line(&self, line: &str) {
        info!(target: "filesync::output", "{}", line);
    }

    fn set_status(&self, status: &StatusProjection, visible: bool) {
        if visible {
            debug!(target: "filesync::status", "{}", status.text());
        }
    }
}

/// Routes records to a sink and maintains the status projection
pub struct LogRouter {
    sink: Arc<dyn LogSink>,
    status: Mutex<Option<StatusProjection>>,
    status_visible: AtomicBool,
}

impl LogRouter {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            status: Mutex::new(None),
            status_visible: AtomicBool::new(true),
        }
    }

    pub fn route(&self, event: &LogEvent) -> FormattedMessage {
        let message = record(&event.kind, &event.action, &event.data);
        self.sink.append_line(&message.line());

        let projection = StatusProjection {
            last_log_line: message.msg.clone(),
            timestamp: Local::now(),
        };
        self.sink
            .set_status(&projection, self.status_visible.load(Ordering::SeqCst));
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = Some(projection);

        message
    }

    pub fn set_status_visible(&self, visible: bool) {
        self.status_visible.store(visible, Ordering::SeqCst);
    }

    pub fn status_visible(&self) -> bool {
        self.status_visible.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Option<StatusProjection> {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
