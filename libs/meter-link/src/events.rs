//! Connection state, client events and the session logger
//!
//! Every status change and user-facing log line goes two ways: into `tracing`
//! and onto a broadcast channel a UI (or the CLI) can subscribe to. Raw frames
//! only go to `tracing` at debug level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

// ============================================================================
// Connection State
// ============================================================================

/// Connection state of a device client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No session
    #[default]
    Disconnected,
    /// Opening the TCP session
    Connecting,
    /// Trying a unit address
    Probing(u8),
    /// Unit adopted, reads allowed
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Probing(unit) => write!(f, "PROBING({unit})"),
            ConnectionState::Connected => write!(f, "CONNECTED"),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// User-facing log line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            level,
            message: message.into(),
            detail,
            timestamp: Utc::now(),
        }
    }
}

/// Event published by a device client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    StatusChanged {
        state: ConnectionState,
        connected: bool,
    },
    Log(LogEntry),
}

// ============================================================================
// Session Logger
// ============================================================================

/// Writes to `tracing` and publishes on the event channel
#[derive(Debug, Clone)]
pub struct SessionLogger {
    sender: broadcast::Sender<ClientEvent>,
}

impl SessionLogger {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    // No subscribers is fine
    fn publish(&self, event: ClientEvent) {
        let _ = self.sender.send(event);
    }

    fn log(&self, level: LogLevel, message: String, detail: Option<String>) {
        let line = match &detail {
            Some(d) => format!("{message}: {d}"),
            None => message.clone(),
        };
        match level {
            LogLevel::Info => info!("{}", line),
            LogLevel::Warning => warn!("{}", line),
            LogLevel::Error => error!("{}", line),
        }
        self.publish(ClientEvent::Log(LogEntry::new(level, message, detail)));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into(), None);
    }

    pub fn warning(&self, message: impl Into<String>, detail: impl Into<String>) {
        self.log(LogLevel::Warning, message.into(), Some(detail.into()));
    }

    pub fn error(&self, message: impl Into<String>, detail: impl Into<String>) {
        self.log(LogLevel::Error, message.into(), Some(detail.into()));
    }

    /// Log connection attempt
    pub fn log_connect(&self, target: &str, details: &str) {
        self.info(format!("[CONNECT] {target} - {details}"));
    }

    /// Log a state transition and publish it
    pub fn log_status(&self, old_state: ConnectionState, new_state: ConnectionState, reason: &str) {
        info!("[STATUS] {} -> {} - {}", old_state, new_state, reason);
        self.publish(ClientEvent::StatusChanged {
            state: new_state,
            connected: new_state.is_connected(),
        });
    }

    /// Log a raw frame as hex (tracing only)
    pub fn log_frame(&self, direction: &str, unit: u8, data: &[u8]) {
        debug!(
            "[{}] unit={} {} bytes: [{}]",
            direction,
            unit,
            data.len(),
            hex(data)
        );
    }
}

impl Default for SessionLogger {
    fn default() -> Self {
        Self::new(crate::types::DEFAULT_EVENT_CAPACITY)
    }
}

/// `[0x01, 0xAB]` -> `"01 AB"`
pub fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
