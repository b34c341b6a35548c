//! Client configuration and result types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MeterError, Result};

/// Timing constants of the reference device
pub mod timeouts {
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
    pub const DEFAULT_EXCHANGE_TIMEOUT_MS: u64 = 3_000;
    pub const DEFAULT_RECEIVE_POLL_MS: u64 = 10;
    pub const DEFAULT_FLUSH_DELAY_MS: u64 = 10;
    pub const DEFAULT_INTER_READ_PAUSE_MS: u64 = 50;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
}

/// Unit addresses tried, in order, when connecting
pub const DEFAULT_PROBE_UNITS: [u8; 3] = [1, 2, 3];

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Client timing and probing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// TCP connect timeout (milliseconds)
    pub connect_timeout_ms: u64,
    /// Per request/response exchange timeout (milliseconds)
    pub exchange_timeout_ms: u64,
    /// Receive loop poll interval (milliseconds)
    pub receive_poll_ms: u64,
    /// Pause between drain passes while flushing stale input (milliseconds)
    pub flush_delay_ms: u64,
    /// Device turnaround pause between consecutive reads (milliseconds)
    pub inter_read_pause_ms: u64,
    /// Unit addresses probed on connect
    pub probe_units: Vec<u8>,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: timeouts::DEFAULT_CONNECT_TIMEOUT_MS,
            exchange_timeout_ms: timeouts::DEFAULT_EXCHANGE_TIMEOUT_MS,
            receive_poll_ms: timeouts::DEFAULT_RECEIVE_POLL_MS,
            flush_delay_ms: timeouts::DEFAULT_FLUSH_DELAY_MS,
            inter_read_pause_ms: timeouts::DEFAULT_INTER_READ_PAUSE_MS,
            probe_units: DEFAULT_PROBE_UNITS.to_vec(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    pub fn inter_read_pause(&self) -> Duration {
        Duration::from_millis(self.inter_read_pause_ms)
    }

    /// Reject values the client cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_ms == 0 {
            return Err(MeterError::config("connect_timeout_ms must be > 0"));
        }
        if self.exchange_timeout_ms == 0 {
            return Err(MeterError::config("exchange_timeout_ms must be > 0"));
        }
        if self.receive_poll_ms == 0 || self.receive_poll_ms > self.exchange_timeout_ms {
            return Err(MeterError::config(format!(
                "receive_poll_ms must be in 1..={}",
                self.exchange_timeout_ms
            )));
        }
        if self.probe_units.is_empty() {
            return Err(MeterError::config("probe_units must not be empty"));
        }
        if self.event_capacity == 0 {
            return Err(MeterError::config("event_capacity must be > 0"));
        }
        Ok(())
    }
}

/// Details of an established session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    /// Unit address that answered the probe
    pub unit_id: u8,
    /// 0.0 when the version register could not be read
    pub firmware_version: f32,
}

/// Outcome of `connect` as seen by a UI collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectResult {
    pub success: bool,
    pub message: String,
    pub firmware_version: f32,
    pub unit_id: Option<u8>,
}

impl From<&Result<ConnectionInfo>> for ConnectResult {
    fn from(result: &Result<ConnectionInfo>) -> Self {
        match result {
            Ok(info) => Self {
                success: true,
                message: format!(
                    "Connected to {}:{} (unit {}, firmware {})",
                    info.host, info.port, info.unit_id, info.firmware_version
                ),
                firmware_version: info.firmware_version,
                unit_id: Some(info.unit_id),
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
                firmware_version: 0.0,
                unit_id: None,
            },
        }
    }
}

/// Six phase values read in one polling cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeasurementSnapshot {
    pub voltage_a: f32,
    pub voltage_b: f32,
    pub voltage_c: f32,
    pub current_a: f32,
    pub current_b: f32,
    pub current_c: f32,
    pub captured_at: DateTime<Utc>,
}

impl MeasurementSnapshot {
    pub fn voltages(&self) -> [f32; 3] {
        [self.voltage_a, self.voltage_b, self.voltage_c]
    }

    pub fn currents(&self) -> [f32; 3] {
        [self.current_a, self.current_b, self.current_c]
    }
}
