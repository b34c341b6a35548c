//! meterctl configuration
//!
//! Defaults, then the TOML file given with `--config`, then `METERCTL_*`
//! environment variables, then command-line flags.
//!
//! ```toml
//! host = "10.0.0.5"
//! port = 1001
//! poll_interval_ms = 1000
//!
//! [log]
//! level = "debug"
//! dir = "logs"
//!
//! [client]
//! exchange_timeout_ms = 3000
//! probe_units = [1, 2, 3]
//! ```

use std::path::PathBuf;

use meter_link::types::timeouts::DEFAULT_POLL_INTERVAL_MS;
use meter_link::ClientConfig;
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "METERCTL_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterctlConfig {
    pub host: String,
    pub port: u16,
    pub poll_interval_ms: u64,
    pub log: LogSettings,
    pub client: ClientConfig,
}

impl Default for MeterctlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            log: LogSettings::default(),
            client: ClientConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

/// Values given on the command line, merged over every other layer
#[derive(Debug, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "LogOverrides::is_empty")]
    pub log: LogOverrides,
}

#[derive(Debug, Default, Serialize)]
pub struct LogOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl LogOverrides {
    fn is_empty(&self) -> bool {
        self.level.is_none() && self.dir.is_none()
    }
}

pub fn load(file: Option<&std::path::Path>, overrides: &CliOverrides) -> anyhow::Result<MeterctlConfig> {
    let config = common::load_config_with_overrides(
        MeterctlConfig::default(),
        file,
        ENV_PREFIX,
        overrides,
    )?;
    config.client.validate()?;
    Ok(config)
}
