//! Shared ambient services for the meter tools
//!
//! - logging: console + daily rolling file output through `tracing`
//! - config: layered configuration loading with `figment`

pub mod config;
pub mod error;
pub mod logging;

pub use config::{load_config, load_config_with_overrides};
pub use error::{Error, Result};
pub use logging::{init_with_config, LogConfig};
