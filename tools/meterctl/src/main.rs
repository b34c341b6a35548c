//! meterctl - command-line driver for three-phase measurement devices
//!
//! Probes a meter for its unit address, polls phase voltages and currents,
//! or dumps raw holding registers.

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::*;
use common::LogConfig;
use meter_link::{
    ClientEvent, DeviceClient, LogLevel, MeasurementSnapshot, PollEvent, Poller, SkipReason,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{CliOverrides, LogOverrides, MeterctlConfig};

#[derive(Parser)]
#[command(name = "meterctl")]
#[command(about = "Probe and poll three-phase measurement devices over Modbus RTU/TCP")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Device host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Device TCP port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "METERCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, report the unit address and firmware version, disconnect
    Probe,

    /// Read phase voltages and currents at a fixed interval
    Poll {
        /// Stop after this many snapshots
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Poll interval in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// Print one JSON object per snapshot
        #[arg(long)]
        json: bool,
    },

    /// Read raw holding registers
    Read {
        /// Starting register address
        address: u16,

        /// Number of registers
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u16,

        /// Decode the two registers at `address` as a device float
        #[arg(short, long, conflicts_with = "count")]
        float: bool,
    },
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        let interval_ms = match &self.command {
            Commands::Poll { interval_ms, .. } => *interval_ms,
            _ => None,
        };
        CliOverrides {
            host: self.host.clone(),
            port: self.port,
            poll_interval_ms: interval_ms,
            log: LogOverrides {
                level: self.log_level.clone(),
                dir: self.log_dir.clone(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = config::load(cli.config.as_deref(), &cli.overrides())?;

    common::init_with_config(LogConfig {
        app_name: "meterctl".to_string(),
        level: common::logging::parse_level(&config.log.level)?,
        log_dir: config.log.dir.clone(),
        enable_json: config.log.json,
        ansi: !cli.no_color,
    })?;
    debug!("Config: {:?}", config);

    match cli.command {
        Commands::Probe => probe(&config).await,
        Commands::Poll { count, json, .. } => poll(&config, count, json).await,
        Commands::Read {
            address,
            count,
            float,
        } => read(&config, address, count, float).await,
    }
}

async fn connect(config: &MeterctlConfig) -> Result<DeviceClient> {
    let mut client = DeviceClient::new(config.client.clone())?;
    let result = client.connect(&config.host, config.port).await;
    if !result.success {
        eprintln!("{} {}", "FAIL".red(), result.message);
        bail!("could not connect to {}:{}", config.host, config.port);
    }
    Ok(client)
}

async fn probe(config: &MeterctlConfig) -> Result<()> {
    let mut client = connect(config).await?;
    if let Some(info) = client.connection_info() {
        println!("{} {}:{}", "OK".green(), info.host, info.port);
        println!("  unit id:  {}", info.unit_id.to_string().bold());
        println!("  firmware: {}", info.firmware_version.to_string().bold());
    }
    client.disconnect().await;
    Ok(())
}

async fn read(config: &MeterctlConfig, address: u16, count: u16, float: bool) -> Result<()> {
    let mut client = connect(config).await?;

    let outcome = if float {
        client.read_float(address).await.map(|value| {
            println!("{:>5}  {}", address, value);
        })
    } else {
        client.read_holding_registers(address, count).await.map(|values| {
            for (offset, value) in values.iter().enumerate() {
                println!(
                    "{:>5}  0x{:04X}  {:>5}",
                    usize::from(address) + offset,
                    value,
                    value
                );
            }
        })
    };

    client.disconnect().await;
    outcome.map_err(Into::into)
}

async fn poll(config: &MeterctlConfig, count: Option<u64>, json: bool) -> Result<()> {
    let client = connect(config).await?;
    let mut events = client.subscribe();
    let client = Arc::new(Mutex::new(client));

    let interval = Duration::from_millis(config.poll_interval_ms);
    info!("Polling every {}ms", config.poll_interval_ms);
    let mut handle = Poller::spawn(client.clone(), interval);

    let mut received = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            },
            event = events.recv() => {
                if let Ok(event) = event {
                    print_client_event(&event);
                }
            },
            event = handle.next_event() => match event {
                Some(PollEvent::Snapshot(snapshot)) => {
                    print_snapshot(&snapshot, json)?;
                    received += 1;
                    if count.is_some_and(|n| received >= n) {
                        break;
                    }
                },
                Some(PollEvent::Failed(e)) => eprintln!("{} {}", "ERROR".red(), e),
                Some(PollEvent::Skipped(SkipReason::Busy)) => debug!("Poll skipped: busy"),
                Some(PollEvent::Skipped(SkipReason::NotConnected)) => {
                    bail!("connection to {}:{} lost", config.host, config.port);
                },
                None => break,
            },
        }
    }

    handle.shutdown().await;
    client.lock().await.disconnect().await;
    Ok(())
}

fn print_client_event(event: &ClientEvent) {
    match event {
        ClientEvent::StatusChanged { state, .. } => {
            eprintln!("{} {}", "STATUS".cyan(), state);
        },
        ClientEvent::Log(entry) if entry.level == LogLevel::Error => {
            eprintln!(
                "{} {} {}",
                "ERROR".red(),
                entry.message,
                entry.detail.as_deref().unwrap_or_default()
            );
        },
        ClientEvent::Log(_) => {},
    }
}

fn print_snapshot(snapshot: &MeasurementSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    let [va, vb, vc] = snapshot.voltages();
    let [ia, ib, ic] = snapshot.currents();
    println!(
        "{}  V {:>8.2} {:>8.2} {:>8.2}  A {:>7.3} {:>7.3} {:>7.3}",
        snapshot.captured_at.format("%H:%M:%S%.3f").to_string().dimmed(),
        va,
        vb,
        vc,
        ia,
        ib,
        ic
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_poll_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "meterctl",
            "--host",
            "10.0.0.5",
            "--port",
            "1001",
            "poll",
            "--count",
            "3",
            "--interval-ms",
            "250",
            "--json",
        ])
        .unwrap();
        let overrides = cli.overrides();
        assert_eq!(overrides.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(overrides.port, Some(1001));
        assert_eq!(overrides.poll_interval_ms, Some(250));
        assert!(matches!(
            cli.command,
            Commands::Poll {
                count: Some(3),
                json: true,
                ..
            }
        ));
    }

    #[test]
    fn test_read_float_conflicts_with_count() {
        assert!(Cli::try_parse_from(["meterctl", "read", "68", "--float", "--count", "4"]).is_err());
        assert!(Cli::try_parse_from(["meterctl", "read", "68", "--float"]).is_ok());
    }
}
