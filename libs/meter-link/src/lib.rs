//! Meter Link Library
//!
//! Client for three-phase electrical measurement devices speaking Modbus RTU
//! framing over a raw TCP stream.
//!
//! # Architecture
//!
//! Leaf first:
//! - **CRC16** (`crc`): frame checksum
//! - **Frames** (`frame`): request encoding, incremental response reassembly, validation
//! - **Transport** (`transport`): `Transport`/`Connector` traits and the stream session
//! - **Registers** (`registers`): register and float decoding, the register table
//! - **Client** (`client`): state machine, unit probing, typed reads
//! - **Events** (`events`): status and log event stream
//! - **Poller** (`poller`): fixed-interval measurement driver
//!
//! # Example
//!
//! ```no_run
//! use meter_link::{ClientConfig, DeviceClient};
//!
//! # async fn run() -> meter_link::Result<()> {
//! let mut client = DeviceClient::new(ClientConfig::default())?;
//! let info = client.try_connect("10.0.0.5", 1001).await?;
//! println!("unit {} firmware {}", info.unit_id, info.firmware_version);
//!
//! let snapshot = client.read_measurements().await?;
//! println!("{:?}", snapshot.voltages());
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod crc;
pub mod error;
pub mod events;
pub mod frame;
pub mod poller;
pub mod registers;
pub mod transport;
pub mod types;

#[cfg(test)]
mod mock;

// Re-export core types
pub use client::DeviceClient;
pub use error::{ErrorKind, MeterError, Result};
pub use events::{ClientEvent, ConnectionState, LogEntry, LogLevel, SessionLogger};
pub use frame::{FrameState, ReadRequest, ResponseFrame};
pub use poller::{PollEvent, Poller, PollerHandle, SkipReason};
pub use registers::{Quantity, RegisterMap};
pub use transport::{Connector, StreamSession, TcpConnector, TcpSession, Transport};
pub use types::{ClientConfig, ConnectResult, ConnectionInfo, MeasurementSnapshot};
