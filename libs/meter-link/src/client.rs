//! Device client
//!
//! Connection state machine, unit address probing and the typed read API.
//!
//! ```text
//! Disconnected -> Connecting -> Probing(unit) -> Connected
//!       ^______________|______________|______________|   (any failure)
//! ```
//!
//! All operations take `&mut self`, so one exchange is in flight at a time.
//! Share a client between tasks through `Arc<tokio::sync::Mutex<_>>`.

use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{MeterError, Result};
use crate::events::{ClientEvent, ConnectionState, SessionLogger};
use crate::frame::{self, ReadRequest};
use crate::registers::{decode_float, decode_registers, RegisterMap};
use crate::transport::{Connector, TcpConnector, Transport};
use crate::types::{ClientConfig, ConnectResult, ConnectionInfo, MeasurementSnapshot};

/// Client for one measurement device
pub struct DeviceClient<C: Connector = TcpConnector> {
    connector: C,
    config: ClientConfig,
    registers: RegisterMap,
    session: Option<C::Session>,
    info: Option<ConnectionInfo>,
    state: ConnectionState,
    logger: SessionLogger,
}

impl DeviceClient<TcpConnector> {
    /// TCP client with the given timings
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_connector(TcpConnector::new(config.clone()), config)
    }
}

impl<C: Connector> DeviceClient<C> {
    pub fn with_connector(connector: C, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            logger: SessionLogger::new(config.event_capacity),
            config,
            registers: RegisterMap::default(),
            session: None,
            info: None,
            state: ConnectionState::Disconnected,
        })
    }

    /// Use a different register table
    pub fn with_register_map(mut self, registers: RegisterMap) -> Self {
        self.registers = registers;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.info.as_ref()
    }

    pub fn register_map(&self) -> &RegisterMap {
        &self.registers
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.logger.subscribe()
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Connect and report the outcome in boundary form
    pub async fn connect(&mut self, host: &str, port: u16) -> ConnectResult {
        let result = self.try_connect(host, port).await;
        ConnectResult::from(&result)
    }

    /// Open a session, probe for the unit address and read the firmware version
    pub async fn try_connect(&mut self, host: &str, port: u16) -> Result<ConnectionInfo> {
        if self.session.is_some() {
            self.teardown("reconnect requested").await;
        }

        let target = format!("{host}:{port}");
        self.set_state(ConnectionState::Connecting, "connect requested");
        self.logger.log_connect(
            &target,
            &format!("timeout {}ms", self.config.connect_timeout_ms),
        );

        match self.connector.open(host, port).await {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                self.logger.error(format!("Connection to {target} failed"), e.to_string());
                self.set_state(ConnectionState::Disconnected, "connect failed");
                return Err(e);
            },
        }

        let unit = match self.probe(host, port).await {
            Ok(unit) => unit,
            Err(e) => {
                self.logger.error("Unit probing failed", e.to_string());
                self.teardown("probing failed").await;
                return Err(e);
            },
        };

        let firmware_version = match self.read_float_from(unit, self.registers.version).await {
            Ok(version) => version,
            Err(e) => {
                self.logger
                    .warning("Firmware version read failed, using 0.0", e.to_string());
                0.0
            },
        };

        let info = ConnectionInfo {
            host: host.to_string(),
            port,
            unit_id: unit,
            firmware_version,
        };
        self.info = Some(info.clone());
        self.set_state(ConnectionState::Connected, "unit adopted");
        self.logger.info(format!(
            "Connected to {target}, unit {unit}, firmware {firmware_version}"
        ));
        Ok(info)
    }

    /// Close the session. Never fails and may be called repeatedly.
    pub async fn disconnect(&mut self) {
        self.teardown("disconnect requested").await;
    }

    async fn teardown(&mut self, reason: &str) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            self.logger.info("Disconnected");
        }
        self.info = None;
        self.set_state(ConnectionState::Disconnected, reason);
    }

    fn set_state(&mut self, new_state: ConnectionState, reason: &str) {
        if self.state == new_state {
            return;
        }
        let old_state = std::mem::replace(&mut self.state, new_state);
        self.logger.log_status(old_state, new_state, reason);
    }

    /// Try each configured unit with a one-register read of the version address.
    ///
    /// The session is reused between attempts and only reopened after a
    /// socket failure with units left to try. The first unit with a valid
    /// answer wins.
    async fn probe(&mut self, host: &str, port: u16) -> Result<u8> {
        let units = self.config.probe_units.clone();
        let address = self.registers.version;

        for (i, &unit) in units.iter().enumerate() {
            let last = i + 1 == units.len();
            self.set_state(ConnectionState::Probing(unit), "probing unit address");
            match self.exchange(unit, address, 1).await {
                Ok(data) if !data.is_empty() => {
                    debug!("Probe unit {} answered", unit);
                    return Ok(unit);
                },
                Ok(_) => {
                    self.logger
                        .warning(format!("Probe unit {unit} failed"), "empty payload");
                },
                Err(e) => {
                    self.logger
                        .warning(format!("Probe unit {unit} failed"), e.to_string());
                    if e.needs_reconnect() && !last {
                        self.reopen(host, port).await?;
                    }
                },
            }
        }

        Err(MeterError::ProbeExhausted { tried: units })
    }

    async fn reopen(&mut self, host: &str, port: u16) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        debug!("Reopening session to {}:{}", host, port);
        self.session = Some(self.connector.open(host, port).await?);
        Ok(())
    }

    // ========================================================================
    // Exchanges
    // ========================================================================

    /// One request/response cycle returning the validated register payload
    async fn exchange(&mut self, unit: u8, address: u16, count: u16) -> Result<Vec<u8>> {
        let request = ReadRequest::holding_registers(unit, address, count);
        let exchange_timeout = self.config.exchange_timeout();
        let session = self.session.as_mut().ok_or(MeterError::NotConnected)?;

        session.flush_stale_input().await?;

        let bytes = request.encode();
        self.logger.log_frame("TX", unit, &bytes);
        session.write(&bytes).await?;

        let response = session
            .read_frame(request.function, exchange_timeout)
            .await?;
        if response.is_empty() {
            return Err(MeterError::NoResponse {
                unit,
                timeout_ms: self.config.exchange_timeout_ms,
            });
        }
        self.logger.log_frame("RX", unit, &response);

        let parsed = frame::validate(&response, request.function, count)?;
        if parsed.unit != unit {
            warn!("Response unit {} does not match request unit {}", parsed.unit, unit);
        }
        Ok(parsed.data.to_vec())
    }

    async fn read_float_from(&mut self, unit: u8, address: u16) -> Result<f32> {
        let data = self.exchange(unit, address, 2).await?;
        decode_float(&data)
    }

    fn connected_unit(&self) -> Result<u8> {
        match (&self.state, &self.info, &self.session) {
            (ConnectionState::Connected, Some(info), Some(_)) => Ok(info.unit_id),
            _ => Err(MeterError::NotConnected),
        }
    }

    /// Drop the session when the transport is gone
    async fn check_transport(&mut self, err: &MeterError) {
        if err.needs_reconnect() && self.session.is_some() {
            self.logger.error("Connection lost", err.to_string());
            self.teardown("transport failure").await;
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read `count` holding registers starting at `address`
    pub async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let unit = self.connected_unit()?;
        match self.exchange(unit, address, count).await {
            Ok(data) => decode_registers(&data, usize::from(count)),
            Err(e) => {
                self.check_transport(&e).await;
                Err(e)
            },
        }
    }

    /// Read the two-register float at `address`
    pub async fn read_float(&mut self, address: u16) -> Result<f32> {
        let unit = self.connected_unit()?;
        match self.read_float_from(unit, address).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.check_transport(&e).await;
                Err(e)
            },
        }
    }

    /// Phase A line frequency
    pub async fn read_frequency(&mut self) -> Result<f32> {
        self.read_float(self.registers.frequency_a).await
    }

    /// Read all six phase values. Any failed read fails the whole snapshot.
    pub async fn read_measurements(&mut self) -> Result<MeasurementSnapshot> {
        let unit = self.connected_unit()?;
        let mut values = [0.0f32; 6];

        for (i, (quantity, address)) in self.registers.measurement_plan().into_iter().enumerate() {
            if i > 0 {
                sleep(self.config.inter_read_pause()).await;
            }
            match self.read_float_from(unit, address).await {
                Ok(value) => values[i] = value,
                Err(e) => {
                    self.logger
                        .error(format!("Failed to read {quantity}"), e.to_string());
                    self.check_transport(&e).await;
                    return Err(e);
                },
            }
        }

        let [voltage_a, voltage_b, voltage_c, current_a, current_b, current_c] = values;
        Ok(MeasurementSnapshot {
            voltage_a,
            voltage_b,
            voltage_c,
            current_a,
            current_b,
            current_c,
            captured_at: chrono::Utc::now(),
        })
    }
}
