//! Simulated meter for integration tests
//!
//! Serves FC03 requests over any byte stream, either a real TCP listener or an
//! in-memory duplex pipe. Responses can be dribbled out in small chunks and
//! followed by junk bytes to exercise reassembly and stale input flushing.

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meter_link::frame::{self, ReadRequest};
use meter_link::registers::encode_float;
use meter_link::{crc, ClientConfig, Connector, StreamSession};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Default)]
pub struct MeterProfile {
    pub unit: u8,
    pub registers: HashMap<u16, u16>,
    /// 0 sends each response in one write
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    /// Junk written after every response
    pub trailing_garbage: Vec<u8>,
    pub silent: bool,
    /// Drop the connection instead of answering the next request
    pub hang_up: bool,
    pub requests: Vec<ReadRequest>,
}

#[derive(Debug, Clone)]
pub struct SimulatedMeter {
    profile: Arc<Mutex<MeterProfile>>,
}

impl SimulatedMeter {
    pub fn new(unit: u8) -> Self {
        Self {
            profile: Arc::new(Mutex::new(MeterProfile {
                unit,
                ..Default::default()
            })),
        }
    }

    /// Meter with the standard phase values loaded
    pub fn standard(unit: u8) -> Self {
        let meter = Self::new(unit);
        meter.set_float(0, 1.5);
        meter.set_float(66, 50.0);
        meter.set_float(68, 230.5);
        meter.set_float(70, 231.25);
        meter.set_float(72, 229.0);
        meter.set_float(74, 4.5);
        meter.set_float(76, 4.75);
        meter.set_float(78, 5.0);
        meter
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.profile.lock().unwrap().registers.insert(address, value);
    }

    pub fn set_float(&self, address: u16, value: f32) {
        let [low, high] = encode_float(value);
        self.set_register(address, low);
        self.set_register(address + 1, high);
    }

    pub fn configure(&self, apply: impl FnOnce(&mut MeterProfile)) {
        apply(&mut self.profile.lock().unwrap());
    }

    pub fn requests(&self) -> Vec<ReadRequest> {
        self.profile.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.profile.lock().unwrap().requests.clear();
    }

    /// Accept TCP connections on an ephemeral local port
    pub async fn listen(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let meter = self.clone();

        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                debug!("Simulator accepted {}", peer);
                let _ = stream.set_nodelay(true);
                let meter = meter.clone();
                tokio::spawn(async move { meter.serve(stream).await });
            }
        });

        addr
    }

    /// Answer requests until the peer goes away or a hang-up is scripted
    pub async fn serve<S>(&self, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut request = [0u8; frame::REQUEST_LEN];
        loop {
            if stream.read_exact(&mut request).await.is_err() {
                return;
            }
            let Ok(parsed) = frame::parse_request(&request) else {
                continue;
            };

            let (response, chunk_size, chunk_delay, garbage) = {
                let mut profile = self.profile.lock().unwrap();
                profile.requests.push(parsed);
                if profile.hang_up {
                    return;
                }
                if profile.silent || parsed.unit != profile.unit {
                    continue;
                }
                (
                    build_response(&profile.registers, &parsed),
                    profile.chunk_size,
                    profile.chunk_delay,
                    profile.trailing_garbage.clone(),
                )
            };

            if chunk_size == 0 {
                let mut bytes = response;
                bytes.extend_from_slice(&garbage);
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
                continue;
            }

            for piece in response.chunks(chunk_size) {
                if stream.write_all(piece).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
                if !chunk_delay.is_zero() {
                    sleep(chunk_delay).await;
                }
            }
            if !garbage.is_empty() {
                if stream.write_all(&garbage).await.is_err() {
                    return;
                }
                let _ = stream.flush().await;
            }
        }
    }
}

fn build_response(registers: &HashMap<u16, u16>, request: &ReadRequest) -> Vec<u8> {
    let mut response = vec![
        request.unit,
        request.function,
        (request.count * 2) as u8,
    ];
    for offset in 0..request.count {
        let value = registers
            .get(&(request.address + offset))
            .copied()
            .unwrap_or_default();
        response.extend_from_slice(&value.to_be_bytes());
    }
    crc::append(&mut response);
    response
}

/// Connector handing out in-memory pipes to a simulated meter
#[derive(Debug, Clone)]
pub struct DuplexConnector {
    meter: SimulatedMeter,
    config: ClientConfig,
    pub dialed: Arc<Mutex<Vec<(String, u16)>>>,
}

impl DuplexConnector {
    pub fn new(meter: SimulatedMeter, config: ClientConfig) -> Self {
        Self {
            meter,
            config,
            dialed: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    type Session = StreamSession<DuplexStream>;

    async fn open(&self, host: &str, port: u16) -> meter_link::Result<Self::Session> {
        self.dialed.lock().unwrap().push((host.to_string(), port));
        let (client_end, meter_end) = tokio::io::duplex(1024);
        let meter = self.meter.clone();
        tokio::spawn(async move { meter.serve(meter_end).await });
        Ok(StreamSession::new(
            client_end,
            format!("{host}:{port}"),
            &self.config,
        ))
    }
}

/// Short timeouts so failure paths finish quickly
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        connect_timeout_ms: 1_000,
        exchange_timeout_ms: 150,
        inter_read_pause_ms: 5,
        ..Default::default()
    }
}
