//! Scripted in-process device for unit tests

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::crc;
use crate::error::{MeterError, Result};
use crate::frame::{self, ReadRequest};
use crate::registers::encode_float;
use crate::transport::{Connector, Transport};

#[derive(Debug, Default)]
pub(crate) struct MockDevice {
    /// Units that answer; everyone else stays silent
    pub accepted_units: Vec<u8>,
    pub registers: HashMap<u16, u16>,
    /// Addresses answered with a broken CRC
    pub corrupt_addresses: Vec<u16>,
    /// Reads of more registers than this get exception 0x02
    pub exception_above_count: Option<u16>,
    /// Writes addressed to this unit fail like a dropped socket
    pub drop_on_unit: Option<u8>,
    pub refuse_connect: bool,
    pub requests: Vec<ReadRequest>,
    pub opens: usize,
    pub closes: usize,
}

impl MockDevice {
    pub fn answering(units: &[u8]) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            accepted_units: units.to_vec(),
            ..Default::default()
        }))
    }

    pub fn set_float(&mut self, address: u16, value: f32) {
        let [low, high] = encode_float(value);
        self.registers.insert(address, low);
        self.registers.insert(address + 1, high);
    }

    fn respond(&self, request: &ReadRequest) -> Option<Vec<u8>> {
        if !self.accepted_units.contains(&request.unit) {
            return None;
        }
        if self.exception_above_count.is_some_and(|max| request.count > max) {
            let mut response = vec![request.unit, request.function | frame::EXCEPTION_FLAG, 0x02];
            crc::append(&mut response);
            return Some(response);
        }
        let mut response = vec![request.unit, request.function, (request.count * 2) as u8];
        for offset in 0..request.count {
            let value = self
                .registers
                .get(&(request.address + offset))
                .copied()
                .unwrap_or_default();
            response.extend_from_slice(&value.to_be_bytes());
        }
        crc::append(&mut response);
        if self.corrupt_addresses.contains(&request.address) {
            let last = response.len() - 1;
            response[last] ^= 0xFF;
        }
        Some(response)
    }
}

pub(crate) struct MockTransport {
    device: Arc<Mutex<MockDevice>>,
    pending: Option<Vec<u8>>,
    open: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn flush_stale_input(&mut self) -> Result<usize> {
        Ok(self.pending.take().map(|p| p.len()).unwrap_or_default())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.open {
            return Err(MeterError::NotConnected);
        }
        let request = frame::parse_request(bytes)?;
        let mut device = self.device.lock().unwrap();
        device.requests.push(request);
        if device.drop_on_unit == Some(request.unit) {
            return Err(MeterError::socket("Connection reset by peer"));
        }
        self.pending = device.respond(&request);
        Ok(())
    }

    async fn read_frame(&mut self, _expected_function: u8, _timeout: Duration) -> Result<Vec<u8>> {
        Ok(self.pending.take().unwrap_or_default())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.device.lock().unwrap().closes += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

pub(crate) struct MockConnector {
    pub device: Arc<Mutex<MockDevice>>,
}

#[async_trait]
impl Connector for MockConnector {
    type Session = MockTransport;

    async fn open(&self, host: &str, port: u16) -> Result<MockTransport> {
        let mut device = self.device.lock().unwrap();
        if device.refuse_connect {
            return Err(MeterError::socket(format!(
                "Failed to connect to {host}:{port}: refused"
            )));
        }
        device.opens += 1;
        Ok(MockTransport {
            device: self.device.clone(),
            pending: None,
            open: true,
        })
    }
}
