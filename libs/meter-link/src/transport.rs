//! Transport session
//!
//! Owns the byte stream to the meter and implements the raw exchange
//! primitives: stale input flushing, frame writes and timed frame reads.
//! The client only talks to [`Transport`] and [`Connector`], so tests can
//! drive it over in-memory streams or scripted mocks.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{MeterError, Result};
use crate::frame::{self, FrameState, MAX_RESPONSE_LEN, RESPONSE_HEADER_LEN};
use crate::types::ClientConfig;

/// Raw exchange primitives over one open session
#[async_trait]
pub trait Transport: Send {
    /// Discard bytes left over from earlier exchanges. Returns how many were dropped.
    ///
    /// Stops after one quiet flush delay, or after one exchange timeout when the
    /// peer keeps sending.
    async fn flush_stale_input(&mut self) -> Result<usize>;

    /// Write a whole frame
    async fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Collect one response frame.
    ///
    /// Returns what arrived before `timeout`: a complete frame, a partial one,
    /// or nothing at all. Validation is left to the caller.
    async fn read_frame(&mut self, expected_function: u8, timeout: Duration) -> Result<Vec<u8>>;

    /// Shut the session down. Safe to call more than once.
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens transport sessions to a remote endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Transport + 'static;

    async fn open(&self, host: &str, port: u16) -> Result<Self::Session>;
}

// ============================================================================
// Stream session
// ============================================================================

/// Session over any async byte stream
#[derive(Debug)]
pub struct StreamSession<S> {
    stream: Option<S>,
    peer: String,
    receive_poll: Duration,
    flush_delay: Duration,
    flush_limit: Duration,
}

/// Session over a TCP socket
pub type TcpSession = StreamSession<TcpStream>;

impl<S> StreamSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            stream: Some(stream),
            peer: peer.into(),
            receive_poll: config.receive_poll(),
            flush_delay: config.flush_delay(),
            flush_limit: config.exchange_timeout(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn stream_mut(&mut self) -> Result<&mut S> {
        self.stream.as_mut().ok_or(MeterError::NotConnected)
    }
}

#[async_trait]
impl<S> Transport for StreamSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn flush_stale_input(&mut self) -> Result<usize> {
        let flush_delay = self.flush_delay;
        let deadline = Instant::now() + self.flush_limit;
        let stream = self.stream_mut()?;
        let mut scratch = [0u8; MAX_RESPONSE_LEN];
        let mut discarded = 0;

        // Anything arriving within one flush delay still counts as stale
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Flush limit reached, peer still sending ({}B dropped)", discarded);
                break;
            }
            match timeout(flush_delay.min(remaining), stream.read(&mut scratch)).await {
                Ok(Ok(0)) => {
                    return Err(MeterError::socket("Connection closed by peer"));
                },
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) => {
                    error!("Flush RX: {}", e);
                    return Err(MeterError::socket(format!("Read error while flushing: {e}")));
                },
                Err(_) => break,
            }
        }

        if discarded > 0 {
            debug!("Flushed {}B stale input from {}", discarded, self.peer);
        }
        Ok(discarded)
    }

    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(frame).await.map_err(|e| {
            error!("TCP TX: {}", e);
            MeterError::socket(format!("Send error: {e}"))
        })?;
        stream
            .flush()
            .await
            .map_err(|e| MeterError::socket(format!("Flush error: {e}")))?;
        debug!("TX: {}B", frame.len());
        Ok(())
    }

    async fn read_frame(&mut self, expected_function: u8, limit: Duration) -> Result<Vec<u8>> {
        let receive_poll = self.receive_poll;
        let stream = self.stream_mut()?;
        let deadline = Instant::now() + limit;
        let mut buffer = Vec::with_capacity(RESPONSE_HEADER_LEN + 8);
        let mut chunk = [0u8; MAX_RESPONSE_LEN];
        // Never read past the end of the frame; excess stays in the socket
        let mut wanted = RESPONSE_HEADER_LEN;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(
                    "RX timeout after {}ms with {}B",
                    limit.as_millis(),
                    buffer.len()
                );
                break;
            }

            match timeout(receive_poll.min(remaining), stream.read(&mut chunk[..wanted])).await {
                Ok(Ok(0)) => {
                    warn!("Peer closed during receive");
                    return Err(MeterError::socket("Connection closed by peer"));
                },
                Ok(Ok(n)) => match frame::accumulate(&mut buffer, &chunk[..n], expected_function) {
                    FrameState::Complete(len) => {
                        buffer.truncate(len);
                        debug!("RX: {}B", len);
                        break;
                    },
                    FrameState::Incomplete { wanted: Some(more) } => {
                        wanted = more.min(chunk.len());
                    },
                    FrameState::Incomplete { wanted: None } => {
                        if buffer.len() >= MAX_RESPONSE_LEN {
                            warn!("RX overflow: {}B without a frame boundary", buffer.len());
                            break;
                        }
                        wanted = MAX_RESPONSE_LEN - buffer.len();
                    },
                },
                Ok(Err(e)) => {
                    error!("TCP RX: {}", e);
                    return Err(MeterError::socket(format!("Receive error: {e}")));
                },
                // Nothing this poll interval
                Err(_) => continue,
            }
        }

        Ok(buffer)
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown {}: {}", self.peer, e);
            }
            info!("Session closed: {}", self.peer);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

// ============================================================================
// TCP connector
// ============================================================================

/// Opens [`TcpSession`]s with the configured connect timeout
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    config: ClientConfig,
}

impl TcpConnector {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Session = TcpSession;

    async fn open(&self, host: &str, port: u16) -> Result<TcpSession> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        // On timeout the pending connect future is dropped, nothing half-open remains
        match timeout(self.config.connect_timeout(), TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                Ok(StreamSession::new(stream, addr, &self.config))
            },
            Ok(Err(e)) => {
                error!("TCP err: {} - {}", addr, e);
                Err(MeterError::socket(format!("Failed to connect to {addr}: {e}")))
            },
            Err(_) => {
                warn!("TCP timeout: {}", addr);
                Err(MeterError::ConnectTimeout(addr))
            },
        }
    }
}
