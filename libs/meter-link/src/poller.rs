//! Fixed-interval measurement polling
//!
//! At most one poll is outstanding: ticks that fire while the client is busy
//! (a cycle still running, or another task holding the lock) are skipped, not
//! queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::DeviceClient;
use crate::error::MeterError;
use crate::transport::Connector;
use crate::types::MeasurementSnapshot;

const EVENT_BUFFER: usize = 64;

/// Why a tick produced no read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Busy,
    NotConnected,
}

/// Outcome of one poll tick
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Snapshot(MeasurementSnapshot),
    Failed(MeterError),
    Skipped(SkipReason),
}

/// Handle to a running poll loop
#[derive(Debug)]
pub struct PollerHandle {
    events: mpsc::Receiver<PollEvent>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Next poll outcome, `None` once the loop has stopped
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        self.events.recv().await
    }

    /// Stop scheduling new cycles. A cycle already running completes.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stop and wait for the loop to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("Poller task ended abnormally: {}", e);
        }
    }
}

pub struct Poller;

impl Poller {
    pub fn spawn<C>(client: Arc<Mutex<DeviceClient<C>>>, period: Duration) -> PollerHandle
    where
        C: Connector + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let token = CancellationToken::new();
        let task = tokio::spawn(run(client, period, tx, token.clone()));

        PollerHandle {
            events: rx,
            token,
            task,
        }
    }
}

async fn run<C>(
    client: Arc<Mutex<DeviceClient<C>>>,
    period: Duration,
    tx: mpsc::Sender<PollEvent>,
    token: CancellationToken,
) where
    C: Connector + 'static,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Poller started, interval {}ms", period.as_millis());

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let event = match client.try_lock() {
            Err(_) => PollEvent::Skipped(SkipReason::Busy),
            Ok(mut guard) if guard.is_connected() => match guard.read_measurements().await {
                Ok(snapshot) => PollEvent::Snapshot(snapshot),
                Err(e) => PollEvent::Failed(e),
            },
            Ok(_) => PollEvent::Skipped(SkipReason::NotConnected),
        };

        if let PollEvent::Skipped(reason) = &event {
            debug!("Poll skipped: {:?}", reason);
        }
        if let Err(e) = tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(_) => debug!("Poll event dropped, receiver lagging"),
                mpsc::error::TrySendError::Closed(_) => break,
            }
        }
    }

    info!("Poller stopped");
}
