use super::AccessGate;
use crate::sources::StreamTransport;
use crate::types::{ConnectionState, ConnectionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Periodic connection health check.
///
/// Only orchestrates: it reads transport state and may order a reconnect, but
/// never touches cached data.
pub struct ConnectionSupervisor {
    transport: Arc<StreamTransport>,
    gate: Arc<AccessGate>,
    interval: Duration,
}

impl ConnectionSupervisor {
    pub fn new(transport: Arc<StreamTransport>, gate: Arc<AccessGate>, interval: Duration) -> Self {
        Self {
            transport,
            gate,
            interval,
        }
    }

    /// Run one check. Returns whether a reconnect was ordered.
    ///
    /// A transport that was never started (`Idle`) is left alone, as is one
    /// that is connected or already retrying on its own.
    pub fn check(&self) -> bool {
        match self.transport.state() {
            ConnectionState::Disconnected => {
                info!("Stream is down with no retry scheduled; reconnecting");
                self.transport.force_reconnect();
                true
            }
            state => {
                debug!("Supervisor check: stream {}", state);
                false
            }
        }
    }

    /// Start the periodic check. The first check runs one interval from now.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + supervisor.interval, supervisor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                supervisor.check();
            }
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        let state = self.transport.state();
        ConnectionStatus {
            state,
            connected: state == ConnectionState::Connected,
            last_received_at: self.transport.last_received_at(),
            reconnect_attempts: self.transport.attempts(),
            forced_reconnects: self.transport.forced_reconnects(),
            access_required: self.gate.access_required(),
        }
    }
}
