use std::{fmt, time::Duration};

use tokio::sync::watch;

/// Lifecycle of one gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    /// Socket open, waiting for Hello.
    Connecting,
    /// Hello received, identify sent, waiting for READY.
    Identifying,
    /// READY received.
    Connected,
    /// Socket gone; terminal.
    Closed,
}

/// Connection scoped state. Never carried over to another connection.
///
/// State changes are published on a watch channel so callers can follow the
/// connection after the client has been moved into its task.
pub struct GatewaySession {
    state: watch::Sender<GatewayState>,
    seq: Option<u64>,
    heartbeat_interval: Option<Duration>,
    identify_token: String,
}

impl fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySession")
            .field("state", &self.state())
            .field("seq", &self.seq)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("identify_token", &"<redacted>")
            .finish()
    }
}

impl GatewaySession {
    #[must_use]
    pub fn new(identify_token: impl Into<String>) -> Self {
        Self {
            state: watch::Sender::new(GatewayState::Connecting),
            seq: None,
            heartbeat_interval: None,
            identify_token: identify_token.into(),
        }
    }

    #[must_use]
    pub fn state(&self) -> GatewayState {
        *self.state.borrow()
    }

    /// Receiver that sees every later state change, starting from the current one.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<GatewayState> {
        self.state.subscribe()
    }

    /// Last dispatch sequence number seen, sent with every heartbeat.
    #[must_use]
    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    pub(crate) fn identify_token(&self) -> &str {
        &self.identify_token
    }

    pub(crate) fn transition(&mut self, next: GatewayState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            tracing::debug!(from = ?*state, to = ?next, "gateway state change");
            *state = next;
            true
        });
    }

    pub(crate) fn observe_sequence(&mut self, seq: Option<u64>) {
        if let Some(seq) = seq {
            self.seq = Some(seq);
        }
    }

    pub(crate) fn set_heartbeat_interval(&mut self, interval: Duration) {
        self.heartbeat_interval = Some(interval);
    }
}
