use std::time::{Duration, Instant};

use crate::error::{Result, SessionError};

/// What the event loop should do after a [`PingMonitor::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingAction {
    Idle,
    /// Send a heartbeat to the peer now.
    SendPing,
}

/// Heartbeat bookkeeping for one active channel.
///
/// A heartbeat goes out every third of the negotiated timeout. The peer must
/// be heard from (any message or heartbeat) at least once per full timeout.
/// All methods take the current time so the monitor is deterministic.
#[derive(Debug, Clone)]
pub struct PingMonitor {
    timeout: Duration,
    send_interval: Duration,
    next_send: Instant,
    next_receive: Instant,
    received: bool,
}

impl PingMonitor {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        let send_interval = timeout / 3;
        Self {
            timeout,
            send_interval,
            next_send: now + send_interval,
            next_receive: now + timeout,
            received: false,
        }
    }

    /// Note that something arrived from the peer.
    pub fn record_received(&mut self) {
        self.received = true;
    }

    /// Note that something was sent to the peer; postpones the next heartbeat.
    pub fn record_sent(&mut self, now: Instant) {
        self.next_send = now + self.send_interval;
    }

    /// Check both deadlines.
    ///
    /// Fails with [`SessionError::PeerSilent`] when the receive deadline
    /// passes without traffic from the peer.
    pub fn tick(&mut self, now: Instant) -> Result<PingAction> {
        let mut action = PingAction::Idle;
        if now >= self.next_send {
            action = PingAction::SendPing;
            self.next_send = now + self.send_interval;
        }

        if now >= self.next_receive {
            if !self.received {
                return Err(SessionError::PeerSilent(self.timeout));
            }
            self.received = false;
            self.next_receive = now + self.timeout;
        }

        Ok(action)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn next_send_deadline(&self) -> Instant {
        self.next_send
    }

    pub fn next_receive_deadline(&self) -> Instant {
        self.next_receive
    }

    /// The earlier of the two deadlines.
    pub fn next_deadline(&self) -> Instant {
        self.next_send.min(self.next_receive)
    }
}
