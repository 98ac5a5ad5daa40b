//! Single-client interactive provider loop.
//!
//! The provider runs in three phases on one thread, driven by a `mio::Poll`:
//! 1. wait for a connection on the listening server
//! 2. drive the channel handshake until it is active, then stop listening
//! 3. serve the channel: drain reads, flush writes, exchange heartbeats
//!
//! It stops when the runtime budget is spent or the shutdown flag is raised.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token};
use rwfprims_codec::{
    decode_array, ArrayEncoder, CodecError, RWF_MAJOR_VERSION, RWF_MINOR_VERSION,
};
use rwfprims_transport::RwfStream;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelInfo, InitStatus, ReadEvent, WriteStatus};
use crate::error::{Result, SessionError};
use crate::ping::{PingAction, PingMonitor};
use crate::server::{BindOptions, Server};

const LISTENER: Token = Token(0);
const CHANNEL: Token = Token(1);
const EVENTS_CAPACITY: usize = 16;
/// Array header plus the largest variable entry length prefix.
const ARRAY_OVERHEAD: usize = 8;

/// Provider settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub bind: BindOptions,
    /// How long to run before shutting down.
    pub runtime: Duration,
    /// Service name published to the consumer once the channel is active.
    pub service_name: String,
    /// Longest the loop sleeps between iterations.
    pub update_interval: Duration,
    /// Bound on the channel handshake.
    pub init_timeout: Duration,
    /// Raised by another thread (e.g. a signal handler) to stop the loop.
    pub shutdown: Arc<AtomicBool>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            bind: BindOptions::default(),
            runtime: Duration::from_secs(300),
            service_name: "DIRECT_FEED".to_string(),
            update_interval: Duration::from_secs(1),
            init_timeout: Duration::from_secs(60),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ProviderConfig {
    pub fn with_bind(mut self, bind: BindOptions) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_runtime(mut self, runtime: Duration) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Why the provider stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    RuntimeExpired,
    Interrupted,
}

/// What happened during a provider run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderSummary {
    pub reason: StopReason,
    pub connected: bool,
    pub elapsed_ms: u64,
    pub messages: u64,
    pub pings_received: u64,
    pub pings_sent: u64,
    pub arrays_decoded: u64,
    pub arrays_published: u64,
}

impl ProviderSummary {
    fn new() -> Self {
        Self {
            reason: StopReason::RuntimeExpired,
            connected: false,
            elapsed_ms: 0,
            messages: 0,
            pings_received: 0,
            pings_sent: 0,
            arrays_decoded: 0,
            arrays_published: 0,
        }
    }
}

/// A bound provider, ready to [`Provider::run`].
pub struct Provider {
    server: Server,
    config: ProviderConfig,
    poll: Poll,
}

impl Provider {
    /// Bind the listening server and register it for readable events.
    pub fn bind(config: ProviderConfig) -> Result<Self> {
        let mut server = Server::bind(config.bind.clone())?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut server, LISTENER, Interest::READABLE)?;
        Ok(Self {
            server,
            config,
            poll,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Handle for stopping the loop from another thread.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.config.shutdown)
    }

    /// Run until the runtime expires, the shutdown flag is raised, or the
    /// channel fails. `on_active` is called once the channel is active.
    pub fn run(mut self, mut on_active: impl FnMut(&ChannelInfo)) -> Result<ProviderSummary> {
        let started = Instant::now();
        let deadline = started + self.config.runtime;
        let mut summary = ProviderSummary::new();

        let outcome = self.serve(deadline, &mut summary, &mut on_active);
        self.close_server();
        summary.elapsed_ms = started.elapsed().as_millis() as u64;

        let reason = outcome?;
        summary.reason = reason;
        info!(
            ?reason,
            messages = summary.messages,
            arrays_decoded = summary.arrays_decoded,
            pings_sent = summary.pings_sent,
            pings_received = summary.pings_received,
            "provider stopped"
        );
        Ok(summary)
    }

    fn serve(
        &mut self,
        deadline: Instant,
        summary: &mut ProviderSummary,
        on_active: &mut impl FnMut(&ChannelInfo),
    ) -> Result<StopReason> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);

        let mut channel = loop {
            if let Some(channel) = self.server.accept()? {
                break channel;
            }
            if let Some(reason) = self.stop_reason(deadline) {
                return Ok(reason);
            }
            let timeout = self.poll_timeout(deadline, None);
            self.wait(&mut events, timeout)?;
        };
        summary.connected = true;

        let outcome = self.serve_channel(&mut channel, deadline, summary, on_active, &mut events);
        channel.close();
        outcome
    }

    fn serve_channel(
        &mut self,
        channel: &mut Channel<RwfStream>,
        deadline: Instant,
        summary: &mut ProviderSummary,
        on_active: &mut impl FnMut(&ChannelInfo),
        events: &mut Events,
    ) -> Result<StopReason> {
        self.poll.registry().register(
            channel.stream_mut(),
            CHANNEL,
            Interest::READABLE | Interest::WRITABLE,
        )?;

        let init_deadline = Instant::now() + self.config.init_timeout;
        loop {
            match channel.init_step()? {
                InitStatus::Active => break,
                InitStatus::InProgress { fd_changed: true } => {
                    self.poll.registry().reregister(
                        channel.stream_mut(),
                        CHANNEL,
                        Interest::READABLE | Interest::WRITABLE,
                    )?;
                }
                InitStatus::InProgress { fd_changed: false } => {}
            }
            if let Some(reason) = self.stop_reason(deadline) {
                return Ok(reason);
            }
            if Instant::now() >= init_deadline {
                return Err(SessionError::InitTimeout(self.config.init_timeout));
            }
            let timeout = self.poll_timeout(deadline, Some(init_deadline));
            self.wait(events, timeout)?;
        }

        self.close_server();
        on_active(&channel.info()?);

        let mut ping = PingMonitor::new(channel.ping_timeout(), Instant::now());
        self.publish_service(channel, summary)?;
        ping.record_sent(Instant::now());

        let mut write_armed = true;
        loop {
            loop {
                match channel.read()? {
                    ReadEvent::Message(bytes) => {
                        summary.messages += 1;
                        ping.record_received();
                        inspect_message(&bytes, channel.version(), summary);
                    }
                    ReadEvent::Ping => {
                        summary.pings_received += 1;
                        ping.record_received();
                    }
                    ReadEvent::WouldBlock => break,
                }
            }

            channel.flush()?;

            let now = Instant::now();
            match ping.tick(now) {
                Ok(PingAction::SendPing) => {
                    channel.ping()?;
                    ping.record_sent(now);
                    summary.pings_sent += 1;
                    debug!("heartbeat sent");
                }
                Ok(PingAction::Idle) => {}
                Err(err) => {
                    warn!(timeout = ?ping.timeout(), "peer silent, closing channel");
                    return Err(err);
                }
            }

            let want_write = channel.has_pending_writes();
            if want_write != write_armed {
                let interest = if want_write {
                    Interest::READABLE | Interest::WRITABLE
                } else {
                    Interest::READABLE
                };
                self.poll
                    .registry()
                    .reregister(channel.stream_mut(), CHANNEL, interest)?;
                write_armed = want_write;
            }

            if let Some(reason) = self.stop_reason(deadline) {
                return Ok(reason);
            }
            let timeout = self.poll_timeout(deadline, Some(ping.next_deadline()));
            self.wait(events, timeout)?;
        }
    }

    fn publish_service(
        &self,
        channel: &mut Channel<RwfStream>,
        summary: &mut ProviderSummary,
    ) -> Result<()> {
        let mut array = ArrayEncoder::new();
        array.add_ascii(&self.config.service_name)?;

        let mut buffer = channel.get_buffer(self.config.service_name.len() + ARRAY_OVERHEAD)?;
        if let Err(err) = array.complete(&mut buffer) {
            channel
                .release_buffer(buffer)
                .map_err(CodecError::from)?;
            return Err(err.into());
        }
        if channel.write(buffer)? == WriteStatus::Queued {
            debug!("service array queued");
        }
        summary.arrays_published += 1;
        info!(service = %self.config.service_name, "service array published");
        Ok(())
    }

    fn stop_reason(&self, deadline: Instant) -> Option<StopReason> {
        if self.config.shutdown.load(Ordering::Relaxed) {
            info!("shutdown requested");
            return Some(StopReason::Interrupted);
        }
        if Instant::now() >= deadline {
            info!(runtime = ?self.config.runtime, "runtime expired");
            return Some(StopReason::RuntimeExpired);
        }
        None
    }

    fn poll_timeout(&self, deadline: Instant, other: Option<Instant>) -> Duration {
        let now = Instant::now();
        let mut timeout = self
            .config
            .update_interval
            .min(deadline.saturating_duration_since(now));
        if let Some(other) = other {
            timeout = timeout.min(other.saturating_duration_since(now));
        }
        timeout
    }

    fn wait(&mut self, events: &mut Events, timeout: Duration) -> Result<()> {
        match self.poll.poll(events, Some(timeout)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn close_server(&mut self) {
        if self.server.is_closed() {
            return;
        }
        if let Err(err) = self.poll.registry().deregister(&mut self.server) {
            debug!(error = %err, "listener deregister failed");
        }
        self.server.close();
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("server", &self.server)
            .field("config", &self.config)
            .finish()
    }
}

/// Decode an incoming message as an array and log what it holds.
fn inspect_message(bytes: &[u8], version: Option<(u8, u8)>, summary: &mut ProviderSummary) {
    let (major, minor) = version.unwrap_or((RWF_MAJOR_VERSION, RWF_MINOR_VERSION));
    let array = match decode_array(bytes, major, minor) {
        Ok(array) => array,
        Err(err) => {
            warn!(error = %err, size = bytes.len(), "message is not a decodable array");
            return;
        }
    };

    let mut entries = 0usize;
    let mut blanks = 0usize;
    let mut faults = 0usize;
    for entry in array.entries() {
        match entry {
            Ok(entry) => {
                entries += 1;
                if entry.is_blank() {
                    blanks += 1;
                } else if entry.error().is_some() {
                    faults += 1;
                }
            }
            Err(err) => {
                warn!(error = %err, after = entries, "array entry framing failed");
                break;
            }
        }
    }

    summary.arrays_decoded += 1;
    info!(
        data_type = %array.primitive_type(),
        fixed_width = array.fixed_width(),
        entries,
        blanks,
        faults,
        "array decoded"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(build: impl FnOnce(&mut ArrayEncoder)) -> Vec<u8> {
        let mut array = ArrayEncoder::new();
        build(&mut array);
        let mut pool = rwfprims_codec::BufferPool::new(1, 1);
        let mut buffer = pool.allocate(256).expect("should allocate");
        array.complete(&mut buffer).expect("should complete");
        buffer.as_slice().to_vec()
    }

    #[test]
    fn config_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.bind.port, 14002);
        assert_eq!(config.runtime, Duration::from_secs(300));
        assert_eq!(config.service_name, "DIRECT_FEED");
        assert_eq!(config.update_interval, Duration::from_secs(1));
        assert!(!config.shutdown.load(Ordering::Relaxed));
    }

    #[test]
    fn inspect_counts_decodable_arrays_only() {
        let mut summary = ProviderSummary::new();
        let bytes = encoded(|a| {
            a.add_uint(1).unwrap();
            a.add_uint(2).unwrap();
        });
        inspect_message(&bytes, Some((14, 1)), &mut summary);
        assert_eq!(summary.arrays_decoded, 1);

        inspect_message(&[0xEE, 0, 0, 0], Some((14, 1)), &mut summary);
        inspect_message(&bytes, Some((13, 0)), &mut summary);
        assert_eq!(summary.arrays_decoded, 1);
    }

    #[test]
    fn poll_timeout_is_bounded_by_nearest_deadline() {
        let provider = Provider::bind(
            ProviderConfig::default()
                .with_bind(
                    BindOptions::default()
                        .with_interface(std::net::IpAddr::from([127, 0, 0, 1]))
                        .with_port(0),
                )
                .with_update_interval(Duration::from_secs(1)),
        )
        .expect("bind should succeed");

        let now = Instant::now();
        let timeout = provider.poll_timeout(
            now + Duration::from_secs(10),
            Some(now + Duration::from_millis(200)),
        );
        assert!(timeout <= Duration::from_millis(200));

        let timeout = provider.poll_timeout(now + Duration::from_secs(10), None);
        assert!(timeout <= Duration::from_secs(1));
        assert_eq!(
            provider.poll_timeout(now - Duration::from_millis(1), None),
            Duration::ZERO
        );
    }

    #[test]
    fn summary_serializes_reason_in_snake_case() {
        let mut summary = ProviderSummary::new();
        summary.reason = StopReason::Interrupted;
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["reason"], "interrupted");
        assert_eq!(json["connected"], false);
    }
}
