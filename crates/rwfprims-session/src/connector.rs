use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token};
use rwfprims_codec::{RWF_MAJOR_VERSION, RWF_MINOR_VERSION};
use rwfprims_transport::RwfStream;
use tracing::debug;

use crate::channel::{Channel, InitStatus};
use crate::error::{Result, SessionError};

const CHANNEL: Token = Token(0);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Client-side connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Ping timeout requested from the server.
    pub ping_timeout: Duration,
    pub major_version: u8,
    pub minor_version: u8,
    pub component: String,
    /// Bound on TCP connect plus handshake.
    pub timeout: Duration,
    pub guaranteed_output_buffers: usize,
    pub max_output_buffers: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_secs(60),
            major_version: RWF_MAJOR_VERSION,
            minor_version: RWF_MINOR_VERSION,
            component: concat!("rwfprims-", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(5),
            guaranteed_output_buffers: 50,
            max_output_buffers: 100,
        }
    }
}

impl ConnectOptions {
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_version(mut self, major: u8, minor: u8) -> Self {
        self.major_version = major;
        self.minor_version = minor;
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_buffers(mut self, guaranteed: usize, max: usize) -> Self {
        self.guaranteed_output_buffers = guaranteed;
        self.max_output_buffers = max;
        self
    }
}

/// Connect to an RWF server and complete the handshake.
///
/// Returns an active channel whose stream is no longer registered with any
/// poller.
pub fn connect(addr: SocketAddr, options: &ConnectOptions) -> Result<Channel<RwfStream>> {
    let deadline = Instant::now() + options.timeout;
    let stream = RwfStream::connect(addr, options.timeout)?;
    let mut channel = Channel::client(stream, options)?;

    let mut poll = Poll::new()?;
    poll.registry().register(
        channel.stream_mut(),
        CHANNEL,
        Interest::READABLE | Interest::WRITABLE,
    )?;
    let mut events = Events::with_capacity(8);

    loop {
        match channel.init_step()? {
            InitStatus::Active => break,
            InitStatus::InProgress { fd_changed: true } => {
                poll.registry().reregister(
                    channel.stream_mut(),
                    CHANNEL,
                    Interest::READABLE | Interest::WRITABLE,
                )?;
            }
            InitStatus::InProgress { fd_changed: false } => {}
        }

        let now = Instant::now();
        if now >= deadline {
            channel.close();
            return Err(SessionError::InitTimeout(options.timeout));
        }
        match poll.poll(&mut events, Some((deadline - now).min(POLL_INTERVAL))) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                channel.close();
                return Err(err.into());
            }
        }
    }

    poll.registry().deregister(channel.stream_mut())?;
    debug!(%addr, "client channel ready");
    Ok(channel)
}
