use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use mio::event::Source;
use mio::{Interest, Registry, Token};
use rwfprims_codec::{RWF_MAJOR_VERSION, RWF_MINOR_VERSION};
use rwfprims_transport::{RwfStream, TcpTransport, TransportStream};
use tracing::info;

use crate::channel::{Channel, ChannelState};
use crate::error::{Result, SessionError};
use crate::frame::{DEFAULT_MAX_MSG_SIZE, MAX_PAYLOAD};
use crate::handshake::{timeout_secs, ServerHandshake};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 14002;

/// Listener and per-channel settings for a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOptions {
    pub interface: IpAddr,
    pub port: u16,
    /// Ping timeout offered to clients.
    pub ping_timeout: Duration,
    /// Floor applied to any negotiated ping timeout.
    pub min_ping_timeout: Duration,
    pub guaranteed_output_buffers: usize,
    pub max_output_buffers: usize,
    pub max_msg_size: usize,
    pub major_version: u8,
    pub minor_version: u8,
    pub component: String,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            interface: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            ping_timeout: Duration::from_secs(60),
            min_ping_timeout: Duration::from_secs(30),
            guaranteed_output_buffers: 1000,
            max_output_buffers: 2000,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            major_version: RWF_MAJOR_VERSION,
            minor_version: RWF_MINOR_VERSION,
            component: concat!("rwfprims-", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl BindOptions {
    pub fn with_interface(mut self, interface: IpAddr) -> Self {
        self.interface = interface;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_min_ping_timeout(mut self, timeout: Duration) -> Self {
        self.min_ping_timeout = timeout;
        self
    }

    pub fn with_output_buffers(mut self, guaranteed: usize, max: usize) -> Self {
        self.guaranteed_output_buffers = guaranteed;
        self.max_output_buffers = max;
        self
    }

    pub fn with_max_msg_size(mut self, max_msg_size: usize) -> Self {
        self.max_msg_size = max_msg_size;
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = component.into();
        self
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.interface, self.port)
    }

    pub(crate) fn handshake(&self) -> ServerHandshake {
        ServerHandshake {
            major_version: self.major_version,
            minor_version: self.minor_version,
            ping_timeout: timeout_secs(self.ping_timeout),
            min_ping_timeout: timeout_secs(self.min_ping_timeout),
            max_msg_size: self.max_msg_size.min(MAX_PAYLOAD) as u16,
            component: self.component.clone(),
        }
    }
}

/// A listening RWF server.
///
/// Register it with a `mio::Poll` for readable events and call
/// [`Server::accept`] when it fires. Each accepted connection becomes an
/// initializing server [`Channel`].
pub struct Server {
    transport: Option<TcpTransport>,
    local_addr: SocketAddr,
    options: BindOptions,
}

impl Server {
    pub fn bind(options: BindOptions) -> Result<Self> {
        crate::handshake::validate_component(&options.component)?;
        let transport = TcpTransport::bind_addr(options.addr())?;
        let local_addr = transport.local_addr();
        info!(%local_addr, "server bound");
        Ok(Self {
            transport: Some(transport),
            local_addr,
            options,
        })
    }

    /// Accept one pending connection, if any.
    pub fn accept(&self) -> Result<Option<Channel<RwfStream>>> {
        let transport = self.transport.as_ref().ok_or(SessionError::InvalidState {
            operation: "accept",
            state: ChannelState::Closed,
        })?;
        Ok(transport.accept()?.map(|stream| {
            info!(peer = ?stream.peer_addr(), "connection accepted");
            Channel::server(stream, &self.options)
        }))
    }

    /// Stop listening. Idempotent.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!(local_addr = %self.local_addr, "server closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn options(&self) -> &BindOptions {
        &self.options
    }

    fn transport_mut(&mut self) -> std::io::Result<&mut TcpTransport> {
        self.transport
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected))
    }
}

impl Source for Server {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> std::io::Result<()> {
        self.transport_mut()?.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> std::io::Result<()> {
        self.transport_mut()?.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> std::io::Result<()> {
        self.transport_mut()?.deregister(registry)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_provider_conventions() {
        let options = BindOptions::default();
        assert_eq!(options.port, 14002);
        assert_eq!(options.ping_timeout, Duration::from_secs(60));
        assert_eq!(options.min_ping_timeout, Duration::from_secs(30));
        assert_eq!(options.guaranteed_output_buffers, 1000);
        assert_eq!(options.max_output_buffers, 2000);
        assert_eq!(options.max_msg_size, 6144);
        assert_eq!((options.major_version, options.minor_version), (14, 1));
    }

    #[test]
    fn handshake_reflects_options() {
        let handshake = BindOptions::default()
            .with_ping_timeout(Duration::from_secs(90))
            .with_min_ping_timeout(Duration::from_secs(10))
            .with_component("feed")
            .handshake();
        assert_eq!(handshake.ping_timeout, 90);
        assert_eq!(handshake.min_ping_timeout, 10);
        assert_eq!(handshake.component, "feed");
    }

    #[test]
    fn close_is_idempotent_and_blocks_accept() {
        let mut server = Server::bind(
            BindOptions::default()
                .with_interface(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .with_port(0),
        )
        .expect("bind should succeed");
        assert_ne!(server.local_addr().port(), 0);
        assert!(server.accept().expect("accept should not fail").is_none());

        server.close();
        server.close();
        assert!(server.is_closed());
        assert!(matches!(
            server.accept(),
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[test]
    fn bind_conflict_is_transport_error() {
        let first = Server::bind(
            BindOptions::default()
                .with_interface(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .with_port(0),
        )
        .expect("bind should succeed");
        let err = Server::bind(
            BindOptions::default()
                .with_interface(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .with_port(first.local_addr().port()),
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
    }
}
