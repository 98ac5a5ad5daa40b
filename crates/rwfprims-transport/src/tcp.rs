use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr};
use std::time::Duration;

use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::TransportStream;

/// Listening TCP socket for RWF channels.
///
/// The listener is non-blocking; register it with a `mio::Poll` and call
/// [`TcpTransport::accept`] on readable events.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind on all IPv4 interfaces at `port`. Port 0 picks a free port.
    pub fn bind(port: u16) -> Result<Self> {
        Self::bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
    }

    /// Bind on an explicit address.
    pub fn bind_addr(addr: SocketAddr) -> Result<Self> {
        let listener =
            TcpListener::bind(addr).map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        info!(%local_addr, "listening for rwf connections");

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept one pending connection.
    ///
    /// Returns `Ok(None)` when no connection is waiting.
    pub fn accept(&self) -> Result<Option<RwfStream>> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nodelay(true)?;
                    debug!(%peer, "accepted connection");
                    return Ok(Some(RwfStream::from_mio(stream, peer)));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Source for TcpTransport {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> std::io::Result<()> {
        self.listener.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> std::io::Result<()> {
        self.listener.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> std::io::Result<()> {
        self.listener.deregister(registry)
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// A connected, non-blocking TCP stream.
pub struct RwfStream {
    inner: TcpStream,
    peer: SocketAddr,
}

impl RwfStream {
    fn from_mio(inner: TcpStream, peer: SocketAddr) -> Self {
        Self { inner, peer }
    }

    /// Connect to `addr`, blocking for at most `timeout`, then switch the
    /// socket to non-blocking mode.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = std::net::TcpStream::connect_timeout(&addr, timeout)
            .map_err(|source| TransportError::Connect { addr, source })?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        debug!(%addr, "connected");
        Ok(Self::from_mio(TcpStream::from_std(stream), addr))
    }

    /// Local address of this end of the stream.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(Into::into)
    }
}

impl Read for RwfStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for RwfStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl TransportStream for RwfStream {
    fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown(Shutdown::Both)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer)
    }
}

impl Source for RwfStream {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> std::io::Result<()> {
        self.inner.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> std::io::Result<()> {
        self.inner.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> std::io::Result<()> {
        self.inner.deregister(registry)
    }
}

impl std::fmt::Debug for RwfStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwfStream").field("peer", &self.peer).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use mio::{Events, Poll};

    use super::*;

    fn loopback_listener() -> TcpTransport {
        TcpTransport::bind_addr(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .expect("loopback bind should succeed")
    }

    fn accept_within(listener: &TcpTransport, timeout: Duration) -> RwfStream {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(stream) = listener.accept().expect("accept should not fail") {
                return stream;
            }
            assert!(Instant::now() < deadline, "no connection accepted in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn bind_port_zero_reports_assigned_port() {
        let listener = loopback_listener();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[test]
    fn accept_without_pending_connection_returns_none() {
        let listener = loopback_listener();
        assert!(listener.accept().expect("accept should not fail").is_none());
    }

    #[test]
    fn bind_conflict_reports_address() {
        let first = loopback_listener();
        let err = TcpTransport::bind_addr(first.local_addr()).unwrap_err();
        match err {
            TransportError::Bind { addr, .. } => assert_eq!(addr, first.local_addr()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn connect_refused_reports_connect_error() {
        let addr = {
            let listener = loopback_listener();
            listener.local_addr()
        };
        let err = RwfStream::connect(addr, Duration::from_millis(500)).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[test]
    fn accepted_stream_exchanges_bytes() {
        let listener = loopback_listener();
        let mut client = RwfStream::connect(listener.local_addr(), Duration::from_secs(1))
            .expect("connect should succeed");
        let mut server = accept_within(&listener, Duration::from_secs(2));

        assert_eq!(server.peer_addr(), client.local_addr().ok());

        client.write_all(b"rwf").expect("write should succeed");

        let mut buf = [0u8; 3];
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut filled = 0;
        while filled < buf.len() {
            match server.read(&mut buf[filled..]) {
                Ok(0) => panic!("unexpected eof"),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    assert!(Instant::now() < deadline, "read timed out");
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(err) => panic!("read failed: {err}"),
            }
        }
        assert_eq!(&buf, b"rwf");
    }

    #[test]
    fn listener_readiness_is_reported_by_poll() {
        let mut listener = loopback_listener();
        let mut poll = Poll::new().expect("poll should be creatable");
        poll.registry()
            .register(&mut listener, Token(0), Interest::READABLE)
            .expect("register should succeed");

        let _client = RwfStream::connect(listener.local_addr(), Duration::from_secs(1))
            .expect("connect should succeed");

        let mut events = Events::with_capacity(8);
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut ready = false;
        while !ready && Instant::now() < deadline {
            poll.poll(&mut events, Some(Duration::from_millis(100)))
                .expect("poll should succeed");
            ready = events
                .iter()
                .any(|event| event.token() == Token(0) && event.is_readable());
        }
        assert!(ready, "listener never became readable");
        assert!(listener.accept().expect("accept should succeed").is_some());
    }

    #[test]
    fn shutdown_is_observed_as_eof_by_peer() {
        let listener = loopback_listener();
        let mut client = RwfStream::connect(listener.local_addr(), Duration::from_secs(1))
            .expect("connect should succeed");
        let mut server = accept_within(&listener, Duration::from_secs(2));

        TransportStream::shutdown(&mut server).expect("shutdown should succeed");

        let mut buf = [0u8; 8];
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match client.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => panic!("unexpected data"),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    assert!(Instant::now() < deadline, "eof never observed");
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(err) => panic!("read failed: {err}"),
            }
        }
    }
}
