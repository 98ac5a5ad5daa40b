use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr};

/// A connected byte stream a channel can run over.
///
/// Reads and writes are expected to be non-blocking: `WouldBlock` is the
/// normal "try again after the next readiness event" signal, not an error.
pub trait TransportStream: Read + Write {
    /// Shut down both halves of the stream.
    fn shutdown(&mut self) -> std::io::Result<()>;

    /// Address of the remote end, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl TransportStream for std::net::TcpStream {
    fn shutdown(&mut self) -> std::io::Result<()> {
        std::net::TcpStream::shutdown(self, Shutdown::Both)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        std::net::TcpStream::peer_addr(self).ok()
    }
}

#[cfg(unix)]
impl TransportStream for std::os::unix::net::UnixStream {
    fn shutdown(&mut self) -> std::io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}
