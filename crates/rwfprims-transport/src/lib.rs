//! Non-blocking TCP transport for RWF channels.
//!
//! This is the lowest layer of rwfprims. It owns the OS sockets and exposes
//! them as `mio` event sources so a single readiness loop can drive a
//! listener and its accepted channel:
//! - [`TcpTransport`] binds a listening socket and accepts connections
//! - [`RwfStream`] is one connected, non-blocking stream
//! - [`TransportStream`] is the seam the session layer is generic over

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{RwfStream, TcpTransport};
pub use traits::TransportStream;
