//! RWF array codec and interactive-provider channel sessions.
//!
//! # Crate Structure
//!
//! - [`transport`]: non-blocking TCP listener and stream over `mio`
//! - [`codec`]: OmmArray encoder, decoder and lazy entry cursor
//! - [`session`]: channel handshake, heartbeats and the provider loop

/// Re-export transport types.
pub mod transport {
    pub use rwfprims_transport::*;
}

/// Re-export codec types.
pub mod codec {
    pub use rwfprims_codec::*;
}

/// Re-export session types.
pub mod session {
    pub use rwfprims_session::*;
}
