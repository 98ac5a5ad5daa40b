//! RWF channel sessions over non-blocking TCP.
//!
//! A [`Channel`] moves through `initializing -> active -> closed`. While
//! initializing, [`Channel::init_step`] advances the connect handshake one
//! non-blocking step at a time. Once active, the channel carries framed
//! messages and empty heartbeat frames that a [`PingMonitor`] schedules.
//!
//! [`Server`] and [`connect`] produce channels; [`Provider`] ties a server,
//! one channel and the heartbeat monitor into a single-threaded readiness
//! loop.

pub mod channel;
pub mod connector;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod ping;
pub mod provider;
pub mod server;

pub use channel::{
    Channel, ChannelInfo, ChannelState, FlushStatus, InitStatus, ReadEvent, Role, WriteStatus,
};
pub use connector::{connect, ConnectOptions};
pub use error::{Result, SessionError};
pub use frame::{Frame, Opcode, DEFAULT_MAX_MSG_SIZE, HEADER_SIZE};
pub use handshake::{ConnectAck, ConnectNak, ConnectRequest, Negotiated};
pub use ping::{PingAction, PingMonitor};
pub use provider::{Provider, ProviderConfig, ProviderSummary, StopReason};
pub use server::{BindOptions, Server, DEFAULT_PORT};
