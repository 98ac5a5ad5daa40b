use std::collections::VecDeque;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use rwfprims_codec::{BufferPool, CodecError, ForeignBuffer, WireBuffer};
use rwfprims_transport::TransportStream;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connector::ConnectOptions;
use crate::error::{Result, SessionError};
use crate::frame::{decode_frame, encode_frame, Frame, Opcode};
use crate::handshake::{
    accept_ack, negotiate, parse_ack, parse_nak, parse_request, ConnectNak, ConnectRequest,
    Negotiated, ServerHandshake, MAX_HANDSHAKE_PAYLOAD,
};
use crate::server::BindOptions;

const READ_CHUNK_SIZE: usize = 8 * 1024;
const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Handshake in progress; only `init_step` and `close` are allowed.
    Initializing,
    /// Ready for reads, writes and heartbeats.
    Active,
    /// Terminal.
    Closed,
}

impl ChannelState {
    pub fn is_operational(&self) -> bool {
        matches!(self, ChannelState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Closed)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Initializing => write!(f, "initializing"),
            ChannelState::Active => write!(f, "active"),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

/// Which end of the connection this channel is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

/// Progress reported by [`Channel::init_step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    /// Call again after the next readiness event. When `fd_changed` is set
    /// the caller must re-register the stream with its poller.
    InProgress { fd_changed: bool },
    Active,
}

/// Outcome of one [`Channel::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// A complete application message.
    Message(Bytes),
    /// A heartbeat from the peer.
    Ping,
    /// Nothing more to read until the next readable event.
    WouldBlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Everything queued reached the socket.
    Sent,
    /// Bytes remain queued; call [`Channel::flush`] when writable.
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    Complete,
    Pending,
}

/// Negotiated channel parameters, as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    pub role: Role,
    pub peer_addr: Option<SocketAddr>,
    pub peer_component: String,
    pub ping_timeout_secs: u64,
    pub major_version: u8,
    pub minor_version: u8,
    pub max_msg_size: usize,
    pub guaranteed_output_buffers: usize,
    pub max_output_buffers: usize,
    pub compression: String,
}

#[derive(Debug)]
enum InitPhase {
    AwaitRequest(ServerHandshake),
    FlushAck,
    AwaitAck(ConnectRequest),
    Done,
}

/// One RWF session over a non-blocking stream.
///
/// A server channel starts waiting for the client's connect request; a client
/// channel starts with its request queued. Both become [`ChannelState::Active`]
/// through repeated [`Channel::init_step`] calls. Any fatal error moves the
/// channel to [`ChannelState::Closed`].
pub struct Channel<S> {
    stream: S,
    role: Role,
    state: ChannelState,
    phase: InitPhase,
    read_buf: BytesMut,
    read_limit: usize,
    send_queue: VecDeque<Bytes>,
    pool: BufferPool,
    negotiated: Option<Negotiated>,
}

impl<S: TransportStream> Channel<S> {
    /// Server end of a freshly accepted connection.
    pub fn server(stream: S, options: &BindOptions) -> Self {
        Self::new(
            stream,
            Role::Server,
            InitPhase::AwaitRequest(options.handshake()),
            BufferPool::new(
                options.guaranteed_output_buffers,
                options.max_output_buffers,
            ),
        )
    }

    /// Client end of a freshly connected stream; queues the connect request.
    pub fn client(stream: S, options: &ConnectOptions) -> Result<Self> {
        let request = ConnectRequest::new(
            options.major_version,
            options.minor_version,
            options.ping_timeout,
            &options.component,
        );
        let payload = serde_json::to_vec(&request)?;
        let mut channel = Self::new(
            stream,
            Role::Client,
            InitPhase::AwaitAck(request),
            BufferPool::new(
                options.guaranteed_output_buffers,
                options.max_output_buffers,
            ),
        );
        channel.enqueue(Opcode::ConnectRequest, &payload)?;
        Ok(channel)
    }

    fn new(stream: S, role: Role, phase: InitPhase, pool: BufferPool) -> Self {
        Self {
            stream,
            role,
            state: ChannelState::Initializing,
            phase,
            read_buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            read_limit: MAX_HANDSHAKE_PAYLOAD,
            send_queue: VecDeque::new(),
            pool,
            negotiated: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Negotiated ping timeout; zero until the channel is active.
    pub fn ping_timeout(&self) -> Duration {
        self.negotiated
            .as_ref()
            .map_or(Duration::ZERO, |n| n.ping_timeout)
    }

    /// Negotiated `(major, minor)` wire-format version.
    pub fn version(&self) -> Option<(u8, u8)> {
        self.negotiated
            .as_ref()
            .map(|n| (n.major_version, n.minor_version))
    }

    /// Borrow the stream, e.g. to register it with a poller.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.send_queue.is_empty()
    }

    /// Advance the handshake by whatever the socket allows right now.
    pub fn init_step(&mut self) -> Result<InitStatus> {
        match self.state {
            ChannelState::Active => return Ok(InitStatus::Active),
            ChannelState::Closed => return Err(self.invalid_state("initialize")),
            ChannelState::Initializing => {}
        }
        let result = self.drive_init();
        self.check(result)
    }

    /// Read the next message or heartbeat.
    ///
    /// End of stream is fatal and closes the channel.
    pub fn read(&mut self) -> Result<ReadEvent> {
        self.require_active("read")?;
        let result = self.read_event();
        self.check(result)
    }

    /// Queue an encoded message and try to send it.
    ///
    /// The buffer goes back to the channel's pool whether or not the write
    /// succeeds. A buffer from another pool is refused before anything is
    /// sent.
    pub fn write(&mut self, buffer: WireBuffer) -> Result<WriteStatus> {
        if !self.pool.owns(&buffer) {
            return Err(CodecError::ForeignBuffer.into());
        }
        let result = self.write_buffer(&buffer);
        let result = self.check(result);
        self.pool.release(buffer).map_err(CodecError::from)?;
        result
    }

    /// Queue a heartbeat and try to send it.
    pub fn ping(&mut self) -> Result<WriteStatus> {
        self.require_active("ping")?;
        let result = self
            .enqueue(Opcode::Data, &[])
            .and_then(|()| self.flush_queue())
            .map(write_status);
        self.check(result)
    }

    /// Push queued bytes to the socket.
    pub fn flush(&mut self) -> Result<FlushStatus> {
        if self.state.is_terminal() {
            return Err(self.invalid_state("flush"));
        }
        let result = self.flush_queue();
        self.check(result)
    }

    /// Shut down the stream and drop anything queued. Idempotent.
    pub fn close(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Err(err) = self.stream.shutdown() {
            if err.kind() != ErrorKind::NotConnected {
                debug!(error = %err, "stream shutdown failed");
            }
        }
        self.send_queue.clear();
        self.read_buf.clear();
        self.state = ChannelState::Closed;
        self.phase = InitPhase::Done;
        info!(role = ?self.role, peer = ?self.stream.peer_addr(), "channel closed");
    }

    /// Take a buffer from the channel's output pool.
    pub fn get_buffer(&mut self, size: usize) -> Result<WireBuffer> {
        if self.state.is_terminal() {
            return Err(self.invalid_state("allocate a buffer"));
        }
        Ok(self.pool.allocate(size)?)
    }

    /// Return an unused buffer to the pool. A buffer from another pool is
    /// handed back in the error.
    pub fn release_buffer(&mut self, buffer: WireBuffer) -> std::result::Result<(), ForeignBuffer> {
        self.pool.release(buffer)
    }

    pub fn info(&self) -> Result<ChannelInfo> {
        let negotiated = self
            .negotiated
            .as_ref()
            .ok_or_else(|| self.invalid_state("report channel info"))?;
        Ok(ChannelInfo {
            role: self.role,
            peer_addr: self.stream.peer_addr(),
            peer_component: negotiated.peer_component.clone(),
            ping_timeout_secs: negotiated.ping_timeout.as_secs(),
            major_version: negotiated.major_version,
            minor_version: negotiated.minor_version,
            max_msg_size: negotiated.max_msg_size,
            guaranteed_output_buffers: self.pool.guaranteed(),
            max_output_buffers: self.pool.max(),
            compression: "none".to_string(),
        })
    }

    fn drive_init(&mut self) -> Result<InitStatus> {
        if self.flush_queue()? == FlushStatus::Pending {
            return Ok(InitStatus::InProgress { fd_changed: false });
        }

        match std::mem::replace(&mut self.phase, InitPhase::Done) {
            InitPhase::AwaitRequest(server) => match self.next_frame()? {
                Some(frame) if frame.opcode == Opcode::ConnectRequest => {
                    let request = parse_request(&frame.payload)?;
                    self.answer_request(&request, &server)?;
                }
                Some(frame) => {
                    return Err(SessionError::HandshakeFailed(format!(
                        "expected connect request, got {:?}",
                        frame.opcode
                    )))
                }
                None => self.phase = InitPhase::AwaitRequest(server),
            },
            InitPhase::FlushAck => {}
            InitPhase::AwaitAck(request) => match self.next_frame()? {
                Some(frame) if frame.opcode == Opcode::ConnectAck => {
                    let ack = parse_ack(&frame.payload)?;
                    let negotiated = accept_ack(&request, ack)?;
                    self.activate(negotiated);
                    return Ok(InitStatus::Active);
                }
                Some(frame) if frame.opcode == Opcode::ConnectNak => {
                    let nak = parse_nak(&frame.payload)?;
                    return Err(SessionError::HandshakeRejected(nak.text));
                }
                Some(frame) => {
                    return Err(SessionError::HandshakeFailed(format!(
                        "expected connect ack, got {:?}",
                        frame.opcode
                    )))
                }
                None => self.phase = InitPhase::AwaitAck(request),
            },
            InitPhase::Done => {}
        }

        if matches!(self.phase, InitPhase::FlushAck) && self.send_queue.is_empty() {
            self.phase = InitPhase::Done;
            if let Some(negotiated) = self.negotiated.take() {
                self.activate(negotiated);
                return Ok(InitStatus::Active);
            }
        }
        Ok(InitStatus::InProgress { fd_changed: false })
    }

    fn answer_request(&mut self, request: &ConnectRequest, server: &ServerHandshake) -> Result<()> {
        match negotiate(request, server) {
            Ok((ack, negotiated)) => {
                debug!(
                    component = %request.component,
                    ping_timeout = ack.ping_timeout,
                    "accepting connect request"
                );
                let payload = serde_json::to_vec(&ack)?;
                self.enqueue(Opcode::ConnectAck, &payload)?;
                self.negotiated = Some(negotiated);
                self.phase = InitPhase::FlushAck;
                self.flush_queue()?;
                Ok(())
            }
            Err(reason) => {
                warn!(%reason, component = %request.component, "refusing connect request");
                let payload = serde_json::to_vec(&ConnectNak {
                    text: reason.clone(),
                })?;
                self.enqueue(Opcode::ConnectNak, &payload)?;
                if let Err(err) = self.flush_queue() {
                    debug!(error = %err, "could not deliver connect nak");
                }
                Err(SessionError::HandshakeRejected(reason))
            }
        }
    }

    fn activate(&mut self, negotiated: Negotiated) {
        info!(
            role = ?self.role,
            peer = ?self.stream.peer_addr(),
            major = negotiated.major_version,
            minor = negotiated.minor_version,
            ping_timeout_secs = negotiated.ping_timeout.as_secs(),
            "channel active"
        );
        self.read_limit = negotiated.max_msg_size;
        self.negotiated = Some(negotiated);
        self.state = ChannelState::Active;
    }

    fn read_event(&mut self) -> Result<ReadEvent> {
        match self.next_frame()? {
            None => Ok(ReadEvent::WouldBlock),
            Some(frame) if frame.is_ping() => {
                debug!("heartbeat received");
                Ok(ReadEvent::Ping)
            }
            Some(frame) if frame.opcode == Opcode::Data => {
                debug!(size = frame.payload.len(), "data message received");
                Ok(ReadEvent::Message(frame.payload))
            }
            Some(frame) => Err(SessionError::InvalidFrame(format!(
                "unexpected {:?} on an active channel",
                frame.opcode
            ))),
        }
    }

    fn write_buffer(&mut self, buffer: &WireBuffer) -> Result<WriteStatus> {
        self.require_active("write")?;
        if buffer.len() > self.read_limit {
            return Err(SessionError::MessageTooLarge {
                size: buffer.len(),
                max: self.read_limit,
            });
        }
        if buffer.is_empty() {
            return Err(SessionError::InvalidFrame(
                "empty messages are reserved for heartbeats".to_string(),
            ));
        }
        self.enqueue(Opcode::Data, buffer.as_slice())?;
        self.flush_queue().map(write_status)
    }

    /// Decode one buffered frame, reading from the socket until one is
    /// complete or the socket would block.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = decode_frame(&mut self.read_buf, self.read_limit)? {
                return Ok(Some(frame));
            }
            if !self.fill_read_buf()? {
                return Ok(None);
            }
        }
    }

    fn fill_read_buf(&mut self) -> Result<bool> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(SessionError::Disconnected(
                        "connection closed by peer".to_string(),
                    ))
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    return Ok(true);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(err) => return Err(SessionError::Io(err)),
            }
        }
    }

    fn enqueue(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let mut buf = BytesMut::new();
        encode_frame(opcode, payload, &mut buf)?;
        self.send_queue.push_back(buf.freeze());
        Ok(())
    }

    fn flush_queue(&mut self) -> Result<FlushStatus> {
        while let Some(front) = self.send_queue.front_mut() {
            match self.stream.write(&front[..]) {
                Ok(0) => {
                    return Err(SessionError::Disconnected(
                        "stream accepted zero bytes".to_string(),
                    ))
                }
                Ok(n) => {
                    front.advance(n);
                    if front.is_empty() {
                        self.send_queue.pop_front();
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    debug!(queued = self.send_queue.len(), "flush pending");
                    return Ok(FlushStatus::Pending);
                }
                Err(err) => return Err(SessionError::Io(err)),
            }
        }
        Ok(FlushStatus::Complete)
    }

    fn require_active(&self, operation: &'static str) -> Result<()> {
        if self.state.is_operational() {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state,
        }
    }

    /// Close the channel when `result` carries a fatal error.
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() && !self.state.is_terminal() {
                warn!(error = %err, role = ?self.role, "channel failed");
                self.close();
            }
        }
        result
    }
}

fn write_status(status: FlushStatus) -> WriteStatus {
    match status {
        FlushStatus::Complete => WriteStatus::Sent,
        FlushStatus::Pending => WriteStatus::Queued,
    }
}

impl<S: TransportStream> fmt::Debug for Channel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("peer", &self.stream.peer_addr())
            .field("queued", &self.send_queue.len())
            .finish()
    }
}
