//! Connection handshake messages and negotiation.
//!
//! The client opens with a [`ConnectRequest`]; the server answers with a
//! [`ConnectAck`] carrying the negotiated parameters or a [`ConnectNak`]
//! explaining the refusal. Messages travel as JSON payloads in their own
//! frame opcodes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Protocol name carried in every connect request.
pub const PROTOCOL_RWF: &str = "rwf";

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_COMPONENT_LEN: usize = 128;

/// Upper bound on a handshake frame payload.
pub const MAX_HANDSHAKE_PAYLOAD: usize = 1024;

/// Client connect request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectRequest {
    pub protocol: String,
    pub major_version: u8,
    pub minor_version: u8,
    /// Requested ping timeout in seconds.
    pub ping_timeout: u8,
    pub component: String,
}

/// Server acceptance with the negotiated parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectAck {
    pub major_version: u8,
    pub minor_version: u8,
    /// Negotiated ping timeout in seconds.
    pub ping_timeout: u8,
    pub max_msg_size: u16,
    pub component: String,
}

/// Server refusal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectNak {
    pub text: String,
}

/// What a server is willing to accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    pub major_version: u8,
    pub minor_version: u8,
    pub ping_timeout: u8,
    pub min_ping_timeout: u8,
    pub max_msg_size: u16,
    pub component: String,
}

/// Parameters both ends agreed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub major_version: u8,
    pub minor_version: u8,
    pub ping_timeout: Duration,
    pub max_msg_size: usize,
    /// Component name reported by the peer.
    pub peer_component: String,
}

impl ConnectRequest {
    pub fn new(major_version: u8, minor_version: u8, ping_timeout: Duration, component: &str) -> Self {
        Self {
            protocol: PROTOCOL_RWF.to_string(),
            major_version,
            minor_version,
            ping_timeout: timeout_secs(ping_timeout),
            component: component.to_string(),
        }
    }
}

/// Convert a timeout to whole seconds within the wire range `1..=255`.
pub fn timeout_secs(timeout: Duration) -> u8 {
    timeout.as_secs().clamp(1, u64::from(u8::MAX)) as u8
}

/// Server side: accept or refuse a request.
///
/// The minor version settles on the lower of the two; the ping timeout on the
/// lower of the two, raised to the server's minimum.
pub fn negotiate(
    request: &ConnectRequest,
    server: &ServerHandshake,
) -> std::result::Result<(ConnectAck, Negotiated), String> {
    if request.protocol != PROTOCOL_RWF {
        return Err(format!(
            "unknown protocol '{}' (expected '{PROTOCOL_RWF}')",
            request.protocol
        ));
    }
    if request.major_version != server.major_version {
        return Err(format!(
            "incompatible major version {} (server {})",
            request.major_version, server.major_version
        ));
    }
    if request.ping_timeout == 0 {
        return Err("ping timeout must be non-zero".to_string());
    }

    let minor_version = request.minor_version.min(server.minor_version);
    let ping_timeout = request
        .ping_timeout
        .min(server.ping_timeout)
        .max(server.min_ping_timeout);

    let ack = ConnectAck {
        major_version: server.major_version,
        minor_version,
        ping_timeout,
        max_msg_size: server.max_msg_size,
        component: server.component.clone(),
    };
    let negotiated = Negotiated {
        major_version: server.major_version,
        minor_version,
        ping_timeout: Duration::from_secs(u64::from(ping_timeout)),
        max_msg_size: usize::from(server.max_msg_size),
        peer_component: request.component.clone(),
    };
    Ok((ack, negotiated))
}

/// Client side: check the server's answer against what was asked.
pub fn accept_ack(request: &ConnectRequest, ack: ConnectAck) -> Result<Negotiated> {
    validate_component(&ack.component)?;
    if ack.major_version != request.major_version {
        return Err(SessionError::HandshakeFailed(format!(
            "server answered with major version {} (requested {})",
            ack.major_version, request.major_version
        )));
    }
    if ack.minor_version > request.minor_version {
        return Err(SessionError::HandshakeFailed(format!(
            "server raised minor version to {} (requested {})",
            ack.minor_version, request.minor_version
        )));
    }
    if ack.ping_timeout == 0 {
        return Err(SessionError::HandshakeFailed(
            "server negotiated a zero ping timeout".to_string(),
        ));
    }
    if ack.max_msg_size == 0 {
        return Err(SessionError::HandshakeFailed(
            "server negotiated a zero maximum message size".to_string(),
        ));
    }

    Ok(Negotiated {
        major_version: ack.major_version,
        minor_version: ack.minor_version,
        ping_timeout: Duration::from_secs(u64::from(ack.ping_timeout)),
        max_msg_size: usize::from(ack.max_msg_size),
        peer_component: ack.component,
    })
}

/// Parse and bound-check a request payload.
pub fn parse_request(payload: &[u8]) -> Result<ConnectRequest> {
    check_payload_len(payload)?;
    let request: ConnectRequest = serde_json::from_slice(payload)?;
    validate_protocol_name(&request.protocol)?;
    validate_component(&request.component)?;
    Ok(request)
}

pub fn parse_ack(payload: &[u8]) -> Result<ConnectAck> {
    check_payload_len(payload)?;
    Ok(serde_json::from_slice(payload)?)
}

pub fn parse_nak(payload: &[u8]) -> Result<ConnectNak> {
    check_payload_len(payload)?;
    Ok(serde_json::from_slice(payload)?)
}

fn check_payload_len(payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_HANDSHAKE_PAYLOAD {
        return Err(SessionError::HandshakeFailed(format!(
            "handshake payload too large: {} (max {MAX_HANDSHAKE_PAYLOAD})",
            payload.len()
        )));
    }
    Ok(())
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(SessionError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

pub(crate) fn validate_component(component: &str) -> Result<()> {
    if component.len() > MAX_COMPONENT_LEN {
        return Err(SessionError::HandshakeFailed(format!(
            "component name too long: {} (max {MAX_COMPONENT_LEN})",
            component.len()
        )));
    }
    if component.chars().any(char::is_control) {
        return Err(SessionError::HandshakeFailed(
            "component name contains control characters".to_string(),
        ));
    }
    Ok(())
}
