//! Source RCON packet codec, as spoken by Minecraft servers.
//!
//! Layout (all integers little-endian `i32`):
//! `length | request_id | kind | body bytes | 0x00 | 0x00`, where `length`
//! counts everything after itself.

use thiserror::Error;

pub const PACKET_LOGIN: i32 = 3;
pub const PACKET_COMMAND: i32 = 2;
pub const PACKET_LOGIN_RESPONSE: i32 = 2;
pub const PACKET_RESPONSE_VALUE: i32 = 0;
/// Request id the server answers with when login fails.
pub const AUTH_FAILED_ID: i32 = -1;

pub const MAX_COMMAND_BYTES: usize = 1446;
pub const MAX_RESPONSE_BODY_BYTES: usize = 4096;
const ID_AND_KIND_BYTES: usize = 8;
const TERMINATOR_BYTES: usize = 2;
pub const MIN_PACKET_LENGTH: usize = ID_AND_KIND_BYTES + TERMINATOR_BYTES;
pub const MAX_PACKET_LENGTH: usize = MIN_PACKET_LENGTH + MAX_RESPONSE_BODY_BYTES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub request_id: i32,
    pub kind: i32,
    pub body: String,
}

impl RconPacket {
    pub fn login(request_id: i32, password: &str) -> Self {
        Self {
            request_id,
            kind: PACKET_LOGIN,
            body: password.to_string(),
        }
    }

    pub fn command(request_id: i32, command: &str) -> Self {
        Self {
            request_id,
            kind: PACKET_COMMAND,
            body: command.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RconError {
    #[error("rcon body exceeds max size: {size} > {max}")]
    OversizedBody { size: usize, max: usize },
    #[error("rcon packet length out of range: {0}")]
    InvalidLength(i32),
    #[error("rcon packet truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("rcon packet missing trailing terminator")]
    MissingTerminator,
}

pub fn encode_packet(packet: &RconPacket) -> Result<Vec<u8>, RconError> {
    let body = packet.body.as_bytes();
    if body.len() > MAX_COMMAND_BYTES {
        return Err(RconError::OversizedBody {
            size: body.len(),
            max: MAX_COMMAND_BYTES,
        });
    }
    let length = MIN_PACKET_LENGTH + body.len();
    let mut encoded = Vec::with_capacity(4 + length);
    encoded.extend_from_slice(&(length as i32).to_le_bytes());
    encoded.extend_from_slice(&packet.request_id.to_le_bytes());
    encoded.extend_from_slice(&packet.kind.to_le_bytes());
    encoded.extend_from_slice(body);
    encoded.extend_from_slice(&[0, 0]);
    Ok(encoded)
}

/// Validates the 4-byte length prefix and returns how many bytes follow it.
pub fn decode_length(prefix: [u8; 4]) -> Result<usize, RconError> {
    let length = i32::from_le_bytes(prefix);
    match usize::try_from(length) {
        Ok(value) if (MIN_PACKET_LENGTH..=MAX_PACKET_LENGTH).contains(&value) => Ok(value),
        _ => Err(RconError::InvalidLength(length)),
    }
}

/// Decodes the bytes following the length prefix.
pub fn decode_packet(payload: &[u8]) -> Result<RconPacket, RconError> {
    if payload.len() < MIN_PACKET_LENGTH {
        return Err(RconError::Truncated {
            expected: MIN_PACKET_LENGTH,
            actual: payload.len(),
        });
    }
    if payload.len() > MAX_PACKET_LENGTH {
        return Err(RconError::InvalidLength(payload.len() as i32));
    }
    let request_id = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let kind = i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let rest = &payload[ID_AND_KIND_BYTES..];
    let Some(body) = rest.strip_suffix(&[0u8, 0u8][..]) else {
        return Err(RconError::MissingTerminator);
    };
    Ok(RconPacket {
        request_id,
        kind,
        body: String::from_utf8_lossy(body).into_owned(),
    })
}
