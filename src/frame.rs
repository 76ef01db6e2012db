//! Frame header codec.
//!
//! Every message in a ring is one frame: a fixed 24-byte header immediately
//! followed by `payload_bytes` of opaque payload. All multi-byte header
//! fields are little-endian on the wire.
//!
//! Header layout:
//! - version: u16 — protocol version, currently [`PROTOCOL_VERSION`]
//! - flags: u16 — exactly one of REQUEST / RESPONSE / NOTIFY
//! - service_id: u32 — stub-assigned service identifier, opaque here
//! - message_id: u32 — method or notification id within the service
//! - seq: u32 — per-client call sequence, echoed by the response; 0 for notifies
//! - payload_bytes: u32 — payload length following the header
//! - aux: u32 — response status (reinterpreted as i32); reserved otherwise

use bitflags::bitflags;

use crate::error::Status;

/// Protocol version carried in the handshake and in every frame header.
pub const PROTOCOL_VERSION: u16 = 1;

/// Encoded size of a frame header.
pub const FRAME_HEADER_SIZE: usize = 24;

bitflags! {
    /// Frame kind bitmask. Exactly one bit is set on a well-formed frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u16 {
        const REQUEST = 0x0001;
        const RESPONSE = 0x0002;
        const NOTIFY = 0x0004;
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub flags: FrameFlags,
    pub service_id: u32,
    pub message_id: u32,
    pub seq: u32,
    pub payload_bytes: u32,
    pub aux: u32,
}

impl FrameHeader {
    /// Header for an outgoing request.
    pub fn request(service_id: u32, method_id: u32, seq: u32, payload_bytes: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: FrameFlags::REQUEST,
            service_id,
            message_id: method_id,
            seq,
            payload_bytes,
            aux: 0,
        }
    }

    /// Header for the response to `request`, carrying the handler status.
    pub fn response(request: &FrameHeader, status: Status, payload_bytes: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: FrameFlags::RESPONSE,
            service_id: request.service_id,
            message_id: request.message_id,
            seq: request.seq,
            payload_bytes,
            aux: status as u32,
        }
    }

    /// Header for a one-way notification (no sequence number).
    pub fn notify(service_id: u32, notify_id: u32, payload_bytes: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: FrameFlags::NOTIFY,
            service_id,
            message_id: notify_id,
            seq: 0,
            payload_bytes,
            aux: 0,
        }
    }

    /// The response status carried in `aux`, reinterpreted as signed.
    #[inline]
    pub fn status(&self) -> Status {
        self.aux as Status
    }

    /// Encode the header into its 24-byte little-endian wire form.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.version.to_le_bytes());
        buf[2..4].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[4..8].copy_from_slice(&self.service_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.message_id.to_le_bytes());
        buf[12..16].copy_from_slice(&self.seq.to_le_bytes());
        buf[16..20].copy_from_slice(&self.payload_bytes.to_le_bytes());
        buf[20..24].copy_from_slice(&self.aux.to_le_bytes());
        buf
    }

    /// Decode a header from `bytes`.
    ///
    /// Returns `None` if fewer than [`FRAME_HEADER_SIZE`] bytes are given.
    /// No validation beyond length is performed; receivers apply their own
    /// checks.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let u32_at =
            |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(Self {
            version: u16_at(0),
            flags: FrameFlags::from_bits_retain(u16_at(2)),
            service_id: u32_at(4),
            message_id: u32_at(8),
            seq: u32_at(12),
            payload_bytes: u32_at(16),
            aux: u32_at(20),
        })
    }
}
