//! Wire-format definitions for link packets.
//!
//! Every frame exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire byte layout (marker, ack field, index, length).
//! - Serialising a [`Packet`] into bytes ready for the transport.
//! - Scanning a growing byte stream for the next frame, resynchronising on
//!   corrupted headers and deferring on partially-arrived frames.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All fields are single bytes, so there is no endianness to worry about.
//!
//! ```text
//!  0      1      2        3          4         5       6
//! +------+------+--------+----------+---------+-------+-------+
//! |  10  |  60  |  ack   |  index   |  length | hdr_a | hdr_b |
//! +------+------+--------+----------+---------+-------+-------+
//! |           payload (length bytes)          | pl_a  | pl_b  |
//! +-------------------------------------------+-------+-------+
//! ```
//!
//! `ack` carries the acknowledged index in bits 0..=6 and the error flag in
//! bit 7.  `hdr_a/hdr_b` is the [`checksum`] of bytes 0..5 and `pl_a/pl_b`
//! the checksum of the payload.

use thiserror::Error;

/// Two-byte frame start marker.
pub const MARKER: [u8; 2] = [10, 60];

/// Byte length of the fixed-size header on the wire, checksum included.
pub const HEADER_LEN: usize = 7;

/// Byte length of each trailing checksum.
pub const CHECKSUM_LEN: usize = 2;

/// Largest payload a single packet can carry.
pub const MAX_PAYLOAD: usize = 255;

/// Largest sequence index.  Index 0 is reserved for "no data".
pub const MAX_INDEX: u8 = 127;

const ERROR_BIT: u8 = 0x80;

// Byte offsets of each field within the serialised header.
const OFF_ACK: usize = 2;
const OFF_INDEX: usize = 3;
const OFF_LENGTH: usize = 4;
const OFF_CHECKSUM: usize = 5;

/// Errors raised while building a packet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// The payload does not fit in the single length byte.
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD}-byte limit")]
    PayloadTooLong(usize),
}

/// Delivery status for one sequence index.
///
/// Index 0 means there is nothing to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub index: u8,
    pub ok: bool,
}

impl Ack {
    /// The empty acknowledgement.
    pub const NONE: Ack = Ack { index: 0, ok: true };

    pub fn ok(index: u8) -> Self {
        Self { index, ok: true }
    }

    pub fn error(index: u8) -> Self {
        Self { index, ok: false }
    }

    /// `true` when this ack refers to no index at all.
    pub fn is_none(&self) -> bool {
        self.index == 0
    }

    /// Pack into the single `ack` header byte.
    pub fn to_byte(self) -> u8 {
        let index = self.index & !ERROR_BIT;
        if self.ok {
            index
        } else {
            index | ERROR_BIT
        }
    }

    /// Unpack the `ack` header byte.
    pub fn from_byte(byte: u8) -> Self {
        Self {
            index: byte & !ERROR_BIT,
            ok: byte & ERROR_BIT == 0,
        }
    }
}

impl Default for Ack {
    fn default() -> Self {
        Self::NONE
    }
}

impl std::fmt::Display for Ack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.ok { "ok" } else { "error" };
        write!(f, "{} {status}", self.index)
    }
}

/// A single link frame.
///
/// A packet may carry data (`send_index != 0`), an acknowledgement
/// (`ack_index != 0`), both, or neither.  `parsed` and `payload_valid` are
/// only meaningful on packets produced by [`Packet::decode`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    /// The acknowledgement denotes an error (peer must retry).
    pub error: bool,
    /// Index acknowledged by this packet (0 = none).
    pub ack_index: u8,
    /// Index of the carried payload (0 = no data).
    pub send_index: u8,
    pub payload: Vec<u8>,
    /// A valid header and the full payload were found.
    pub parsed: bool,
    /// The payload checksum matched.  Implies `parsed`.
    pub payload_valid: bool,
}

impl Packet {
    /// A packet that carries only an acknowledgement.
    pub fn ack_only(ack: Ack) -> Self {
        Self::default().with_ack(ack)
    }

    /// A data packet for `index`.
    pub fn with_data(index: u8, payload: Vec<u8>) -> Result<Self, PacketError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLong(payload.len()));
        }
        Ok(Self {
            send_index: index,
            payload,
            ..Self::default()
        })
    }

    /// Attach `ack` to this packet, replacing any previous one.
    pub fn with_ack(mut self, ack: Ack) -> Self {
        self.ack_index = ack.index;
        self.error = !ack.ok;
        self
    }

    /// The acknowledgement embedded in this packet.
    pub fn ack(&self) -> Ack {
        Ack {
            index: self.ack_index,
            ok: !self.error,
        }
    }

    /// `true` when the packet carries data.
    pub fn has_data(&self) -> bool {
        self.send_index != 0
    }

    /// `true` when the packet is worth putting on the wire.
    pub fn is_transmittable(&self) -> bool {
        self.has_data() || self.ack_index != 0
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The length byte and both checksums are computed here.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD);
        let payload = &self.payload[..self.payload.len().min(MAX_PAYLOAD)];

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
        buf.extend_from_slice(&MARKER);
        buf.push(self.ack().to_byte());
        buf.push(self.send_index);
        buf.push(payload.len() as u8);
        let header_sum = checksum(&buf);
        buf.extend_from_slice(&header_sum);

        buf.extend_from_slice(payload);
        buf.extend_from_slice(&checksum(payload));
        buf
    }

    /// Try to pull the next frame off the front of `stream`.
    ///
    /// Returns the packet and the part of `stream` that remains unconsumed.
    ///
    /// - No marker found: `parsed == false`; everything except a trailing
    ///   first marker byte is discarded.
    /// - Header not fully arrived, or payload not fully arrived:
    ///   `parsed == false` and `stream` is returned untouched.
    /// - Header checksum mismatch (or an index above [`MAX_INDEX`]):
    ///   `parsed == false`; the stream is consumed through the first marker
    ///   byte so the next scan starts one byte later.
    /// - Otherwise `parsed == true` and `payload_valid` reports the payload
    ///   checksum; the whole frame is consumed.
    pub fn decode(stream: &[u8]) -> (Packet, &[u8]) {
        let Some(start) = stream.windows(MARKER.len()).position(|w| w == MARKER) else {
            let keep = usize::from(stream.last() == Some(&MARKER[0]));
            return (Packet::default(), &stream[stream.len() - keep..]);
        };

        let header_end = start + HEADER_LEN;
        if stream.len() < header_end {
            return (Packet::default(), stream);
        }
        let header = &stream[start..header_end];
        let expected = checksum(&header[..OFF_CHECKSUM]);
        if header[OFF_CHECKSUM..] != expected || header[OFF_INDEX] > MAX_INDEX {
            log::trace!("bad header at offset {start}; resyncing");
            return (Packet::default(), &stream[start + 1..]);
        }

        let payload_end = header_end + usize::from(header[OFF_LENGTH]);
        let frame_end = payload_end + CHECKSUM_LEN;
        if stream.len() < frame_end {
            return (Packet::default(), stream);
        }

        let payload = stream[header_end..payload_end].to_vec();
        let payload_valid = stream[payload_end..frame_end] == checksum(&payload);
        let packet = Packet {
            send_index: header[OFF_INDEX],
            payload,
            parsed: true,
            payload_valid,
            ..Packet::default()
        }
        .with_ack(Ack::from_byte(header[OFF_ACK]));
        (packet, &stream[frame_end..])
    }
}

/// Two running sums over `bytes`, each modulo 256.
///
/// `a` accumulates the bytes; `b` accumulates successive values of `a`, which
/// makes the pair sensitive to byte order as well as content.
pub fn checksum(bytes: &[u8]) -> [u8; 2] {
    let mut a: u8 = 0;
    let mut b: u8 = 0;
    for &byte in bytes {
        a = a.wrapping_add(byte);
        b = b.wrapping_add(a);
    }
    [a, b]
}
