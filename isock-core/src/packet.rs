//! Packet model and encoder.
//!
//! ```text
//! [1B][1B][1B][00][seq:2][opcode:1][dest:1][len:2][payload:len]
//! ```
//!
//! All multi-byte integers are big-endian.

use std::fmt::Debug;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::IsockError;
use crate::escape::{self, EscapeMode};
use crate::opcode::{COMMAND_BASE, DEST_PORT, Opcode};

/// Largest packet the device server accepts, header included.
pub const MAX_PACKET_SIZE: usize = 1460;

/// Header length: three markers, reserved, sequence, opcode, destination, length.
pub const HEADER_LENGTH: usize = 10;

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_LENGTH;

/// Sequence numbers wrap back to 0 when they reach this value.
pub const SEQUENCE_WRAP: u16 = 0xFFFF;

// ── Packet ───────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    sequence: u16,
    opcode: Opcode,
    destination: u8,
    payload: Bytes,
}

impl Packet {
    /// A packet with an explicit sequence number.
    pub fn new(sequence: u16, opcode: Opcode, payload: impl Into<Bytes>) -> Result<Self, IsockError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(IsockError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self {
            sequence,
            opcode,
            destination: DEST_PORT,
            payload,
        })
    }

    /// A control packet. Control packets carry the zeroed sequence
    /// placeholder from the command preamble.
    pub fn control(opcode: Opcode, payload: impl Into<Bytes>) -> Result<Self, IsockError> {
        Self::new(0, opcode, payload)
    }

    /// Control packet whose payload is known to fit.
    pub(crate) fn fixed_control(opcode: Opcode, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);
        Self {
            sequence: 0,
            opcode,
            destination: DEST_PORT,
            payload,
        }
    }

    /// `PKT_ACK` for a received packet.
    pub fn ack(sequence: u16, length: u16) -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.put_u16(sequence);
        payload.put_u16(length);
        Self::fixed_control(Opcode::PacketAck, payload.freeze())
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn destination(&self) -> u8 {
        self.destination
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Size on the wire, header included.
    pub fn wire_len(&self) -> usize {
        HEADER_LENGTH + self.payload.len()
    }

    /// Append the wire representation to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        dst.put_slice(&COMMAND_BASE[..4]);
        dst.put_u16(self.sequence);
        dst.put_u8(self.opcode as u8);
        dst.put_u8(self.destination);
        dst.put_u16(self.payload.len() as u16);
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }
}

impl Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("sequence", &self.sequence)
            .field("opcode", &self.opcode)
            .field("destination", &self.destination)
            .field("payload_length", &self.payload.len())
            .finish()
    }
}

// ── Sequencer ────────────────────────────────────────────────────

/// Session-scoped data packet sequence counter.
///
/// The first number handed out is 1. After 0xFFFE the counter wraps to 0;
/// 0xFFFF is never emitted.
#[derive(Debug, Default, Clone)]
pub struct Sequencer {
    last: u16,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start so that the next number handed out follows `last`.
    pub fn starting_after(last: u16) -> Self {
        Self {
            last: last % SEQUENCE_WRAP,
        }
    }

    /// Hand out the next number.
    pub fn advance(&mut self) -> u16 {
        self.last = self.last.wrapping_add(1);
        if self.last >= SEQUENCE_WRAP {
            self.last = 0;
        }
        self.last
    }

    /// The most recently assigned number.
    pub fn last(&self) -> u16 {
        self.last
    }
}

// ── PacketEncoder ────────────────────────────────────────────────

/// Turns data writes into numbered `TX_DATA` packets.
#[derive(Debug, Default)]
pub struct PacketEncoder {
    sequencer: Sequencer,
    mode: EscapeMode,
}

impl PacketEncoder {
    pub fn new(mode: EscapeMode) -> Self {
        Self {
            sequencer: Sequencer::new(),
            mode,
        }
    }

    pub fn with_sequencer(mode: EscapeMode, sequencer: Sequencer) -> Self {
        Self { sequencer, mode }
    }

    pub fn mode(&self) -> EscapeMode {
        self.mode
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Split `data` into packets of at most [`MAX_PAYLOAD_SIZE`] payload
    /// bytes, each with its own sequence number. An empty input yields
    /// one empty packet.
    pub fn data_packets(&mut self, data: &[u8]) -> Vec<Packet> {
        let chunks: Vec<Bytes> = match self.mode {
            EscapeMode::Raw if data.is_empty() => vec![Bytes::new()],
            EscapeMode::Raw => data
                .chunks(MAX_PAYLOAD_SIZE)
                .map(Bytes::copy_from_slice)
                .collect(),
            EscapeMode::Stuffed => escape::stuffed_chunks(data, MAX_PAYLOAD_SIZE),
        };
        chunks
            .into_iter()
            .map(|payload| Packet {
                sequence: self.sequencer.advance(),
                opcode: Opcode::TxData,
                destination: DEST_PORT,
                payload,
            })
            .collect()
    }
}
