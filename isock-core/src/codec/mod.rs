//! Frame decoder and `tokio_util` codec.
//!
//! TCP delivers arbitrary chunks, so [`FrameDecoder`] keeps its whole
//! state in one explicit record and can stop between any two bytes.
//!
//! ```text
//! ReadingHeader ──1B 1B 1B──► ReadingParameters ──7 bytes──► ReadingData
//!       ▲                              │ len == 0                 │ len bytes
//!       └──────────────────────────────┴──────────────────────────┘
//! ```

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FramingAnomaly, IsockError};
use crate::escape::{DestuffState, Destuffer, StatusInsertion};
use crate::opcode::{MARKER, Opcode};
use crate::packet::{MAX_PAYLOAD_SIZE, Packet};

/// Reserved, sequence, opcode, destination, length.
pub const PARAMETER_LENGTH: usize = 7;

/// Markers that open every packet.
pub const HEADER_MARKERS: u8 = 3;

// ── PacketHeader ─────────────────────────────────────────────────

/// The decoded parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence: u16,
    pub opcode: u8,
    pub destination: u8,
    pub length: u16,
}

impl PacketHeader {
    pub fn parse(block: &[u8; PARAMETER_LENGTH]) -> Self {
        Self {
            sequence: u16::from_be_bytes([block[1], block[2]]),
            opcode: block[3],
            destination: block[4],
            length: u16::from_be_bytes([block[5], block[6]]),
        }
    }

    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::try_from(self.opcode).ok()
    }

    pub fn carries_data(&self) -> bool {
        self.opcode == Opcode::TxData as u8
    }
}

// ── Events ───────────────────────────────────────────────────────

/// A packet whose header and payload have been fully consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPacket {
    pub header: PacketHeader,
    /// Opaque payload of a control packet. Empty for data packets,
    /// whose bytes were already emitted as [`Inbound::Data`].
    pub payload: Bytes,
}

impl CompletedPacket {
    pub fn opcode(&self) -> Option<Opcode> {
        self.header.opcode()
    }
}

/// Everything the decoder can produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// De-stuffed UART bytes.
    Data(Bytes),
    /// A packet boundary. Emitted after the packet's data.
    Packet(CompletedPacket),
    /// An inserted status register value, removed from the data stream.
    Status(StatusInsertion),
    /// A framing irregularity the decoder resynchronized past.
    Anomaly(FramingAnomaly),
}

// ── FrameDecoder ─────────────────────────────────────────────────

/// Outer framing phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    ReadingHeader {
        markers: u8,
    },
    ReadingParameters {
        block: [u8; PARAMETER_LENGTH],
        filled: usize,
    },
    ReadingData {
        header: PacketHeader,
        received: u16,
    },
}

impl Default for Phase {
    fn default() -> Self {
        Phase::ReadingHeader { markers: 0 }
    }
}

/// Resumable byte-level decoder for the device-to-host stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    phase: Phase,
    destuffer: Destuffer,
    data: BytesMut,
    control: BytesMut,
    last_opcode: Option<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn destuff_state(&self) -> DestuffState {
        self.destuffer.state()
    }

    /// Opcode of the most recently started packet.
    pub fn last_opcode(&self) -> Option<u8> {
        self.last_opcode
    }

    /// Decode `input`, returning every event it completes.
    pub fn feed(&mut self, input: &[u8]) -> Vec<Inbound> {
        let mut events = VecDeque::new();
        self.decode_into(input, &mut events);
        events.into()
    }

    /// Decode `input`, appending events to `events`.
    ///
    /// Data bytes resolved by this call are emitted before it returns.
    /// Markers still withheld by the de-stuffer are not.
    pub fn decode_into(&mut self, input: &[u8], events: &mut VecDeque<Inbound>) {
        for &byte in input {
            self.step(byte, events);
        }
        self.flush_data(events);
    }

    fn step(&mut self, byte: u8, events: &mut VecDeque<Inbound>) {
        match &mut self.phase {
            Phase::ReadingHeader { markers } => {
                if byte == MARKER {
                    *markers += 1;
                    if *markers == HEADER_MARKERS {
                        self.phase = Phase::ReadingParameters {
                            block: [0; PARAMETER_LENGTH],
                            filled: 0,
                        };
                    }
                } else {
                    // A false start earns no partial credit.
                    *markers = 0;
                }
            }
            Phase::ReadingParameters { block, filled } => {
                block[*filled] = byte;
                *filled += 1;
                if *filled == PARAMETER_LENGTH {
                    let header = PacketHeader::parse(block);
                    self.begin_packet(header, events);
                }
            }
            Phase::ReadingData { header, received } => {
                *received += 1;
                let header = *header;
                let done = *received == header.length;

                if header.carries_data() {
                    if let Some(status) = self.destuffer.push(byte, &mut self.data) {
                        self.flush_data(events);
                        events.push_back(Inbound::Status(status));
                    }
                } else {
                    self.control.put_u8(byte);
                }

                if done {
                    let payload = self.control.split().freeze();
                    self.finish_packet(header, payload, events);
                }
            }
        }
    }

    fn begin_packet(&mut self, header: PacketHeader, events: &mut VecDeque<Inbound>) {
        // The parameter block interrupts data but does not cancel a
        // pending escape decision from the previous data packet.
        self.destuffer.flush_pending(&mut self.data);
        self.last_opcode = Some(header.opcode);

        if header.opcode().is_none() {
            self.flush_data(events);
            events.push_back(Inbound::Anomaly(FramingAnomaly::UnknownOpcode {
                opcode: header.opcode,
                sequence: header.sequence,
            }));
        }

        if header.length as usize > MAX_PAYLOAD_SIZE {
            self.flush_data(events);
            events.push_back(Inbound::Anomaly(FramingAnomaly::OversizedLength {
                length: header.length,
                max: MAX_PAYLOAD_SIZE,
            }));
            self.phase = Phase::default();
            return;
        }

        if header.length == 0 {
            self.finish_packet(header, Bytes::new(), events);
        } else {
            self.control.clear();
            self.phase = Phase::ReadingData {
                header,
                received: 0,
            };
        }
    }

    fn finish_packet(&mut self, header: PacketHeader, payload: Bytes, events: &mut VecDeque<Inbound>) {
        self.flush_data(events);
        events.push_back(Inbound::Packet(CompletedPacket { header, payload }));
        self.phase = Phase::default();
    }

    fn flush_data(&mut self, events: &mut VecDeque<Inbound>) {
        if !self.data.is_empty() {
            events.push_back(Inbound::Data(self.data.split().freeze()));
        }
    }
}

// ── IsockCodec ───────────────────────────────────────────────────

/// `tokio_util` codec: decodes [`Inbound`] events, encodes [`Packet`]s.
#[derive(Debug, Default)]
pub struct IsockCodec {
    decoder: FrameDecoder,
    ready: VecDeque<Inbound>,
}

impl IsockCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_decoder(&self) -> &FrameDecoder {
        &self.decoder
    }
}

impl Decoder for IsockCodec {
    type Item = Inbound;
    type Error = IsockError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.ready.is_empty() && !src.is_empty() {
            let chunk = src.split();
            self.decoder.decode_into(&chunk, &mut self.ready);
        }
        Ok(self.ready.pop_front())
    }
}

impl Encoder<Packet> for IsockCodec {
    type Error = IsockError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst);
        Ok(())
    }
}
