//! Byte stuffing of the marker byte inside data packets.
//!
//! The device server escapes data it sends to the host: two consecutive
//! markers are followed by [`LITERAL_ESCAPE`]. Two markers followed by
//! anything else introduce a status insertion (type byte, then register
//! value) that is not UART data.
//!
//! ```text
//! Normal ──1B──► SawOneMarker ──1B──► SawTwoMarkers ──FF──► Normal (emit 1B 1B)
//!   ▲                 │                     │
//!   │       other (emit 1B, byte)      other (status type)
//!   │                 ▼                     ▼
//!   └──────────── Normal          ReadRegisterValue ──any──► Normal
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::opcode::{LITERAL_ESCAPE, MARKER};

/// How the encoder treats marker bytes in data payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscapeMode {
    /// Send data verbatim. Host-to-device data is never escaped.
    #[default]
    Raw,
    /// Escape marker pairs the way a device server does toward the host.
    Stuffed,
}

/// Escape a whole payload without any size limit.
pub fn stuff(payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(payload.len() + payload.len() / 2);
    let mut run = false;
    for &byte in payload {
        out.put_u8(byte);
        if byte == MARKER {
            if run {
                out.put_u8(LITERAL_ESCAPE);
            }
            run = !run;
        } else {
            run = false;
        }
    }
    out
}

/// Split `payload` into escaped chunks of at most `max` bytes each.
///
/// A marker pair and its escape never straddle two chunks. A chunk may
/// end on a single marker; the decoder carries it into the next packet
/// and resolves it there as literal data. An empty payload yields one
/// empty chunk.
pub fn stuffed_chunks(payload: &[u8], max: usize) -> Vec<Bytes> {
    let mut chunks = Vec::new();
    let mut current = BytesMut::with_capacity(max);
    let mut run = false;

    for &byte in payload {
        let needed = if byte == MARKER && run { 2 } else { 1 };
        if current.len() + needed > max {
            chunks.push(current.split().freeze());
            run = false;
        }
        current.put_u8(byte);
        if byte == MARKER {
            if run {
                current.put_u8(LITERAL_ESCAPE);
            }
            run = !run;
        } else {
            run = false;
        }
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current.freeze());
    }
    chunks
}

// ── Destuffer ────────────────────────────────────────────────────

/// De-stuffing sub-state, carried across packets and reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestuffState {
    #[default]
    Normal,
    /// One marker withheld.
    SawOneMarker,
    /// Two markers withheld.
    SawTwoMarkers,
    /// Status type seen; next byte is the inserted register value.
    ReadRegisterValue { kind: u8 },
}

/// An out-of-band register value the device inserted into the data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusInsertion {
    pub kind: u8,
    pub value: u8,
}

/// Undoes the device server's escaping, one byte at a time.
#[derive(Debug, Default)]
pub struct Destuffer {
    state: DestuffState,
}

impl Destuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DestuffState {
        self.state
    }

    /// Feed one data byte. Resolved bytes are appended to `out`.
    pub fn push(&mut self, byte: u8, out: &mut BytesMut) -> Option<StatusInsertion> {
        match self.state {
            DestuffState::Normal => {
                if byte == MARKER {
                    self.state = DestuffState::SawOneMarker;
                } else {
                    out.put_u8(byte);
                }
                None
            }
            DestuffState::SawOneMarker => {
                if byte == MARKER {
                    self.state = DestuffState::SawTwoMarkers;
                } else {
                    out.put_u8(MARKER);
                    out.put_u8(byte);
                    self.state = DestuffState::Normal;
                }
                None
            }
            DestuffState::SawTwoMarkers => {
                if byte == LITERAL_ESCAPE {
                    out.put_u8(MARKER);
                    out.put_u8(MARKER);
                    self.state = DestuffState::Normal;
                } else {
                    self.state = DestuffState::ReadRegisterValue { kind: byte };
                }
                None
            }
            DestuffState::ReadRegisterValue { kind } => {
                self.state = DestuffState::Normal;
                Some(StatusInsertion { kind, value: byte })
            }
        }
    }

    /// Resolve markers withheld at the end of the previous data packet.
    ///
    /// Called when the next parameter block completes: withheld markers
    /// are literal data. A half-read status insertion is dropped.
    pub fn flush_pending(&mut self, out: &mut BytesMut) {
        match self.state {
            DestuffState::SawOneMarker => out.put_u8(MARKER),
            DestuffState::SawTwoMarkers => {
                out.put_u8(MARKER);
                out.put_u8(MARKER);
            }
            DestuffState::Normal | DestuffState::ReadRegisterValue { .. } => {}
        }
        self.state = DestuffState::Normal;
    }
}
