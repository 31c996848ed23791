//! Typed control commands and their payload encodings.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::{BaudRate, Parity, StopBits, WordLength};
use crate::flags::{ModemControl, ModemStatus};
use crate::opcode::Opcode;
use crate::packet::Packet;

/// A control command the host sends to the device server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    DisableHeartbeat,
    SetBaudRate(BaudRate),
    CommParameters {
        parity: Parity,
        word_length: WordLength,
        stop_bits: StopBits,
    },
    SoftwareFlowControl {
        xon: u8,
        xoff: u8,
        strip: bool,
    },
    SoftwareFlowDisable,
    HardwareFlowControl {
        status: ModemStatus,
        control: ModemControl,
    },
    /// Open the UART. Must follow every other setting.
    Open,
    Close,
    RxFlush,
    TxFlush,
    Break(bool),
    TxImmediate(u8),
    ConnectionCheck,
    MaxOutstanding(u16),
    Ack {
        sequence: u16,
        length: u16,
    },
}

impl Control {
    pub fn opcode(&self) -> Opcode {
        match self {
            Control::DisableHeartbeat => Opcode::DisableHeartbeat,
            Control::SetBaudRate(_) => Opcode::SetBaudRate,
            Control::CommParameters { .. } => Opcode::CommParameters,
            Control::SoftwareFlowControl { .. } => Opcode::SwFlowControl,
            Control::SoftwareFlowDisable => Opcode::SwFlowDisable,
            Control::HardwareFlowControl { .. } => Opcode::HwFlowControl,
            Control::Open => Opcode::Open,
            Control::Close => Opcode::Close,
            Control::RxFlush => Opcode::RxFlush,
            Control::TxFlush => Opcode::TxFlush,
            Control::Break(_) => Opcode::BreakControl,
            Control::TxImmediate(_) => Opcode::TxImmediate,
            Control::ConnectionCheck => Opcode::ConnectionCheck,
            Control::MaxOutstanding(_) => Opcode::MaxOutstanding,
            Control::Ack { .. } => Opcode::PacketAck,
        }
    }

    pub fn payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(8);
        match *self {
            Control::SetBaudRate(rate) => buf.put_u32(rate.value()),
            Control::CommParameters {
                parity,
                word_length,
                stop_bits,
            } => {
                buf.put_u8(parity.wire_value());
                buf.put_u8(word_length.bits());
                buf.put_u8(stop_bits.wire_value());
            }
            Control::SoftwareFlowControl { xon, xoff, strip } => {
                // XOFF precedes XON on the wire.
                buf.put_u8(xoff);
                buf.put_u8(xon);
                buf.put_u8(strip as u8);
            }
            Control::HardwareFlowControl { status, control } => {
                buf.put_u8(status.bits());
                buf.put_u8(control.bits());
            }
            Control::Open => {
                buf.put_u8(0); // LSR
                buf.put_u8(0); // MSR
                buf.put_u8(0); // acquire status
                buf.put_u16(0); // heartbeat interval
            }
            Control::Break(on) => buf.put_u8(on as u8),
            Control::TxImmediate(byte) => buf.put_u8(byte),
            Control::ConnectionCheck => {
                buf.put_u16(0); // hardware product id
                buf.put_u8(0); // firmware major
                buf.put_u8(0); // firmware minor
            }
            Control::MaxOutstanding(count) => buf.put_u16(count),
            Control::Ack { sequence, length } => {
                buf.put_u16(sequence);
                buf.put_u16(length);
            }
            Control::DisableHeartbeat
            | Control::SoftwareFlowDisable
            | Control::Close
            | Control::RxFlush
            | Control::TxFlush => {}
        }
        buf.freeze()
    }

    pub fn to_packet(&self) -> Packet {
        Packet::fixed_control(self.opcode(), self.payload())
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::SetBaudRate(rate) => write!(f, "{} {}", self.opcode(), rate.value()),
            Control::Break(on) => write!(f, "{} {}", self.opcode(), if *on { "set" } else { "clear" }),
            Control::Ack { sequence, length } => {
                write!(f, "{} seq={sequence} len={length}", self.opcode())
            }
            _ => write!(f, "{}", self.opcode()),
        }
    }
}
