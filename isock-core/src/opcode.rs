//! Command catalog: opcodes understood by Intellisock device servers.
//!
//! Unknown values convert through `TryFrom` and never panic.

use crate::error::IsockError;
use std::fmt;

/// Reserved byte that delimits packet headers and triggers escaping in data.
pub const MARKER: u8 = 0x1B;

/// Follows two data markers to mark them as literal data.
pub const LITERAL_ESCAPE: u8 = 0xFF;

/// Destination port field. Unused by single-UART device servers.
pub const DEST_PORT: u8 = 0x00;

/// Constant packet preamble: three markers, the reserved byte, and a
/// zeroed sequence placeholder.
pub const COMMAND_BASE: [u8; 6] = [MARKER, MARKER, MARKER, 0x00, 0x00, 0x00];

// ── Opcode ───────────────────────────────────────────────────────

/// All opcodes in the Intellisock SDK command set.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Verify the connection; refreshes the heartbeat timer.
    ConnectionCheck = 0x3F,
    /// Maximum outstanding packet count negotiation.
    MaxOutstanding = 0x41,
    /// Set the UART baud rate.
    SetBaudRate = 0x42,
    /// Close the UART and mark it available.
    Close = 0x43,
    /// Data plus line and modem status.
    TxData = 0x44,
    /// Flush the UART receive FIFO.
    RxFlush = 0x46,
    /// Enable hardware flow control.
    HwFlowControl = 0x48,
    /// Device information (hardware, firmware major, firmware minor).
    DeviceInfo = 0x49,
    /// Set or clear the break condition.
    BreakControl = 0x4B,
    /// Set or clear register bits.
    ModifyRegister = 0x4D,
    /// Open the UART and start processing RX/TX.
    Open = 0x4F,
    /// Word length, stop bits and parity.
    CommParameters = 0x50,
    /// Enable status insertion into the data stream.
    EnableStatusInsertion = 0x51,
    /// Set registers.
    SetRegister = 0x52,
    /// Enable software flow control.
    SwFlowControl = 0x53,
    /// Send one character, bypassing the transmit queue.
    TxImmediate = 0x54,
    /// Acknowledge that a packet has been processed.
    PacketAck = 0x61,
    /// Query the UART baud rate.
    GetBaudRate = 0x62,
    /// Flush the UART transmit FIFO.
    TxFlush = 0x66,
    /// Disable status insertion.
    DisableStatusInsertion = 0x71,
    /// Read registers.
    GetRegister = 0x72,
    /// Disable software flow control.
    SwFlowDisable = 0x73,
    /// Disable the heartbeat timer.
    DisableHeartbeat = 0x78,
}

impl Opcode {
    /// Every opcode in the catalog.
    pub const ALL: [Opcode; 23] = [
        Opcode::ConnectionCheck,
        Opcode::MaxOutstanding,
        Opcode::SetBaudRate,
        Opcode::Close,
        Opcode::TxData,
        Opcode::RxFlush,
        Opcode::HwFlowControl,
        Opcode::DeviceInfo,
        Opcode::BreakControl,
        Opcode::ModifyRegister,
        Opcode::Open,
        Opcode::CommParameters,
        Opcode::EnableStatusInsertion,
        Opcode::SetRegister,
        Opcode::SwFlowControl,
        Opcode::TxImmediate,
        Opcode::PacketAck,
        Opcode::GetBaudRate,
        Opcode::TxFlush,
        Opcode::DisableStatusInsertion,
        Opcode::GetRegister,
        Opcode::SwFlowDisable,
        Opcode::DisableHeartbeat,
    ];

    /// SDK mnemonic, as used in device logs.
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::ConnectionCheck => "CON_CHK",
            Opcode::MaxOutstanding => "MX_OST_PKTS",
            Opcode::SetBaudRate => "SET_BAUD_RATE",
            Opcode::Close => "CLOSE",
            Opcode::TxData => "TX_DATA",
            Opcode::RxFlush => "RX_FLUSH",
            Opcode::HwFlowControl => "HW_FLW_CTRL",
            Opcode::DeviceInfo => "DEV_INFO",
            Opcode::BreakControl => "BREAK_CTRL",
            Opcode::ModifyRegister => "MODIFY_REG",
            Opcode::Open => "OPEN",
            Opcode::CommParameters => "COMM_PARAM",
            Opcode::EnableStatusInsertion => "EN_STAT_INS",
            Opcode::SetRegister => "SET_REG",
            Opcode::SwFlowControl => "SW_FLW_CTRL",
            Opcode::TxImmediate => "TX_IMMEDIATE",
            Opcode::PacketAck => "PKT_ACK",
            Opcode::GetBaudRate => "GET_BAUD_RATE",
            Opcode::TxFlush => "TX_FLUSH",
            Opcode::DisableStatusInsertion => "DIS_STAT_INS",
            Opcode::GetRegister => "GET_REG",
            Opcode::SwFlowDisable => "SW_FLW_DIS",
            Opcode::DisableHeartbeat => "DIS_HEART",
        }
    }

    /// Returns `true` if packets with this opcode carry UART data and
    /// are therefore escaped and acknowledged.
    pub fn carries_data(&self) -> bool {
        matches!(self, Opcode::TxData)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = IsockError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| *op as u8 == value)
            .ok_or(IsockError::UnknownVariant {
                type_name: "Opcode",
                value: value as u64,
            })
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        op as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op as u8).unwrap(), op);
        }
    }

    #[test]
    fn opcode_invalid() {
        assert!(Opcode::try_from(0x00).is_err());
        assert!(Opcode::try_from(MARKER).is_err());
    }

    #[test]
    fn sdk_values() {
        assert_eq!(Opcode::TxData as u8, 0x44);
        assert_eq!(Opcode::PacketAck as u8, 0x61);
        assert_eq!(Opcode::DisableHeartbeat as u8, 0x78);
        assert_eq!(Opcode::Open.to_string(), "OPEN");
    }

    #[test]
    fn only_tx_data_carries_data() {
        let data: Vec<_> = Opcode::ALL.iter().filter(|op| op.carries_data()).collect();
        assert_eq!(data, vec![&Opcode::TxData]);
    }

    #[test]
    fn preamble_layout() {
        assert_eq!(&COMMAND_BASE[..3], &[MARKER; 3]);
        assert_eq!(&COMMAND_BASE[3..], &[0, 0, 0]);
    }
}
