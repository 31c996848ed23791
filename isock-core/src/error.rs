//! Domain-specific error types for the Intellisock client.
//!
//! Fallible operations return `Result<T, IsockError>`. Framing problems
//! seen on the wire are not errors: they are [`FramingAnomaly`] values
//! absorbed by the decoder and reported through diagnostics.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the Intellisock client.
#[derive(Debug, Error)]
pub enum IsockError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A packet or state transition violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Packet Errors ────────────────────────────────────────────
    /// The payload does not fit a single packet.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Connecting to the device server did not finish in time.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The session is not open (never opened, closed, or failed).
    #[error("port not open")]
    NotOpen,

    /// The device server closed the connection or the reader task died.
    #[error("connection failed (reader task ended)")]
    Disconnected,

    // ── Configuration Errors ─────────────────────────────────────
    /// The baud rate is not in the device's supported set.
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaudRate(u32),

    /// Word length must be 5 through 8 bits.
    #[error("invalid word length: {0} (expected 5..=8)")]
    InvalidWordLength(u8),

    /// Stop bits must be 1 or 2.
    #[error("invalid stop bits: {0} (expected 1 or 2)")]
    InvalidStopBits(u8),

    /// The TCP port is outside the device server's per-UART range.
    #[error("port {port} not in range {first}..={last}")]
    PortOutOfRange { port: u16, first: u16, last: u16 },

    /// An endpoint URL could not be parsed.
    #[error("invalid url {url:?}: {reason}; expected \"[intellisock://]<host>:<port>[/option[/option...]]\"")]
    InvalidUrl { url: String, reason: String },

    /// A configuration file could not be parsed or is inconsistent.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<toml::de::Error> for IsockError {
    fn from(e: toml::de::Error) -> Self {
        IsockError::InvalidConfig(e.to_string())
    }
}

impl From<toml::ser::Error> for IsockError {
    fn from(e: toml::ser::Error) -> Self {
        IsockError::InvalidConfig(e.to_string())
    }
}

// ── FramingAnomaly ───────────────────────────────────────────────

/// A protocol irregularity that the session survives.
///
/// The header scan is self-synchronizing, so none of these end the
/// session. They are logged and counted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingAnomaly {
    /// A packet carried an opcode outside the command catalog.
    #[error("unknown opcode {opcode:#04x} (sequence {sequence})")]
    UnknownOpcode { opcode: u8, sequence: u16 },

    /// The declared payload length cannot fit a packet.
    #[error("declared length {length} exceeds maximum payload {max}")]
    OversizedLength { length: u16, max: usize },

    /// The device acknowledged a sequence this session never sent.
    #[error("ack for unknown sequence {sequence} (length {length})")]
    UnknownAck { sequence: u16, length: u16 },

    /// The device has more unacknowledged packets in flight than negotiated.
    #[error("outstanding packets {outstanding} exceed negotiated maximum {max}")]
    OutstandingExceeded { outstanding: usize, max: u16 },

    /// A control response was too short to decode.
    #[error("short {opcode} payload: {actual} bytes (expected {expected})")]
    ShortPayload {
        opcode: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = IsockError::UnsupportedBaudRate(1898);
        assert!(e.to_string().contains("1898"));

        let e = IsockError::PortOutOfRange {
            port: 80,
            first: 5000,
            last: 5007,
        };
        assert!(e.to_string().contains("5000..=5007"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let e: IsockError = io_err.into();
        assert!(matches!(e, IsockError::Connection(_)));
    }

    #[test]
    fn from_toml() {
        let err = toml::from_str::<toml::Table>("= nope").unwrap_err();
        let e: IsockError = err.into();
        assert!(matches!(e, IsockError::InvalidConfig(_)));
    }

    #[test]
    fn anomaly_display() {
        let a = FramingAnomaly::UnknownOpcode {
            opcode: 0x99,
            sequence: 3,
        };
        assert!(a.to_string().contains("0x99"));
    }
}
