//! # isock-core
//!
//! Client for Intellisock device servers: a remote UART reached over
//! TCP, spoken to in the device's packet framing.
//!
//! This crate contains:
//! - **Wire types**: `Opcode`, `Packet`, `Sequencer`, `PacketEncoder`
//! - **Codec**: `FrameDecoder` and `IsockCodec` for framed TCP I/O via `tokio_util`
//! - **Control**: `Control` packets and the configuration handshake
//! - **Flow control**: `AckTracker` for acknowledgements and outstanding bounds
//! - **Network**: `Session`, a reader task plus a serialised writer
//! - **Config**: `SessionConfig` loaded from TOML or an `intellisock://` URL
//! - **Error**: `IsockError`, a typed `thiserror`-based error hierarchy

pub mod ack;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod escape;
pub mod flags;
pub mod handshake;
pub mod network;
pub mod opcode;
pub mod packet;
pub mod queue;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use ack::{AckTracker, DEFAULT_MAX_OUTSTANDING};
pub use codec::{CompletedPacket, FrameDecoder, Inbound, IsockCodec, PacketHeader};
pub use command::Control;
pub use config::{
    BaudRate, EndpointConfig, FlowControl, Parity, PortRange, SerialConfig, SessionConfig,
    StopBits, WordLength,
};
pub use error::{FramingAnomaly, IsockError};
pub use escape::{Destuffer, EscapeMode, StatusInsertion};
pub use flags::{ModemControl, ModemStatus};
pub use network::{SerialChannel, Session};
pub use opcode::Opcode;
pub use packet::{
    HEADER_LENGTH, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE, Packet, PacketEncoder, Sequencer,
};
pub use state::{SessionPhase, SessionStats, StatsSnapshot};
