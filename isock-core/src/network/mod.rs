//! TCP transport for Intellisock sessions.

mod session;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IsockError;

pub use session::Session;

/// Byte-stream operations of a remote serial port, independent of the
/// transport behind it.
#[async_trait]
pub trait SerialChannel: Send + Sync {
    /// Read up to `max` bytes, waiting at most `timeout`.
    async fn read(&self, max: usize, timeout: Option<Duration>) -> Result<Bytes, IsockError>;

    /// Write all of `data`, returning the count accepted.
    async fn write(&self, data: &[u8]) -> Result<usize, IsockError>;

    async fn close(&self) -> Result<(), IsockError>;

    async fn set_break(&self, on: bool) -> Result<(), IsockError>;

    async fn send_immediate(&self, byte: u8) -> Result<(), IsockError>;

    async fn flush_input(&self) -> Result<(), IsockError>;

    async fn flush_output(&self) -> Result<(), IsockError>;

    /// Bytes ready to read without waiting.
    fn in_waiting(&self) -> Result<usize, IsockError>;
}

#[async_trait]
impl SerialChannel for Session {
    async fn read(&self, max: usize, timeout: Option<Duration>) -> Result<Bytes, IsockError> {
        Session::read(self, max, timeout).await
    }

    async fn write(&self, data: &[u8]) -> Result<usize, IsockError> {
        Session::write(self, data).await
    }

    async fn close(&self) -> Result<(), IsockError> {
        Session::close(self).await
    }

    async fn set_break(&self, on: bool) -> Result<(), IsockError> {
        Session::set_break(self, on).await
    }

    async fn send_immediate(&self, byte: u8) -> Result<(), IsockError> {
        Session::send_immediate(self, byte).await
    }

    async fn flush_input(&self) -> Result<(), IsockError> {
        Session::flush_input(self).await
    }

    async fn flush_output(&self) -> Result<(), IsockError> {
        Session::flush_output(self).await
    }

    fn in_waiting(&self) -> Result<usize, IsockError> {
        Session::in_waiting(self)
    }
}
