//! Lifecycle of an Intellisock session, from connect to teardown.

use std::time::Instant;

use crate::error::IsockError;

// ── SessionPhase ─────────────────────────────────────────────────

/// The current phase of an Intellisock session.
///
/// ```text
///  Idle ──► Connecting ──► Configuring ──► Open ──► Closing ──► Closed
///               │               │            │                    ▲
///               └───────────────┴────────────┴──── (failure) ─────┘
/// ```
///
/// `Closed` is terminal: a session is never reopened.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Nothing attempted yet.
    #[default]
    Idle,

    /// Waiting for the device server to accept the TCP connection.
    Connecting,

    /// Connected; UART configuration commands are going out.
    Configuring,

    /// UART open; data flows both ways.
    Open {
        /// When `OPEN` was sent.
        since: Instant,
    },

    /// `close()` in progress.
    Closing,

    /// Torn down by `close()` or by a fatal socket error.
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Configuring => write!(f, "Configuring"),
            Self::Open { .. } => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionPhase {
    /// Application reads and writes are allowed.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Packets may be sent: during the handshake or once open.
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Configuring | Self::Open { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// How long the session has been open. `None` for any other phase.
    pub fn open_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Open { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn begin_connect(&mut self) -> Result<(), IsockError> {
        match self {
            Self::Idle => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(IsockError::ProtocolViolation(
                "cannot connect: session already used",
            )),
        }
    }

    /// Valid from: `Connecting`.
    pub fn begin_configure(&mut self) -> Result<(), IsockError> {
        match self {
            Self::Connecting => {
                *self = Self::Configuring;
                Ok(())
            }
            _ => Err(IsockError::ProtocolViolation(
                "cannot configure: not in Connecting state",
            )),
        }
    }

    /// Valid from: `Configuring`.
    pub fn complete_open(&mut self) -> Result<(), IsockError> {
        match self {
            Self::Configuring => {
                *self = Self::Open {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(IsockError::ProtocolViolation(
                "cannot open: not in Configuring state",
            )),
        }
    }

    /// Valid from: `Configuring`, `Open`.
    pub fn begin_close(&mut self) -> Result<(), IsockError> {
        match self {
            Self::Configuring | Self::Open { .. } => {
                *self = Self::Closing;
                Ok(())
            }
            _ => Err(IsockError::NotOpen),
        }
    }

    /// Valid from: `Closing`.
    pub fn finish_close(&mut self) -> Result<(), IsockError> {
        match self {
            Self::Closing => {
                *self = Self::Closed;
                Ok(())
            }
            _ => Err(IsockError::ProtocolViolation(
                "cannot finish close: not in Closing state",
            )),
        }
    }

    /// The socket failed; no further transition is possible.
    pub fn force_close(&mut self) {
        *self = Self::Closed;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = SessionPhase::default();

        phase.begin_connect().unwrap();
        assert_eq!(phase, SessionPhase::Connecting);

        phase.begin_configure().unwrap();
        assert!(phase.is_writable());
        assert!(!phase.is_open());

        phase.complete_open().unwrap();
        assert!(phase.is_open());
        assert!(phase.open_duration().is_some());

        phase.begin_close().unwrap();
        assert_eq!(phase, SessionPhase::Closing);

        phase.finish_close().unwrap();
        assert!(phase.is_closed());
    }

    #[test]
    fn closed_is_terminal() {
        let mut phase = SessionPhase::Closed;
        assert!(phase.begin_connect().is_err());
        assert!(matches!(phase.begin_close(), Err(IsockError::NotOpen)));
    }

    #[test]
    fn invalid_transition_open_from_connecting() {
        let mut phase = SessionPhase::Connecting;
        assert!(phase.complete_open().is_err());
    }

    #[test]
    fn force_close_from_any_state() {
        let mut phase = SessionPhase::Open {
            since: Instant::now(),
        };
        phase.force_close();
        assert!(phase.is_closed());
        assert!(!phase.is_writable());
    }

    #[test]
    fn display_format() {
        assert_eq!(SessionPhase::Idle.to_string(), "Idle");
        assert_eq!(SessionPhase::Configuring.to_string(), "Configuring");
        assert_eq!(
            SessionPhase::Open {
                since: Instant::now()
            }
            .to_string(),
            "Open"
        );
        assert_eq!(SessionPhase::Closed.to_string(), "Closed");
    }
}
