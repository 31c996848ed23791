//! Acknowledgement and flow-control bookkeeping.
//!
//! The device server stops sending once too many of its packets are
//! unacknowledged, so every completed inbound packet that carried a
//! payload is answered with one `PKT_ACK`. The tracker also remembers host data
//! packets so that a device ACK for a sequence never sent can be
//! reported.

use std::collections::VecDeque;
use std::time::Instant;

use crate::command::Control;
use crate::error::FramingAnomaly;

/// Outstanding packet count used until the device negotiates one.
pub const DEFAULT_MAX_OUTSTANDING: u16 = 16;

/// Host data packets remembered while awaiting the device's ACK.
/// Well below the sequence space, so a number is forgotten long before
/// the counter comes back round to it.
pub const SENT_HISTORY: usize = 1024;

/// A host data packet awaiting the device's acknowledgement.
#[derive(Debug, Clone, Copy)]
pub struct SentPacket {
    pub length: u16,
    pub sent_at: Instant,
}

/// Result of recording an inbound data packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// The acknowledgement to send.
    pub ack: Control,
    /// Set when the device exceeded the negotiated bound.
    pub anomaly: Option<FramingAnomaly>,
}

#[derive(Debug)]
pub struct AckTracker {
    /// Count the host advertises in `MX_OST_PKTS`.
    local_max: u16,
    /// Count agreed with the device, once it replied.
    negotiated: Option<u16>,
    /// Inbound packets received but not yet acknowledged, oldest first.
    outstanding: VecDeque<(u16, u16)>,
    /// Host data packets awaiting an ACK, oldest first.
    sent: VecDeque<(u16, SentPacket)>,
    acks_sent: u64,
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_OUTSTANDING)
    }
}

impl AckTracker {
    pub fn new(local_max: u16) -> Self {
        Self {
            local_max: local_max.max(1),
            negotiated: None,
            outstanding: VecDeque::new(),
            sent: VecDeque::new(),
            acks_sent: 0,
        }
    }

    // ── Negotiation ──────────────────────────────────────────────

    pub fn local_max(&self) -> u16 {
        self.local_max
    }

    pub fn set_local_max(&mut self, count: u16) {
        self.local_max = count.max(1);
    }

    /// The bound currently in force.
    pub fn max_outstanding(&self) -> u16 {
        self.negotiated.unwrap_or(self.local_max)
    }

    pub fn negotiated(&self) -> Option<u16> {
        self.negotiated
    }

    /// Take the smaller of both sides' counts. A device count of zero
    /// means it imposes no limit of its own.
    pub fn negotiate(&mut self, remote: u16) -> u16 {
        let agreed = match remote {
            0 => self.local_max,
            n => self.local_max.min(n),
        };
        self.negotiated = Some(agreed);
        agreed
    }

    // ── Inbound ──────────────────────────────────────────────────

    /// Record a completed inbound data packet.
    pub fn receive(&mut self, sequence: u16, length: u16) -> Receipt {
        self.outstanding.push_back((sequence, length));
        let max = self.max_outstanding();
        let anomaly = (self.outstanding.len() > max as usize).then(|| {
            FramingAnomaly::OutstandingExceeded {
                outstanding: self.outstanding.len(),
                max,
            }
        });
        Receipt {
            ack: Control::Ack { sequence, length },
            anomaly,
        }
    }

    /// The ACK for `sequence` went out on the wire.
    pub fn acknowledged(&mut self, sequence: u16) {
        if let Some(pos) = self.outstanding.iter().position(|(s, _)| *s == sequence) {
            self.outstanding.remove(pos);
        }
        self.acks_sent += 1;
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn acks_sent(&self) -> u64 {
        self.acks_sent
    }

    // ── Outbound ─────────────────────────────────────────────────

    /// Remember a host data packet written to the device. Returns the
    /// sequence of the oldest entry if the history was full.
    pub fn record_sent(&mut self, sequence: u16, length: u16) -> Option<u16> {
        let evicted = if self.sent.len() >= SENT_HISTORY {
            self.sent.pop_front().map(|(seq, _)| seq)
        } else {
            None
        };
        self.sent.push_back((
            sequence,
            SentPacket {
                length,
                sent_at: Instant::now(),
            },
        ));
        evicted
    }

    /// Handle a `PKT_ACK` from the device.
    pub fn remote_ack(&mut self, sequence: u16, length: u16) -> Result<SentPacket, FramingAnomaly> {
        self.sent
            .iter()
            .position(|(seq, _)| *seq == sequence)
            .and_then(|pos| self.sent.remove(pos))
            .map(|(_, packet)| packet)
            .ok_or(FramingAnomaly::UnknownAck { sequence, length })
    }

    /// Host data packets the device has not acknowledged yet.
    pub fn unacknowledged_sent(&self) -> usize {
        self.sent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_produces_matching_ack() {
        let mut t = AckTracker::default();
        let receipt = t.receive(7, 4);
        assert_eq!(
            receipt.ack,
            Control::Ack {
                sequence: 7,
                length: 4
            }
        );
        assert!(receipt.anomaly.is_none());
        assert_eq!(t.outstanding(), 1);
        t.acknowledged(7);
        assert_eq!(t.outstanding(), 0);
        assert_eq!(t.acks_sent(), 1);
    }

    #[test]
    fn exceeding_bound_is_reported() {
        let mut t = AckTracker::new(2);
        assert!(t.receive(1, 1).anomaly.is_none());
        assert!(t.receive(2, 1).anomaly.is_none());
        assert_eq!(
            t.receive(3, 1).anomaly,
            Some(FramingAnomaly::OutstandingExceeded {
                outstanding: 3,
                max: 2
            })
        );
    }

    #[test]
    fn negotiation_takes_minimum() {
        let mut t = AckTracker::new(16);
        assert_eq!(t.max_outstanding(), 16);
        assert_eq!(t.negotiate(4), 4);
        assert_eq!(t.max_outstanding(), 4);
        assert_eq!(t.negotiate(0), 16);
        assert_eq!(t.negotiate(64), 16);
    }

    #[test]
    fn sent_history_is_bounded() {
        let mut t = AckTracker::default();
        let mut seq = crate::packet::Sequencer::new();
        let mut evicted = Vec::new();
        // Twice round the sequence space with no ACK from the device.
        for _ in 0..0x20000u32 {
            if let Some(old) = t.record_sent(seq.advance(), 1) {
                evicted.push(old);
            }
        }
        assert_eq!(t.unacknowledged_sent(), SENT_HISTORY);
        assert_eq!(evicted.first(), Some(&1));

        // The most recent packet is still known; a long-forgotten one is not.
        let last = seq.last();
        assert!(t.remote_ack(last, 1).is_ok());
        let stale = last.wrapping_sub(SENT_HISTORY as u16 + 10);
        assert!(t.remote_ack(stale, 1).is_err());
    }

    #[test]
    fn remote_ack_for_unknown_sequence() {
        let mut t = AckTracker::default();
        t.record_sent(1, 10);
        assert_eq!(t.remote_ack(1, 10).unwrap().length, 10);
        assert_eq!(
            t.remote_ack(1, 10).unwrap_err(),
            FramingAnomaly::UnknownAck {
                sequence: 1,
                length: 10
            }
        );
        assert_eq!(t.unacknowledged_sent(), 0);
    }
}
