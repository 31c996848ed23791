//! Per-session diagnostic counters.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use crate::opcode::Opcode;

const NO_OPCODE: u16 = u16::MAX;

/// Counters updated by the reader task and the writer path.
#[derive(Debug)]
pub struct SessionStats {
    packets_in: AtomicU64,
    data_bytes_in: AtomicU64,
    packets_out: AtomicU64,
    data_bytes_out: AtomicU64,
    acks_sent: AtomicU64,
    anomalies: AtomicU64,
    status_insertions: AtomicU64,
    last_opcode: AtomicU16,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            packets_in: AtomicU64::new(0),
            data_bytes_in: AtomicU64::new(0),
            packets_out: AtomicU64::new(0),
            data_bytes_out: AtomicU64::new(0),
            acks_sent: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            status_insertions: AtomicU64::new(0),
            last_opcode: AtomicU16::new(NO_OPCODE),
        }
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet_in(&self, opcode: u8) {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
        self.last_opcode.store(opcode as u16, Ordering::Relaxed);
    }

    pub fn data_in(&self, bytes: usize) {
        self.data_bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn packet_out(&self, opcode: Opcode, payload_len: usize) {
        self.packets_out.fetch_add(1, Ordering::Relaxed);
        if opcode.carries_data() {
            self.data_bytes_out
                .fetch_add(payload_len as u64, Ordering::Relaxed);
        }
        if opcode == Opcode::PacketAck {
            self.acks_sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_insertion(&self) {
        self.status_insertions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_opcode.load(Ordering::Relaxed);
        StatsSnapshot {
            packets_in: self.packets_in.load(Ordering::Relaxed),
            data_bytes_in: self.data_bytes_in.load(Ordering::Relaxed),
            packets_out: self.packets_out.load(Ordering::Relaxed),
            data_bytes_out: self.data_bytes_out.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            status_insertions: self.status_insertions.load(Ordering::Relaxed),
            last_opcode: (last != NO_OPCODE).then_some(last as u8),
        }
    }
}

/// A point-in-time copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub packets_in: u64,
    pub data_bytes_in: u64,
    pub packets_out: u64,
    pub data_bytes_out: u64,
    pub acks_sent: u64,
    pub anomalies: u64,
    pub status_insertions: u64,
    /// Raw opcode of the last packet received.
    pub last_opcode: Option<u8>,
}
