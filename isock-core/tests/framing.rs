//! Framing properties of the device-to-host stream: round trips,
//! escaping, split reads and resynchronisation.

use std::collections::HashSet;

use bytes::Bytes;
use futures::StreamExt;
use isock_core::codec::Phase;
use isock_core::escape::{self, DestuffState};
use isock_core::{
    CompletedPacket, EscapeMode, FrameDecoder, Inbound, IsockCodec, MAX_PAYLOAD_SIZE, Opcode,
    Packet, PacketEncoder, Sequencer,
};
use tokio_util::codec::FramedRead;

// ── Helpers ──────────────────────────────────────────────────────

/// Encode `data` the way a device server would, followed by an empty
/// packet so that a trailing withheld marker is resolved.
fn device_stream(encoder: &mut PacketEncoder, data: &[u8]) -> Vec<u8> {
    let mut wire = Vec::new();
    for packet in encoder.data_packets(data) {
        wire.extend_from_slice(&packet.to_bytes());
    }
    let trailer = Packet::new(0, Opcode::TxData, Bytes::new()).unwrap();
    wire.extend_from_slice(&trailer.to_bytes());
    wire
}

fn split(events: &[Inbound]) -> (Vec<u8>, Vec<CompletedPacket>) {
    let mut data = Vec::new();
    let mut packets = Vec::new();
    for event in events {
        match event {
            Inbound::Data(bytes) => data.extend_from_slice(bytes),
            Inbound::Packet(packet) => packets.push(packet.clone()),
            Inbound::Status(_) | Inbound::Anomaly(_) => {}
        }
    }
    (data, packets)
}

/// A payload that exercises marker runs of every length up to three.
fn marker_heavy(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| match i % 11 {
            2 | 5 | 6 | 8 | 9 | 10 => 0x1B,
            n => b'a' + n as u8,
        })
        .collect()
}

// ── Round trip ───────────────────────────────────────────────────

#[test]
fn test_round_trip_every_length() {
    let mut encoder = PacketEncoder::new(EscapeMode::Stuffed);
    for len in 0..=MAX_PAYLOAD_SIZE {
        let data = marker_heavy(len);
        let wire = device_stream(&mut encoder, &data);

        let mut decoder = FrameDecoder::new();
        let (got, packets) = split(&decoder.feed(&wire));
        assert_eq!(got, data, "length {len}");
        assert!(packets.iter().all(|p| p.opcode() == Some(Opcode::TxData)));
        assert_eq!(decoder.phase(), &Phase::ReadingHeader { markers: 0 });
    }
}

#[test]
fn test_escape_idempotence() {
    for markers in 0..=3 {
        let mut data = b"xx".to_vec();
        data.extend(std::iter::repeat_n(0x1B, markers));
        data.extend_from_slice(b"yy");

        let stuffed = escape::stuff(&data);
        let packet = Packet::new(1, Opcode::TxData, stuffed.freeze()).unwrap();

        let mut decoder = FrameDecoder::new();
        let (got, _) = split(&decoder.feed(&packet.to_bytes()));
        assert_eq!(got, data, "{markers} markers");
        assert_eq!(decoder.destuff_state(), DestuffState::Normal);
    }
}

#[test]
fn test_three_markers_mid_payload() {
    let mut encoder = PacketEncoder::new(EscapeMode::Stuffed);
    let wire = device_stream(&mut encoder, b"AB\x1B\x1B\x1BCD");
    let mut decoder = FrameDecoder::new();
    let (got, _) = split(&decoder.feed(&wire));
    assert_eq!(got, b"AB\x1B\x1B\x1BCD");
}

// ── Split reads ──────────────────────────────────────────────────

#[test]
fn test_byte_at_a_time_matches_whole() {
    let mut encoder = PacketEncoder::new(EscapeMode::Stuffed);
    let data = marker_heavy(4000);
    let wire = device_stream(&mut encoder, &data);

    // Stop at the end, mid-header, mid-parameters and inside escapes.
    let cuts = [wire.len(), 1, 5, 14, 16, 17, 1000, wire.len() - 3];
    for cut in cuts {
        let wire = &wire[..cut];

        let mut whole = FrameDecoder::new();
        let (whole_data, whole_packets) = split(&whole.feed(wire));

        let mut bytewise = FrameDecoder::new();
        let mut events = Vec::new();
        for byte in wire {
            events.extend(bytewise.feed(std::slice::from_ref(byte)));
        }
        let (byte_data, byte_packets) = split(&events);

        assert_eq!(byte_data, whole_data, "cut at {cut}");
        assert_eq!(byte_packets, whole_packets, "cut at {cut}");
        assert_eq!(bytewise.phase(), whole.phase(), "cut at {cut}");
        assert_eq!(bytewise.destuff_state(), whole.destuff_state(), "cut at {cut}");
    }

    let mut whole = FrameDecoder::new();
    let (whole_data, _) = split(&whole.feed(&wire));
    assert_eq!(whole_data, data);
}

#[tokio::test]
async fn test_framed_read_across_socket_reads() {
    let first = Packet::new(1, Opcode::TxData, &b"hello"[..]).unwrap().to_bytes();
    let second = Packet::new(2, Opcode::TxData, &b"world"[..]).unwrap().to_bytes();

    // Split inside the first header and inside the second payload.
    let mock = tokio_test::io::Builder::new()
        .read(&first[..2])
        .read(&first[2..])
        .read(&second[..12])
        .read(&second[12..])
        .build();

    let mut frames = FramedRead::new(mock, IsockCodec::new());
    let mut events = Vec::new();
    while let Some(event) = frames.next().await {
        events.push(event.unwrap());
    }

    let (data, packets) = split(&events);
    assert_eq!(data, b"helloworld");
    let sequences: Vec<u16> = packets.iter().map(|p| p.header.sequence).collect();
    assert_eq!(sequences, [1, 2]);
}

// ── Resynchronisation ────────────────────────────────────────────

#[test]
fn test_resync_after_garbage() {
    let mut wire = b"\x00noise\x1B\x1Bz\x1Bjunk".to_vec();
    wire.extend_from_slice(&Packet::new(9, Opcode::TxData, &b"ok"[..]).unwrap().to_bytes());

    let mut decoder = FrameDecoder::new();
    let (data, packets) = split(&decoder.feed(&wire));
    assert_eq!(data, b"ok");
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].header.sequence, 9);
}

#[test]
fn test_unknown_opcode_and_oversized_length() {
    // Unknown opcode 0x7F with a 2-byte payload, then an oversized header.
    let mut wire = vec![0x1B, 0x1B, 0x1B, 0x00, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x02, 0xAA, 0xBB];
    wire.extend_from_slice(&[0x1B, 0x1B, 0x1B, 0x00, 0x00, 0x02, 0x44, 0x00, 0xFF, 0xFF]);
    wire.extend_from_slice(&Packet::new(3, Opcode::TxData, &b"z"[..]).unwrap().to_bytes());

    let mut decoder = FrameDecoder::new();
    let events = decoder.feed(&wire);
    let anomalies = events
        .iter()
        .filter(|e| matches!(e, Inbound::Anomaly(_)))
        .count();
    assert_eq!(anomalies, 2);

    let (data, packets) = split(&events);
    assert_eq!(data, b"z");
    assert_eq!(packets.last().map(|p| p.header.sequence), Some(3));
}

// ── Sequencing ───────────────────────────────────────────────────

#[test]
fn test_sequence_wraps_without_ffff() {
    let mut seq = Sequencer::new();
    assert_eq!(seq.advance(), 1);

    let mut seq = Sequencer::new();
    let mut seen = HashSet::new();
    let mut previous = 0u16;
    for i in 0..0x10000u32 {
        let next = seq.advance();
        assert_ne!(next, 0xFFFF);
        if previous == 0xFFFE {
            assert_eq!(next, 0);
        } else {
            assert_eq!(next, previous + 1);
        }
        // No repeats before the counter has been all the way round.
        if i < 0xFFFE {
            assert!(seen.insert(next), "{next:#06x} repeated");
        }
        previous = next;
    }
    assert_eq!(seen.len(), 0xFFFE);
}
