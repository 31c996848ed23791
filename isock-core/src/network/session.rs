use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::ack::AckTracker;
use crate::codec::{CompletedPacket, Inbound, IsockCodec};
use crate::command::Control;
use crate::config::SessionConfig;
use crate::error::{FramingAnomaly, IsockError};
use crate::escape::EscapeMode;
use crate::handshake;
use crate::opcode::Opcode;
use crate::packet::{Packet, PacketEncoder};
use crate::queue::InboundQueue;
use crate::state::{SessionPhase, SessionStats, StatsSnapshot};

// ── Writer ───────────────────────────────────────────────────────

/// Everything that must change together when a packet goes out.
struct Writer {
    sink: FramedWrite<OwnedWriteHalf, IsockCodec>,
    encoder: PacketEncoder,
    tracker: AckTracker,
}

impl Writer {
    async fn send(&mut self, packet: Packet, stats: &SessionStats) -> Result<(), IsockError> {
        trace!(?packet, "send");
        let opcode = packet.opcode();
        let len = packet.payload().len();
        self.sink.send(packet).await?;
        stats.packet_out(opcode, len);
        Ok(())
    }
}

// ── Shared ───────────────────────────────────────────────────────

/// State shared by the application handle and the reader task.
struct Shared {
    peer: String,
    writer: tokio::sync::Mutex<Writer>,
    queue: InboundQueue,
    phase: Mutex<SessionPhase>,
    failed: AtomicBool,
    stats: SessionStats,
    cancel: CancellationToken,
}

impl Shared {
    fn phase(&self) -> MutexGuard<'_, SessionPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mid-session socket failure: the session is over.
    fn fail(&self, reason: &dyn std::fmt::Display) {
        if !self.failed.swap(true, Ordering::AcqRel) {
            error!("session {} failed: {reason}", self.peer);
        }
        self.phase().force_close();
        self.queue.close();
        self.cancel.cancel();
    }

    /// Send one packet under the write lock. Any socket error ends the session.
    async fn send(&self, packet: Packet) -> Result<(), IsockError> {
        if !self.phase().is_writable() {
            return Err(IsockError::NotOpen);
        }
        let mut writer = self.writer.lock().await;
        let result = writer.send(packet, &self.stats).await;
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    fn report(&self, anomaly: &FramingAnomaly) {
        self.stats.anomaly();
        warn!("framing anomaly from {}: {anomaly}", self.peer);
    }

    async fn handle(&self, event: Inbound) -> Result<(), IsockError> {
        match event {
            Inbound::Data(bytes) => {
                self.stats.data_in(bytes.len());
                self.queue.push(&bytes);
            }
            Inbound::Status(status) => {
                // Modem status changes are not consumed yet.
                self.stats.status_insertion();
                debug!(
                    "status insertion type {:#04x} value {:#04x}",
                    status.kind, status.value
                );
            }
            Inbound::Anomaly(anomaly) => self.report(&anomaly),
            Inbound::Packet(packet) => self.complete(packet).await?,
        }
        Ok(())
    }

    async fn acknowledge(&self, sequence: u16, length: u16) -> Result<(), IsockError> {
        let mut writer = self.writer.lock().await;
        let receipt = writer.tracker.receive(sequence, length);
        if let Some(anomaly) = &receipt.anomaly {
            self.report(anomaly);
        }
        trace!("{}", receipt.ack);
        if let Err(e) = writer.send(receipt.ack.to_packet(), &self.stats).await {
            drop(writer);
            self.fail(&e);
            return Err(e);
        }
        writer.tracker.acknowledged(sequence);
        Ok(())
    }

    async fn complete(&self, packet: CompletedPacket) -> Result<(), IsockError> {
        let header = packet.header;
        self.stats.packet_in(header.opcode);
        match packet.opcode() {
            Some(op) => debug!("command: {op} seq={} len={}", header.sequence, header.length),
            None => debug!("command: {:#04x} seq={}", header.opcode, header.sequence),
        }

        // Every packet with a data phase is acknowledged, whatever its opcode.
        if header.length > 0 {
            self.acknowledge(header.sequence, header.length).await?;
        }

        match packet.opcode() {
            Some(Opcode::PacketAck) => match read_u16_pair(&packet.payload) {
                Some((sequence, length)) => {
                    let mut writer = self.writer.lock().await;
                    if let Err(anomaly) = writer.tracker.remote_ack(sequence, length) {
                        drop(writer);
                        self.report(&anomaly);
                    }
                }
                None => self.report(&FramingAnomaly::ShortPayload {
                    opcode: Opcode::PacketAck.name(),
                    expected: 4,
                    actual: packet.payload.len(),
                }),
            },
            Some(Opcode::MaxOutstanding) => {
                if packet.payload.len() < 2 {
                    self.report(&FramingAnomaly::ShortPayload {
                        opcode: Opcode::MaxOutstanding.name(),
                        expected: 2,
                        actual: packet.payload.len(),
                    });
                    return Ok(());
                }
                let remote = u16::from_be_bytes([packet.payload[0], packet.payload[1]]);
                let agreed = self.writer.lock().await.tracker.negotiate(remote);
                info!("max outstanding packets: device {remote}, negotiated {agreed}");
            }
            _ => {}
        }
        Ok(())
    }
}

fn read_u16_pair(payload: &[u8]) -> Option<(u16, u16)> {
    match payload {
        [a, b, c, d, ..] => Some((u16::from_be_bytes([*a, *b]), u16::from_be_bytes([*c, *d]))),
        _ => None,
    }
}

/// Drain the socket through the decoder until EOF, error or cancellation.
async fn read_loop(shared: Arc<Shared>, mut frames: FramedRead<OwnedReadHalf, IsockCodec>) {
    debug!("reader task for {} started", shared.peer);
    loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                if shared.handle(event).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                shared.fail(&format_args!("socket error in reader task: {e}"));
                break;
            }
            None => {
                shared.fail(&"device server closed the connection");
                break;
            }
        }
    }
    shared.queue.close();
    debug!("reader task for {} terminated", shared.peer);
}

// ── Session ──────────────────────────────────────────────────────

/// An open Intellisock channel to one remote UART.
///
/// # Lifetime
///
/// [`open`](Self::open) connects, starts the reader task and runs the
/// configuration handshake. [`close`](Self::close) stops the reader,
/// tells the device to close the UART and shuts the socket down. A
/// closed or failed session is never reopened; build a new one.
pub struct Session {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    config: SessionConfig,
}

impl Session {
    /// Connect to the device server and open the UART.
    pub async fn open(config: SessionConfig) -> Result<Self, IsockError> {
        // Configuration errors must surface before any packet is sent.
        config.validate()?;
        let steps = handshake::configuration_sequence(&config.serial)?;

        let mut phase = SessionPhase::default();
        phase.begin_connect()?;

        let address = config.endpoint.address();
        let timeout = config.endpoint.network_timeout();
        debug!("opening socket to {address}");
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(IsockError::Connection(e)),
            Err(_) => return Err(IsockError::Timeout(timeout)),
        };
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        phase.begin_configure()?;
        let shared = Arc::new(Shared {
            peer: address,
            writer: tokio::sync::Mutex::new(Writer {
                sink: FramedWrite::new(write_half, IsockCodec::new()),
                encoder: PacketEncoder::new(EscapeMode::Raw),
                tracker: AckTracker::new(config.max_outstanding),
            }),
            queue: InboundQueue::new(),
            phase: Mutex::new(phase),
            failed: AtomicBool::new(false),
            stats: SessionStats::new(),
            cancel: CancellationToken::new(),
        });

        let reader = tokio::spawn(read_loop(
            Arc::clone(&shared),
            FramedRead::new(read_half, IsockCodec::new()),
        ));
        let session = Self {
            shared,
            reader: Mutex::new(Some(reader)),
            config,
        };

        if let Err(e) = session.configure(&steps).await {
            session.shared.fail(&e);
            session.join_reader().await;
            return Err(e);
        }
        info!("intellisock session {} open", session.shared.peer);
        Ok(session)
    }

    /// Parse an `intellisock://host:port` URL and open it with default
    /// serial settings.
    pub async fn open_url(url: &str) -> Result<Self, IsockError> {
        Self::open(SessionConfig::from_url(url)?).await
    }

    async fn configure(&self, steps: &[Control]) -> Result<(), IsockError> {
        for step in steps {
            debug!("handshake: {step}");
            self.shared.send(step.to_packet()).await?;
        }
        self.shared.phase().complete_open()?;

        // Clean start.
        for step in handshake::post_open_sequence() {
            self.control(step).await?;
        }
        self.shared.queue.clear().await;
        Ok(())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.phase().clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.phase().is_open()
    }

    fn ensure_open(&self) -> Result<(), IsockError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(IsockError::NotOpen)
        }
    }

    /// Bytes buffered locally and ready to read.
    pub fn in_waiting(&self) -> Result<usize, IsockError> {
        self.ensure_open()?;
        Ok(self.shared.queue.len())
    }

    /// Read up to `max` bytes, waiting at most `timeout` (`None` waits
    /// for all `max` bytes). A short result on timeout is not an error.
    ///
    /// After a connection failure, bytes received before it can still
    /// be drained; then reads fail with [`IsockError::Disconnected`].
    pub async fn read(&self, max: usize, timeout: Option<Duration>) -> Result<Bytes, IsockError> {
        if !self.is_open() && !self.shared.failed.load(Ordering::Acquire) {
            return Err(IsockError::NotOpen);
        }
        self.shared.queue.read(max, timeout).await
    }

    /// Send `data` as one or more `TX_DATA` packets.
    pub async fn write(&self, data: &[u8]) -> Result<usize, IsockError> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(0);
        }

        let mut writer = self.shared.writer.lock().await;
        for packet in writer.encoder.data_packets(data) {
            let sequence = packet.sequence();
            let length = packet.payload().len() as u16;
            trace!("writing to {}: sequence:{sequence} size:{length}", self.shared.peer);
            if let Err(e) = writer.send(packet, &self.shared.stats).await {
                drop(writer);
                self.shared.fail(&e);
                return Err(e);
            }
            if let Some(old) = writer.tracker.record_sent(sequence, length) {
                debug!("no ACK for sequence {old} from {}; forgotten", self.shared.peer);
            }
        }
        Ok(data.len())
    }

    async fn control(&self, ctrl: Control) -> Result<(), IsockError> {
        self.ensure_open()?;
        debug!("send {ctrl}");
        self.shared.send(ctrl.to_packet()).await
    }

    /// Set or clear the break condition on the remote TXD line.
    pub async fn set_break(&self, on: bool) -> Result<(), IsockError> {
        self.control(Control::Break(on)).await
    }

    /// Hold break for `duration`, then return to idle.
    pub async fn send_break(&self, duration: Duration) -> Result<(), IsockError> {
        self.set_break(true).await?;
        tokio::time::sleep(duration).await;
        self.set_break(false).await
    }

    /// Transmit one character ahead of queued data.
    pub async fn send_immediate(&self, byte: u8) -> Result<(), IsockError> {
        self.control(Control::TxImmediate(byte)).await
    }

    /// Flush the device receive FIFO and drop locally buffered bytes.
    pub async fn flush_input(&self) -> Result<(), IsockError> {
        self.control(Control::RxFlush).await?;
        let dropped = self.shared.queue.clear().await;
        if dropped > 0 {
            debug!("flush input discarded {dropped} buffered bytes");
        }
        Ok(())
    }

    /// Abort pending output in the device transmit FIFO.
    pub async fn flush_output(&self) -> Result<(), IsockError> {
        self.control(Control::TxFlush).await
    }

    /// Connection integrity check; restarts the device heartbeat timer.
    pub async fn connection_check(&self) -> Result<(), IsockError> {
        self.control(Control::ConnectionCheck).await
    }

    /// Advertise how many unacknowledged packets the host tolerates.
    /// The device answers with its own count; the smaller one applies.
    pub async fn request_max_outstanding(&self, count: u16) -> Result<(), IsockError> {
        self.ensure_open()?;
        let mut writer = self.shared.writer.lock().await;
        writer.tracker.set_local_max(count);
        let result = writer
            .send(Control::MaxOutstanding(count).to_packet(), &self.shared.stats)
            .await;
        drop(writer);
        if let Err(e) = &result {
            self.shared.fail(e);
        }
        result
    }

    /// The outstanding packet bound currently in force.
    pub async fn max_outstanding(&self) -> u16 {
        self.shared.writer.lock().await.tracker.max_outstanding()
    }

    /// Host data packets not yet acknowledged by the device.
    pub async fn unacknowledged_sent(&self) -> usize {
        self.shared.writer.lock().await.tracker.unacknowledged_sent()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Stop the reader, send `CLOSE` if the socket is still usable and
    /// shut the socket down.
    ///
    /// Callers must not have reads or writes in flight. Closing a
    /// session that failed only releases its resources.
    pub async fn close(&self) -> Result<(), IsockError> {
        let viable = {
            let mut phase = self.shared.phase();
            match phase.begin_close() {
                Ok(()) => true,
                Err(_) if self.shared.failed.load(Ordering::Acquire) => false,
                Err(e) => return Err(e),
            }
        };

        self.shared.cancel.cancel();
        self.join_reader().await;

        let mut result = Ok(());
        if viable {
            let mut writer = self.shared.writer.lock().await;
            info!("send close to {}", self.shared.peer);
            result = writer
                .send(Control::Close.to_packet(), &self.shared.stats)
                .await;
            if let Err(e) = SinkExt::<Packet>::close(&mut writer.sink).await {
                error!("close error: {e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        {
            // The reader may have seen EOF between begin_close and cancel.
            let mut phase = self.shared.phase();
            if phase.finish_close().is_err() {
                phase.force_close();
            }
        }

        self.shared.queue.close();
        result
    }

    async fn join_reader(&self) {
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            let timeout = self.config.endpoint.network_timeout();
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                warn!("reader task did not stop within {timeout:?}; aborting");
                handle.abort();
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.shared.peer)
            .field("phase", &self.phase())
            .finish()
    }
}
