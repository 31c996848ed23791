//! Inbound byte queue between the reader task and application reads.
//!
//! The reader task sends each decoded chunk over an unbounded mpsc
//! channel. Readers drain chunks into a local buffer so that a read can
//! return part of a chunk and keep the rest for the next call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::IsockError;

/// Receiving half plus bytes already taken off the channel.
#[derive(Debug)]
struct Inbox {
    rx: mpsc::UnboundedReceiver<Bytes>,
    buf: BytesMut,
}

impl Inbox {
    /// Move every chunk already queued into `buf`.
    fn drain(&mut self) {
        while let Ok(chunk) = self.rx.try_recv() {
            self.buf.extend_from_slice(&chunk);
        }
    }
}

/// Byte queue with a single producer (the reader task) and any number
/// of consumers. Consumers are served one at a time.
#[derive(Debug)]
pub struct InboundQueue {
    /// `None` once closed.
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    inbox: tokio::sync::Mutex<Inbox>,
    /// Bytes pushed and not yet read or cleared.
    pending: AtomicUsize,
}

impl Default for InboundQueue {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            inbox: tokio::sync::Mutex::new(Inbox {
                rx,
                buf: BytesMut::new(),
            }),
            pending: AtomicUsize::new(0),
        }
    }
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Bytes>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let tx = self.sender();
        if let Some(tx) = tx.as_ref() {
            self.pending.fetch_add(data.len(), Ordering::AcqRel);
            if tx.send(Bytes::copy_from_slice(data)).is_err() {
                self.pending.fetch_sub(data.len(), Ordering::AcqRel);
            }
        }
    }

    /// No more bytes will arrive. Buffered bytes stay readable.
    pub fn close(&self) {
        self.sender().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender().is_none()
    }

    /// Bytes ready to read.
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard everything buffered, returning how much was dropped.
    /// Waits for a read in progress to finish.
    pub async fn clear(&self) -> usize {
        let mut inbox = self.inbox.lock().await;
        inbox.drain();
        let n = inbox.buf.len();
        inbox.buf.clear();
        self.pending.fetch_sub(n, Ordering::AcqRel);
        n
    }

    fn take(&self, buf: &mut BytesMut, max: usize) -> Bytes {
        let n = buf.len().min(max);
        self.pending.fetch_sub(n, Ordering::AcqRel);
        buf.split_to(n).freeze()
    }

    /// Read up to `max` bytes.
    ///
    /// Waits until `max` bytes are buffered or `timeout` elapses; on
    /// timeout whatever arrived is returned, possibly nothing. `None`
    /// waits without limit. Fails with [`IsockError::Disconnected`] only
    /// when the queue is closed and empty.
    pub async fn read(&self, max: usize, timeout: Option<Duration>) -> Result<Bytes, IsockError> {
        if max == 0 {
            return Ok(Bytes::new());
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut inbox = self.inbox.lock().await;
        let Inbox { rx, buf } = &mut *inbox;
        loop {
            while buf.len() < max {
                match rx.try_recv() {
                    Ok(chunk) => buf.extend_from_slice(&chunk),
                    Err(_) => break,
                }
            }
            if buf.len() >= max {
                return Ok(self.take(buf, max));
            }

            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => return Ok(self.take(buf, max)),
                },
                None => rx.recv().await,
            };
            match next {
                Some(chunk) => buf.extend_from_slice(&chunk),
                None if buf.is_empty() => return Err(IsockError::Disconnected),
                None => return Ok(self.take(buf, max)),
            }
        }
    }
}
