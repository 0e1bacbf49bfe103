//! Bounded hand-off between producer threads and the single writer task.
//!
//! Producers never wait: a full buffer drops the line. The drop is reported
//! through `tracing` at most once per cooldown window so that an overload
//! does not produce a second flood of diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TrySendError};

/// Minimum spacing between two overflow notices.
pub const DEFAULT_OVERFLOW_NOTICE_COOLDOWN: Duration = Duration::from_secs(5);

/// Bytes accumulated by the consumer before it issues a write.
pub const DEFAULT_BATCH_BYTES: usize = 16 * 1024;

/// Create a buffer holding at most `capacity` lines.
pub fn channel(capacity: usize, cooldown: Duration) -> (WriteBuffer, BufferReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let buffer = WriteBuffer {
        sender,
        cooldown,
        epoch: Instant::now(),
        last_notice_ms: AtomicU64::new(0),
        enqueued: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
        notices: AtomicU64::new(0),
    };
    let receiver = BufferReceiver {
        receiver,
        batch_bytes: DEFAULT_BATCH_BYTES,
    };
    (buffer, receiver)
}

/// Producer half.
#[derive(Debug)]
pub struct WriteBuffer {
    sender: mpsc::Sender<Vec<u8>>,
    cooldown: Duration,
    epoch: Instant,
    /// Milliseconds since `epoch` (plus one) of the last notice; 0 = never.
    last_notice_ms: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    notices: AtomicU64,
}

impl WriteBuffer {
    /// Queue a line without blocking. Returns `false` if it was dropped.
    pub fn try_enqueue(&self, line: Vec<u8>) -> bool {
        match self.sender.try_send(line) {
            Ok(()) => {
                self.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(line)) => {
                self.on_drop(&line, "log buffer is full, dropping line");
                false
            }
            Err(TrySendError::Closed(line)) => {
                self.on_drop(&line, "log writer has stopped, dropping line");
                false
            }
        }
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of overflow notices emitted so far.
    pub fn overflow_notices(&self) -> u64 {
        self.notices.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn on_drop(&self, line: &[u8], reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        if !self.claim_notice() {
            return;
        }
        self.notices.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            target: "logroll::diag",
            dropped_total = self.dropped(),
            content = %String::from_utf8_lossy(line).trim_end(),
            "{reason}"
        );
    }

    /// Returns true for exactly one caller per cooldown window.
    fn claim_notice(&self) -> bool {
        let now = self.epoch.elapsed().as_millis() as u64 + 1;
        let last = self.last_notice_ms.load(Ordering::Relaxed);
        if last != 0 && now.saturating_sub(last) < self.cooldown.as_millis() as u64 {
            return false;
        }
        self.last_notice_ms
            .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

/// Consumer half, owned by the writer task.
#[derive(Debug)]
pub struct BufferReceiver {
    receiver: mpsc::Receiver<Vec<u8>>,
    batch_bytes: usize,
}

impl BufferReceiver {
    pub fn with_batch_bytes(mut self, batch_bytes: usize) -> Self {
        self.batch_bytes = batch_bytes.max(1);
        self
    }

    /// Wait for the next line. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }

    /// Append already-queued lines to `batch` until it reaches the batch
    /// ceiling, the queue is empty, or `max_lines` have been taken.
    ///
    /// Returns the number of lines appended.
    pub fn fill_batch(&mut self, batch: &mut Vec<u8>, max_lines: usize) -> usize {
        let mut taken = 0;
        while taken < max_lines && batch.len() < self.batch_bytes {
            match self.receiver.try_recv() {
                Ok(line) => {
                    batch.extend_from_slice(&line);
                    taken += 1;
                }
                Err(_) => break,
            }
        }
        taken
    }

    /// Lines currently queued.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_exactly_the_excess_line() {
        let (buffer, mut rx) = channel(4, DEFAULT_OVERFLOW_NOTICE_COOLDOWN);

        let accepted: Vec<bool> = (0..5).map(|i| buffer.try_enqueue(format!("{i}\n").into_bytes())).collect();

        assert_eq!(accepted, vec![true, true, true, true, false]);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.overflow_notices(), 1);

        let mut batch = Vec::new();
        assert_eq!(rx.fill_batch(&mut batch, usize::MAX), 4);
        assert_eq!(batch, b"0\n1\n2\n3\n");
    }

    #[test]
    fn notices_are_rate_limited_within_the_window() {
        let (buffer, _rx) = channel(1, Duration::from_secs(60));
        assert!(buffer.try_enqueue(b"keep\n".to_vec()));

        for _ in 0..100 {
            assert!(!buffer.try_enqueue(b"drop\n".to_vec()));
        }

        assert_eq!(buffer.dropped(), 100);
        assert_eq!(buffer.overflow_notices(), 1);
    }

    #[test]
    fn notice_is_repeated_after_the_window() {
        let (buffer, _rx) = channel(1, Duration::ZERO);
        buffer.try_enqueue(b"keep\n".to_vec());
        buffer.try_enqueue(b"drop\n".to_vec());
        std::thread::sleep(Duration::from_millis(5));
        buffer.try_enqueue(b"drop\n".to_vec());

        assert_eq!(buffer.overflow_notices(), 2);
    }

    #[test]
    fn batches_stop_at_the_byte_ceiling() {
        let (buffer, rx) = channel(16, DEFAULT_OVERFLOW_NOTICE_COOLDOWN);
        let mut rx = rx.with_batch_bytes(8);
        for _ in 0..6 {
            buffer.try_enqueue(b"abcd\n".to_vec());
        }

        let mut batch = Vec::new();
        assert_eq!(rx.fill_batch(&mut batch, usize::MAX), 2);
        assert_eq!(rx.len(), 4);

        let mut rest = Vec::new();
        assert_eq!(rx.fill_batch(&mut rest, 1), 1);
        assert_eq!(rx.len(), 3);
    }

    #[test]
    fn closed_receiver_counts_as_drop() {
        let (buffer, rx) = channel(4, DEFAULT_OVERFLOW_NOTICE_COOLDOWN);
        drop(rx);
        assert!(!buffer.try_enqueue(b"late\n".to_vec()));
        assert!(buffer.is_closed());
        assert_eq!(buffer.dropped(), 1);
    }
}
