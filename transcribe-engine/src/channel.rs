//! Producer/consumer channel between capture and the streaming analyzer.
//!
//! Single producer (the converting feed task), single consumer (the
//! analyzer intake), FIFO delivery, closed by dropping the sender. The
//! channel never blocks the producer: by default it is unbounded, and an
//! optional explicit bound drops the newest buffer instead of stalling the
//! audio thread. Drops are counted so the loss is observable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::format::AudioBuffer;

/// Create an analyzer input channel.
///
/// `bound` of `None` buffers without limit; `Some(n)` drops buffers
/// published while `n` are already queued.
pub fn analyzer_channel(bound: Option<usize>) -> (InputSender, InputReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        InputSender {
            tx,
            depth: Arc::clone(&depth),
            dropped: Arc::new(AtomicUsize::new(0)),
            bound,
        },
        InputReceiver { rx, depth },
    )
}

/// Producer end. Dropping it signals end of input to the consumer.
#[derive(Clone)]
pub struct InputSender {
    tx: mpsc::UnboundedSender<AudioBuffer>,
    depth: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
    bound: Option<usize>,
}

impl InputSender {
    /// Publish one buffer. Returns `false` when the buffer was dropped,
    /// either by the overflow policy or because the consumer is gone.
    pub fn publish(&self, buffer: AudioBuffer) -> bool {
        if let Some(bound) = self.bound {
            if self.depth.load(Ordering::Acquire) >= bound {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!("analyzer intake full ({bound} buffers queued), dropping newest ({total} dropped)");
                return false;
            }
        }
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(buffer).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Buffers published but not yet consumed.
    pub fn queued(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Buffers dropped by the overflow policy.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer end, held by the analyzer intake.
pub struct InputReceiver {
    rx: mpsc::UnboundedReceiver<AudioBuffer>,
    depth: Arc<AtomicUsize>,
}

impl InputReceiver {
    /// Receive the next buffer; `None` once the producer closed and the
    /// queue drained.
    pub async fn recv(&mut self) -> Option<AudioBuffer> {
        let buffer = self.rx.recv().await;
        if buffer.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        buffer
    }

    /// Blocking receive for analyzer workers living off the async runtime.
    pub fn blocking_recv(&mut self) -> Option<AudioBuffer> {
        let buffer = self.rx.blocking_recv();
        if buffer.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        buffer
    }
}
