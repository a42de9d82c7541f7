//! The two halves of a connection as the domain sees them.
//!
//! Inbound traffic arrives as a stream of [`ConnectionEvent`]s; outbound
//! traffic goes through an [`Outbound`] handle that never blocks the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Something that happened on the inbound side of a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    Message(Vec<u8>),
    Close,
    Error(String),
}

impl ConnectionEvent {
    /// Close and error end the stream; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Message(_))
    }
}

/// Sending half of a connection.
pub trait Outbound: Send + Sync {
    /// Queue a text frame. Returns `false` if the frame was dropped.
    fn send(&self, text: Arc<str>) -> bool;

    /// Ask the connection to close. Calling it again has no effect.
    fn close(&self);
}

/// [`Outbound`] backed by a bounded queue drained by a writer task.
///
/// A full queue drops the frame instead of waiting, so one slow peer never
/// stalls whoever is sending.
pub struct ChannelOutbound {
    tx: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
    dropped: AtomicU64,
}

impl ChannelOutbound {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let outbound = Self {
            tx,
            closed: CancellationToken::new(),
            dropped: AtomicU64::new(0),
        };
        (outbound, rx)
    }

    /// Cancelled once [`Outbound::close`] is called.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Frames dropped because the queue was full or gone.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Outbound for ChannelOutbound {
    fn send(&self, text: Arc<str>) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        if self.tx.try_send(text).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    fn close(&self) {
        self.closed.cancel();
    }
}
