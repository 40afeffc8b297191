//! Outbound transport contract
//!
//! The queue hands encoded frames to a [`TransportSink`] from its worker
//! thread. `true` means the frame was accepted for transmission, not that
//! it was delivered.

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default capacity of the channel between the queue worker and a socket task
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Destination for encoded frames
pub trait TransportSink: Send + Sync {
    fn send(&self, frame: &str) -> bool;
}

impl<F> TransportSink for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn send(&self, frame: &str) -> bool {
        self(frame)
    }
}

/// Sink that forwards frames to an async writer task over a bounded channel.
///
/// Never blocks the queue worker: a full or closed channel is reported as a
/// rejected send and goes through the normal retry path.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end for the writer task
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl TransportSink for ChannelSink {
    fn send(&self, frame: &str) -> bool {
        match self.tx.try_send(frame.to_string()) {
            Ok(()) => {
                debug!("ChannelSink: Queued {} bytes for writer", frame.len());
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("ChannelSink: Writer channel full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("ChannelSink: Writer channel closed");
                false
            }
        }
    }
}
