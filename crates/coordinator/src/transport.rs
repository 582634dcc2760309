//! Transport seam.
//!
//! The core never opens sockets. A host hands it one [`Connection`] per local
//! coordinator (an ordered, reliable, bidirectional channel carrying whole
//! [`AuthenticatedFrame`]s) and feeds inbound frames to
//! [`Network::receive`](crate::Network::receive).
//!
//! [`ChannelConnection`] is a tokio mpsc backed implementation: the core
//! writes into the sender half, the host (or a test) drains the receiver and
//! ships bytes to the peer.

use std::sync::atomic::{AtomicBool, Ordering};

use playpen_proto::AuthenticatedFrame;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Outbound half of a per-coordinator connection.
pub trait Connection: Send + Sync {
    /// `false` once the channel can no longer carry frames.
    fn is_active(&self) -> bool;

    /// Queue one frame for delivery. Blocks only on transport backpressure.
    fn write_frame(&self, frame: AuthenticatedFrame) -> Result<(), TransportError>;

    /// Stop accepting frames.
    fn close(&self);
}

/// [`Connection`] over an unbounded tokio channel.
pub struct ChannelConnection {
    tx: mpsc::UnboundedSender<AuthenticatedFrame>,
    open: AtomicBool,
}

impl ChannelConnection {
    /// Create a connection and the receiver that observes what it writes.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AuthenticatedFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                open: AtomicBool::new(true),
            },
            rx,
        )
    }
}

impl Connection for ChannelConnection {
    fn is_active(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    fn write_frame(&self, frame: AuthenticatedFrame) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(frame)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
