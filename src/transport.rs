//! Connection handle abstraction.
//!
//! The outer transport (WebSocket today) hands the engine an object that can
//! send text frames, close, and report liveness. The engine never touches
//! sockets directly; broadcast, zombie sweeping, and tests all go through
//! [`ConnectionHandle`].

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Outbound channel depth per connection. Slow consumers beyond this get
/// backpressure on send, not unbounded buffering.
pub const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
}

/// One live client socket, as seen by the engine.
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Send a text frame. May briefly wait on transport backpressure; callers
    /// must not hold room locks across this.
    async fn send(&self, text: &str) -> Result<(), TransportError>;

    /// Mark the connection closed. The transport layer tears down the socket
    /// when its writer task observes the closed channel.
    fn close(&self);

    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;
}

/// Channel-backed handle: the engine side of a connection.
///
/// The transport layer (or a test) owns the receiving half and drains it to
/// the real socket. Mirrors how outbound routing works elsewhere in the
/// stack: a bounded mpsc per client, sender stored in shared state.
pub struct MpscHandle {
    tx: mpsc::Sender<String>,
    open: AtomicBool,
}

impl MpscHandle {
    /// Create a handle and its outbound frame receiver.
    pub fn pair() -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (
            Arc::new(Self {
                tx,
                open: AtomicBool::new(true),
            }),
            rx,
        )
    }
}

#[async_trait]
impl ConnectionHandle for MpscHandle {
    async fn send(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.tx.send(text.to_string()).await.map_err(|_| {
            // Receiver dropped: the socket is gone.
            self.open.store(false, Ordering::Release);
            TransportError::Closed
        })
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_delivers_frames() {
        let (handle, mut rx) = MpscHandle::pair();
        handle.send("one").await.unwrap();
        handle.send("two").await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_close_rejects_sends() {
        let (handle, _rx) = MpscHandle::pair();
        handle.close();
        assert!(!handle.is_open());
        assert!(matches!(handle.send("x").await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_dropped_receiver_marks_closed() {
        let (handle, rx) = MpscHandle::pair();
        drop(rx);
        assert!(matches!(handle.send("x").await, Err(TransportError::Closed)));
        assert!(!handle.is_open());
    }
}
