//! Handle to one live WebSocket, as stored in the registries.
//!
//! A [`SocketHandle`] never touches the socket directly. Outbound frames go
//! into a bounded queue drained by that socket's writer task, and closing
//! flips a watch flag the writer (and the reader loop) observe. Sending
//! never awaits: a full queue drops the frame for that socket only, so a
//! slow peer cannot stall delivery to anyone else.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};

/// Frame queued for a socket's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame.
    Text(String),
    /// Keepalive ping.
    Ping,
}

/// Result of queueing a frame on a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame is queued for the writer.
    Queued,
    /// The socket is open but its queue is full; the frame was dropped.
    Full,
    /// The socket is closed, or there is no socket to send to.
    NotOpen,
}

impl SendOutcome {
    /// Returns `true` if the frame was queued.
    #[must_use]
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::Queued)
    }
}

/// Close code and reason the writer sends before shutting the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSignal {
    /// WebSocket close code.
    pub code: u16,
    /// Short human-readable reason.
    pub reason: String,
}

/// Cloneable sending side of a socket.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    tx: mpsc::Sender<Outbound>,
    close: Arc<watch::Sender<Option<CloseSignal>>>,
}

/// Receiving side of a socket, owned by its writer task.
#[derive(Debug)]
pub struct SocketReceiver {
    /// Queued outbound frames.
    pub outbound: mpsc::Receiver<Outbound>,
    /// Close signal; becomes `Some` once the handle is closed.
    pub close: watch::Receiver<Option<CloseSignal>>,
}

impl SocketHandle {
    /// Creates a handle and the receiver its writer task drains.
    ///
    /// `capacity` is clamped to at least 1.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, SocketReceiver) {
        let (tx, outbound) = mpsc::channel(capacity.max(1));
        let (close_tx, close) = watch::channel(None);
        (
            Self {
                tx,
                close: Arc::new(close_tx),
            },
            SocketReceiver { outbound, close },
        )
    }

    /// Returns `true` while the handle has not been closed and its writer
    /// is still running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.close.borrow().is_none() && !self.tx.is_closed()
    }

    /// Queues a text frame without waiting. A full queue drops the frame
    /// and reports [`SendOutcome::Full`].
    pub fn send_text(&self, text: String) -> SendOutcome {
        if !self.is_open() {
            return SendOutcome::NotOpen;
        }
        match self.tx.try_send(Outbound::Text(text)) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("outbound queue full; dropping frame");
                SendOutcome::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::NotOpen,
        }
    }

    /// Serializes and queues a JSON value. See [`SocketHandle::send_text`].
    pub fn send_json(&self, value: &Value) -> SendOutcome {
        self.send_text(value.to_string())
    }

    /// Queues a keepalive ping. Returns `false` if it could not be queued.
    pub fn ping(&self) -> bool {
        self.is_open() && self.tx.try_send(Outbound::Ping).is_ok()
    }

    /// Closes the socket with the given code. Only the first close takes
    /// effect; returns `true` if this call closed it.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.close.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(CloseSignal {
                code,
                reason: reason.to_string(),
            });
            true
        })
    }

    /// Returns the close signal, if the handle has been closed.
    #[must_use]
    pub fn close_signal(&self) -> Option<CloseSignal> {
        self.close.borrow().clone()
    }

    /// Resolves once the handle has been closed.
    pub async fn closed(&self) {
        let mut rx = self.close.subscribe();
        let _ = rx.wait_for(Option::is_some).await;
    }
}

impl SocketReceiver {
    /// Returns the close signal, if the handle has been closed.
    #[must_use]
    pub fn close_signal(&self) -> Option<CloseSignal> {
        self.close.borrow().clone()
    }

    /// Drains queued text frames without waiting, parsing each as JSON.
    pub fn drain_json(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            if let Outbound::Text(text) = frame
                && let Ok(value) = serde_json::from_str(&text)
            {
                frames.push(value);
            }
        }
        frames
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn send_queues_frame() {
        let (handle, mut rx) = SocketHandle::channel(4);
        assert_eq!(handle.send_json(&json!({"type": "ping"})), SendOutcome::Queued);
        assert_eq!(rx.drain_json(), vec![json!({"type": "ping"})]);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let (handle, mut rx) = SocketHandle::channel(1);
        assert_eq!(handle.send_text("a".to_string()), SendOutcome::Queued);
        assert_eq!(handle.send_text("b".to_string()), SendOutcome::Full);
        assert!(handle.is_open());
        assert_eq!(rx.outbound.try_recv().ok(), Some(Outbound::Text("a".to_string())));
        assert!(rx.outbound.try_recv().is_err());
    }

    #[test]
    fn close_is_first_writer_wins() {
        let (handle, rx) = SocketHandle::channel(1);
        assert!(handle.close(4002, "Replaced by new connection"));
        assert!(!handle.close(1000, "bye"));
        assert!(!handle.is_open());
        let Some(signal) = rx.close_signal() else {
            panic!("expected close signal");
        };
        assert_eq!(signal.code, 4002);
    }

    #[test]
    fn closed_handle_refuses_frames() {
        let (handle, mut rx) = SocketHandle::channel(4);
        handle.close(1000, "done");
        assert_eq!(handle.send_text("late".to_string()), SendOutcome::NotOpen);
        assert!(!handle.ping());
        assert!(rx.drain_json().is_empty());
    }

    #[test]
    fn dropped_receiver_means_not_open() {
        let (handle, rx) = SocketHandle::channel(4);
        drop(rx);
        assert!(!handle.is_open());
        assert_eq!(handle.send_text("x".to_string()), SendOutcome::NotOpen);
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let (handle, _rx) = SocketHandle::channel(1);
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.closed().await });
        handle.close(1000, "bye");
        assert!(task.await.is_ok());
    }
}
