//! Connection lifecycle events for external session logging.
//!
//! Emission is fire-and-forget: a slow or closed sink never blocks or fails
//! a connection.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::frame::Frame;

/// Structured event emitted at each connection lifecycle point.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Stream accepted
    NewConnection { peer: SocketAddr },
    /// Frame decoded from the peer
    FrameReceived { peer: SocketAddr, frame: Frame },
    /// Frame written to the peer
    FrameSent { peer: SocketAddr, frame: Frame },
    /// Transport ended (peer close, I/O error, shutdown)
    ConnectionLost { peer: SocketAddr, reason: String },
    /// Outstation closed the connection after a protocol violation or timeout
    ConnectionTerminated { peer: SocketAddr, reason: String },
}

impl SessionEvent {
    pub fn peer(&self) -> SocketAddr {
        match self {
            Self::NewConnection { peer }
            | Self::FrameReceived { peer, .. }
            | Self::FrameSent { peer, .. }
            | Self::ConnectionLost { peer, .. }
            | Self::ConnectionTerminated { peer, .. } => *peer,
        }
    }
}

/// Receiver of session events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: SessionEvent) {}
}

impl EventSink for mpsc::Sender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        // Dropped when the logger falls behind
        if let Err(e) = self.try_send(event) {
            tracing::trace!(error = %e, "session event dropped");
        }
    }
}

impl EventSink for mpsc::UnboundedSender<SessionEvent> {
    fn emit(&self, event: SessionEvent) {
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UFunction;

    fn peer() -> SocketAddr {
        "10.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_bounded_sink_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.emit(SessionEvent::NewConnection { peer: peer() });
        tx.emit(SessionEvent::FrameSent {
            peer: peer(),
            frame: Frame::U(UFunction::StartDtCon),
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::NewConnection { peer: peer() }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_sink_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.emit(SessionEvent::ConnectionLost {
            peer: peer(),
            reason: "reset".into(),
        });
        NoopSink.emit(SessionEvent::NewConnection { peer: peer() });
    }

    #[test]
    fn test_peer_accessor() {
        let event = SessionEvent::ConnectionTerminated {
            peer: peer(),
            reason: "T1".into(),
        };
        assert_eq!(event.peer(), peer());
    }
}
