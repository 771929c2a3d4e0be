//! Connection states and the events emitted by transports and stream entities
//!
//! Every transport and entity owns an [`EventChannel`], a thin wrapper over a
//! `tokio::sync::broadcast` sender. Emitting never blocks and never fails when
//! nobody listens; subscribers that lag simply miss the oldest events.
//!
//! ```rust
//! use rvoip_sfu_client::events::{EventChannel, ProducerEvent};
//!
//! let channel = EventChannel::new(8);
//! let mut rx = channel.subscribe();
//! channel.emit(ProducerEvent::Paused);
//! assert_eq!(rx.try_recv().unwrap(), ProducerEvent::Paused);
//! ```

use std::fmt;

use tokio::sync::broadcast;

/// Connection state of a transport, as reported by the media engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Completed,
    Failed,
    Disconnected,
    /// Terminal; only ever set by closing the transport
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// ICE candidate gathering state of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

impl fmt::Display for IceGatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Gathering => write!(f, "gathering"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Transport events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionStateChange(ConnectionState),
    IceGatheringStateChange(IceGatheringState),
    /// The transport was closed by the application
    Closed,
}

/// Producer events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerEvent {
    /// Closed by the application
    Closed,
    /// Closed because its transport was closed
    TransportClosed,
    /// The sending track ended; the producer stays open
    TrackEnded,
    Paused,
    Resumed,
}

/// Consumer events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    Closed,
    TransportClosed,
    TrackEnded,
    Paused,
    Resumed,
}

/// Data producer / data consumer events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataStreamEvent {
    Closed,
    TransportClosed,
}

/// Broadcast fan-out of events of type `E`
#[derive(Debug, Clone)]
pub struct EventChannel<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventChannel<E> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send an event to current subscribers, if any
    pub fn emit(&self, event: E) {
        // no receivers is not an error
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
