//! Published hub events.

use std::fmt;

use tokio::sync::broadcast;

use crate::types::{DeviceType, FeedbackCode, HubErrorCode, PortId, SessionState};

/// Default event channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Event published by the router and the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// A device attached to a port.
    PortAttached {
        port: PortId,
        device_type: DeviceType,
    },
    /// A device detached from a port.
    PortDetached { port: PortId },
    /// A port reported a value.
    PortValue { port: PortId, raw: Vec<u8> },
    /// Feedback for a port output command.
    CommandFeedback { port: PortId, code: FeedbackCode },
    /// The hub rejected a command.
    ProtocolError {
        command_type: u8,
        code: HubErrorCode,
    },
    /// The supervisor changed state.
    SessionStateChanged {
        old: SessionState,
        new: SessionState,
    },
}

impl fmt::Display for HubEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortAttached { port, device_type } => {
                write!(f, "port {port} attached {device_type}")
            }
            Self::PortDetached { port } => write!(f, "port {port} detached"),
            Self::PortValue { port, raw } => {
                write!(f, "port {port} value {}", hex::encode(raw))
            }
            Self::CommandFeedback { port, code } => write!(f, "port {port} feedback {code}"),
            Self::ProtocolError { command_type, code } => {
                write!(f, "hub error for command {command_type:#04x}: {code}")
            }
            Self::SessionStateChanged { old, new } => write!(f, "session {old} -> {new}"),
        }
    }
}

/// Broadcast fan-out for [`HubEvent`]s.
///
/// Publishing never blocks; slow subscribers lag and drop old events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HubEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: HubEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
