//! Notification router.
//!
//! Decodes inbound frames, keeps the port table current, caches the last
//! value per port, completes response waiters and publishes [`HubEvent`]s.
//!
//! The transport may deliver frames on any thread. Its callback only pushes
//! the raw bytes into a channel; a single router task does the processing,
//! so frames are handled one at a time and in arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::DecodeError;
use crate::events::{EventBus, HubEvent};
use crate::ports::PortTable;
use crate::protocol::{decode_detailed, Message, PortInfo};
use crate::transport::FrameCallback;
use crate::types::{AttachEvent, PortId};

/// Kind of asynchronous response a caller can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    PortInfo,
    ModeInfo,
    Value,
    Feedback,
}

/// What a waiter is waiting for.
///
/// The protocol has no request ids, so responses are matched on port and,
/// for mode information, mode. A `mode` of `None` matches any mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseKey {
    pub kind: ResponseKind,
    pub port: PortId,
    pub mode: Option<u8>,
}

impl ResponseKey {
    pub fn port_info(port: PortId) -> Self {
        Self {
            kind: ResponseKind::PortInfo,
            port,
            mode: None,
        }
    }

    pub fn mode_info(port: PortId, mode: u8) -> Self {
        Self {
            kind: ResponseKind::ModeInfo,
            port,
            mode: Some(mode),
        }
    }

    pub fn value(port: PortId) -> Self {
        Self {
            kind: ResponseKind::Value,
            port,
            mode: None,
        }
    }

    pub fn feedback(port: PortId) -> Self {
        Self {
            kind: ResponseKind::Feedback,
            port,
            mode: None,
        }
    }

    fn of(message: &Message) -> Option<Self> {
        let (kind, mode) = match message {
            Message::PortInformationResponse { .. } => (ResponseKind::PortInfo, None),
            Message::PortModeInformationResponse { mode, .. } => (ResponseKind::ModeInfo, *mode),
            Message::PortValueSingle { .. } => (ResponseKind::Value, None),
            Message::PortOutputFeedback { .. } => (ResponseKind::Feedback, None),
            _ => return None,
        };
        Some(Self {
            kind,
            port: message.port()?,
            mode,
        })
    }

    fn matches(&self, response: &ResponseKey) -> bool {
        self.kind == response.kind
            && self.port == response.port
            && (self.mode.is_none() || self.mode == response.mode)
    }
}

/// A registered waiter.
///
/// Register before sending the request so a fast reply is not missed.
#[derive(Debug)]
pub struct PendingResponse {
    key: ResponseKey,
    rx: oneshot::Receiver<Message>,
}

impl PendingResponse {
    pub fn key(&self) -> ResponseKey {
        self.key
    }

    /// Wait up to `limit`. `None` means no response arrived, which the
    /// protocol allows and callers must treat as a normal outcome.
    pub async fn wait(self, limit: Duration) -> Option<Message> {
        match timeout(limit, self.rx).await {
            Ok(Ok(message)) => Some(message),
            Ok(Err(_)) => None,
            Err(_) => {
                debug!(port = %self.key.port, kind = ?self.key.kind, "No response before timeout");
                None
            }
        }
    }
}

struct Waiter {
    key: ResponseKey,
    tx: oneshot::Sender<Message>,
}

/// Router counters.
#[derive(Debug, Default)]
pub struct RouterStats {
    frames: AtomicU64,
    malformed: AtomicU64,
    unrecognized: AtomicU64,
    truncated: AtomicU64,
    length_mismatch: AtomicU64,
    hub_errors: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStatsSnapshot {
    pub frames: u64,
    pub malformed: u64,
    pub unrecognized: u64,
    pub truncated: u64,
    pub length_mismatch: u64,
    pub hub_errors: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unrecognized: self.unrecognized.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            length_mismatch: self.length_mismatch.load(Ordering::Relaxed),
            hub_errors: self.hub_errors.load(Ordering::Relaxed),
        }
    }
}

/// Routes decoded inbound messages.
pub struct NotificationRouter {
    ports: Arc<PortTable>,
    events: EventBus,
    last_values: RwLock<HashMap<PortId, Vec<u8>>>,
    last_message: RwLock<Option<Message>>,
    waiters: Mutex<Vec<Waiter>>,
    stats: RouterStats,
}

impl NotificationRouter {
    pub fn new(ports: Arc<PortTable>, events: EventBus) -> Self {
        Self {
            ports,
            events,
            last_values: RwLock::new(HashMap::new()),
            last_message: RwLock::new(None),
            waiters: Mutex::new(Vec::new()),
            stats: RouterStats::default(),
        }
    }

    pub fn ports(&self) -> &Arc<PortTable> {
        &self.ports
    }

    pub fn stats(&self) -> RouterStatsSnapshot {
        self.stats.snapshot()
    }

    /// Last raw value reported by `port`.
    pub fn last_value(&self, port: PortId) -> Option<Vec<u8>> {
        self.last_values.read().get(&port).cloned()
    }

    /// Last successfully decoded message of any type.
    pub fn last_message(&self) -> Option<Message> {
        self.last_message.read().clone()
    }

    /// Register a waiter for the next response matching `key`.
    pub fn expect(&self, key: ResponseKey) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        waiters.retain(|w| !w.tx.is_closed());
        waiters.push(Waiter { key, tx });
        PendingResponse { key, rx }
    }

    pub fn pending_waiters(&self) -> usize {
        self.waiters.lock().iter().filter(|w| !w.tx.is_closed()).count()
    }

    /// Process one raw frame. Never fails: undecodable frames are counted
    /// and dropped.
    pub fn process_frame(&self, raw: &[u8]) -> Option<Message> {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        trace!(frame = %hex::encode(raw), "Inbound frame");

        let decoded = match decode_detailed(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(frame = %hex::encode(raw), error = %e, "Dropping malformed frame");
                return None;
            }
        };

        for issue in &decoded.issues {
            match issue {
                DecodeError::Truncated { .. } => {
                    self.stats.truncated.fetch_add(1, Ordering::Relaxed);
                    warn!(frame = %hex::encode(raw), issue = %issue, "Truncated frame");
                }
                DecodeError::LengthMismatch { .. } => {
                    self.stats.length_mismatch.fetch_add(1, Ordering::Relaxed);
                    debug!(frame = %hex::encode(raw), issue = %issue, "Length byte mismatch");
                }
            }
        }

        let message = decoded.message;
        self.apply(&message);
        self.complete_waiters(&message);
        *self.last_message.write() = Some(message.clone());
        Some(message)
    }

    fn apply(&self, message: &Message) {
        match message {
            Message::AttachedIo {
                port: Some(port),
                event: Some(event),
                device_type,
                ..
            } => match (event, device_type) {
                (AttachEvent::Detached, _) => {
                    self.ports.record_detach(*port);
                    self.events.publish(HubEvent::PortDetached { port: *port });
                }
                (event, Some(device_type)) if event.is_attach() => {
                    self.ports.record_attach(*port, *device_type);
                    self.events.publish(HubEvent::PortAttached {
                        port: *port,
                        device_type: *device_type,
                    });
                }
                (event, _) => {
                    debug!(port = %port, event = ?event, "Attach message without device type");
                }
            },
            Message::PortInformationResponse {
                port: Some(port),
                info:
                    Some(PortInfo::ModeInfo {
                        capabilities: Some(capabilities),
                        ..
                    }),
                ..
            } => {
                self.ports.record_capabilities(*port, *capabilities);
                debug!(port = %port, capabilities = %capabilities, "Port capabilities");
            }
            Message::PortValueSingle {
                port: Some(port),
                raw,
            } => {
                self.last_values.write().insert(*port, raw.clone());
                self.events.publish(HubEvent::PortValue {
                    port: *port,
                    raw: raw.clone(),
                });
            }
            Message::PortOutputFeedback {
                port: Some(port),
                feedback: Some(code),
            } => {
                debug!(port = %port, feedback = %code, "Command feedback");
                self.events.publish(HubEvent::CommandFeedback {
                    port: *port,
                    code: *code,
                });
            }
            Message::GenericError {
                command_type: Some(command_type),
                error_code: Some(code),
            } => {
                self.stats.hub_errors.fetch_add(1, Ordering::Relaxed);
                warn!(command_type = %format!("{command_type:#04x}"), code = %code, "Hub reported error");
                self.events.publish(HubEvent::ProtocolError {
                    command_type: *command_type,
                    code: *code,
                });
            }
            Message::HubPropertyUpdate {
                property, payload, ..
            } => {
                debug!(property = ?property, payload = %hex::encode(payload), "Hub property update");
            }
            Message::Unrecognized { message_type, raw } => {
                self.stats.unrecognized.fetch_add(1, Ordering::Relaxed);
                debug!(
                    message_type = %format!("{message_type:#04x}"),
                    frame = %hex::encode(raw),
                    "Unrecognized message"
                );
            }
            other => {
                debug!(message_type = %format!("{:#04x}", other.message_type()), "Partial or unhandled message");
            }
        }
    }

    fn complete_waiters(&self, message: &Message) {
        let Some(response) = ResponseKey::of(message) else {
            return;
        };

        let mut waiters = self.waiters.lock();
        let mut i = 0;
        while i < waiters.len() {
            if waiters[i].key.matches(&response) {
                let waiter = waiters.swap_remove(i);
                // Receiver may have timed out already
                let _ = waiter.tx.send(message.clone());
            } else {
                i += 1;
            }
        }
    }

    /// Start the router task and return the callback to hand to the transport.
    pub fn spawn(self: &Arc<Self>) -> (FrameCallback, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let router = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                router.process_frame(&frame);
            }
            info!("Router stopped");
        });

        let callback: FrameCallback = Arc::new(move |frame| {
            // Closed channel means the session is being torn down
            let _ = tx.send(frame);
        });
        (callback, handle)
    }
}
