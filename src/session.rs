//! Session records.
//!
//! [`Session`] is the supervisor's long-lived state. [`ActiveSession`] owns
//! everything tied to one physical connection and is dropped with it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::dispatcher::CommandDispatcher;
use crate::error::ErrorKind;
use crate::ports::PortTable;
use crate::router::NotificationRouter;
use crate::transport::DeviceHandle;
use crate::types::SessionState;

/// Supervisor state, alive from start-up to shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub state: SessionState,
    /// Failed attempts since the last successful connect.
    pub attempt_count: u32,
    pub last_error: Option<ErrorKind>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            attempt_count: 0,
            last_error: None,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// One live connection to a hub.
///
/// Created when the link comes up with an empty port table and torn down
/// when it goes away; nothing here outlives the connection.
pub struct ActiveSession {
    device: DeviceHandle,
    ports: Arc<PortTable>,
    router: Arc<NotificationRouter>,
    dispatcher: Arc<CommandDispatcher>,
    router_task: JoinHandle<()>,
    connected_at: Instant,
}

impl ActiveSession {
    pub(crate) fn new(
        device: DeviceHandle,
        ports: Arc<PortTable>,
        router: Arc<NotificationRouter>,
        dispatcher: Arc<CommandDispatcher>,
        router_task: JoinHandle<()>,
    ) -> Self {
        Self {
            device,
            ports,
            router,
            dispatcher,
            router_task,
            connected_at: Instant::now(),
        }
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn ports(&self) -> &Arc<PortTable> {
        &self.ports
    }

    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.router_task.abort();
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("device", &self.device)
            .field("attached_ports", &self.ports.attached_count())
            .field("uptime", &self.uptime())
            .finish()
    }
}
