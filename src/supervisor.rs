//! Connection supervisor.
//!
//! Owns the session state machine and keeps one hub connection alive across
//! link drops:
//!
//! ```text
//!  Disconnected ──scan──▶ Scanning ──found──▶ Connecting ──ok──▶ Connected
//!       ▲                    │                    │                  │
//!       └────not found───────┴───────failed───────┴────link lost─────┘
//!       │
//!       └── attempts >= max_attempts ──▶ Draining (terminal)
//! ```
//!
//! Retries wait a fixed delay. Every wait can be cancelled, which moves the
//! supervisor straight to `Draining`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HubProfile;
use crate::dispatcher::{CommandDispatcher, CommandHistory};
use crate::error::{Error, Result, TransportError};
use crate::events::{EventBus, HubEvent};
use crate::ports::PortTable;
use crate::router::NotificationRouter;
use crate::session::{ActiveSession, Session};
use crate::transport::{DeviceHandle, HubTransport};
use crate::types::SessionState;

/// Supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Failed attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    /// How long a single scan may take.
    #[serde(default = "default_scan_timeout", with = "humantime_serde")]
    pub scan_timeout: Duration,

    /// Link liveness poll interval.
    #[serde(default = "default_link_check_interval", with = "humantime_serde")]
    pub link_check_interval: Duration,

    /// Pause after the activation frame before the session is usable.
    #[serde(default = "default_activation_settle", with = "humantime_serde")]
    pub activation_settle: Duration,
}

fn default_max_attempts() -> u32 {
    10
}
fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}
fn default_scan_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_link_check_interval() -> Duration {
    Duration::from_millis(500)
}
fn default_activation_settle() -> Duration {
    Duration::from_millis(500)
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay: default_retry_delay(),
            scan_timeout: default_scan_timeout(),
            link_check_interval: default_link_check_interval(),
            activation_settle: default_activation_settle(),
        }
    }
}

/// Keeps a single hub session alive.
pub struct ConnectionSupervisor {
    config: SupervisorConfig,
    profile: HubProfile,
    transport: Arc<dyn HubTransport>,
    events: EventBus,
    session: RwLock<Session>,
    active: RwLock<Option<Arc<ActiveSession>>>,
    /// Survives reconnects so diagnostics see commands across drops.
    history: Arc<CommandHistory>,
    /// Serializes connection attempts.
    connect_lock: tokio::sync::Mutex<()>,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn HubTransport>,
        profile: HubProfile,
        config: SupervisorConfig,
    ) -> Self {
        let history = Arc::new(CommandHistory::new(profile.history_capacity));
        Self {
            config,
            profile,
            transport,
            events: EventBus::default(),
            session: RwLock::new(Session::new()),
            active: RwLock::new(None),
            history,
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn profile(&self) -> &HubProfile {
        &self.profile
    }

    /// Snapshot of the session record.
    pub fn session(&self) -> Session {
        *self.session.read()
    }

    pub fn state(&self) -> SessionState {
        self.session.read().state
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to hub and session events.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    pub fn history(&self) -> &Arc<CommandHistory> {
        &self.history
    }

    /// The live connection, if any.
    pub fn active(&self) -> Option<Arc<ActiveSession>> {
        self.active.read().clone()
    }

    /// Dispatcher of the live connection.
    pub fn dispatcher(&self) -> Result<Arc<CommandDispatcher>> {
        self.active()
            .map(|active| Arc::clone(active.dispatcher()))
            .ok_or_else(|| Error::TransportLost("no active session".into()))
    }

    fn transition(&self, next: SessionState) -> bool {
        let old = {
            let mut session = self.session.write();
            let old = session.state;
            if old == next {
                return true;
            }
            if !old.can_transition_to(next) {
                debug!(from = %old, to = %next, "Ignoring invalid state transition");
                return false;
            }
            session.state = next;
            old
        };

        info!(from = %old, to = %next, "Session state changed");
        self.events
            .publish(HubEvent::SessionStateChanged { old, new: next });
        true
    }

    /// Record a failed attempt. Returns the error to surface, which is
    /// `ReconnectExhausted` once the attempt budget is spent.
    fn fail(&self, error: Error) -> Error {
        let attempts = {
            let mut session = self.session.write();
            session.attempt_count += 1;
            session.last_error = Some(error.kind());
            session.attempt_count
        };
        warn!(
            attempt = attempts,
            max_attempts = self.config.max_attempts,
            error = %error,
            "Connection attempt failed"
        );

        self.transition(SessionState::Disconnected);
        if attempts >= self.config.max_attempts {
            self.transition(SessionState::Draining);
            error!(attempts, "Giving up on hub connection");
            return Error::ReconnectExhausted { attempts };
        }
        error
    }

    fn exhausted(&self) -> Error {
        Error::ReconnectExhausted {
            attempts: self.session.read().attempt_count,
        }
    }

    /// Move to the terminal state. No further connects are attempted.
    pub fn drain(&self) {
        self.transition(SessionState::Draining);
    }

    /// Run one scan/connect/activate attempt.
    pub async fn connect_once(&self) -> Result<Arc<ActiveSession>> {
        let _guard = self.connect_lock.lock().await;

        match self.state() {
            SessionState::Draining => return Err(self.exhausted()),
            SessionState::Connected => {
                if let Some(active) = self.active() {
                    if self.transport.is_connected() {
                        return Ok(active);
                    }
                }
                self.teardown().await;
                let error = self.fail(Error::TransportLost("hub link lost".into()));
                if error.is_terminal() {
                    return Err(error);
                }
            }
            _ => {}
        }

        self.transition(SessionState::Scanning);
        let device = match self.transport.scan(self.config.scan_timeout).await {
            Ok(Some(device)) if device.is_lego_hub() => device,
            Ok(Some(device)) => {
                debug!(device = %device, "Ignoring device with foreign manufacturer id");
                return Err(self.fail(TransportError::NoHubFound.into()));
            }
            Ok(None) => return Err(self.fail(TransportError::NoHubFound.into())),
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(SessionState::Connecting);
        if let Err(e) = self.transport.connect(&device).await {
            return Err(self.fail(e));
        }

        match self.open_session(device).await {
            Ok(active) => Ok(active),
            Err(e) => {
                self.teardown().await;
                Err(self.fail(e))
            }
        }
    }

    async fn open_session(&self, device: DeviceHandle) -> Result<Arc<ActiveSession>> {
        let ports = Arc::new(PortTable::new());
        let router = Arc::new(NotificationRouter::new(
            Arc::clone(&ports),
            self.events.clone(),
        ));
        let (callback, router_task) = router.spawn();
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&self.transport),
            Arc::clone(&ports),
            self.profile.layout(),
            Arc::clone(&self.history),
        ));
        let active = Arc::new(ActiveSession::new(
            device,
            ports,
            router,
            Arc::clone(&dispatcher),
            router_task,
        ));

        self.transport.subscribe(callback).await?;

        {
            let mut session = self.session.write();
            session.attempt_count = 0;
            session.last_error = None;
        }
        self.transition(SessionState::Connected);

        let activation = self.profile.activation;
        dispatcher
            .activate(activation.property, activation.operation)
            .await?;
        sleep(self.config.activation_settle).await;

        *self.active.write() = Some(Arc::clone(&active));
        info!(device = %active.device(), "Hub session ready");
        Ok(active)
    }

    /// Drop the live connection and close the transport.
    async fn teardown(&self) {
        let active = self.active.write().take();
        drop(active);
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed");
        }
    }

    /// Retry until connected, exhausted or cancelled.
    pub async fn run_until_connected(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<ActiveSession>> {
        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled().await);
            }

            let attempt = tokio::select! {
                _ = cancel.cancelled() => return Err(self.cancelled().await),
                result = self.connect_once() => result,
            };

            match attempt {
                Ok(active) => return Ok(active),
                Err(e) if e.is_terminal() => return Err(e),
                Err(_) => {}
            }

            if !self.backoff(cancel).await {
                return Err(self.cancelled().await);
            }
        }
    }

    /// Wait the retry delay. Returns false if cancelled.
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        debug!(delay = ?self.config.retry_delay, "Waiting before next attempt");
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(self.config.retry_delay) => true,
        }
    }

    async fn cancelled(&self) -> Error {
        info!("Supervisor cancelled");
        self.teardown().await;
        self.drain();
        Error::Cancelled
    }

    /// Resolve when the link is gone, either signalled by a failed write on
    /// this connection's dispatcher or seen by polling the transport.
    async fn wait_link_lost(&self, link_lost: CancellationToken) {
        let mut check = interval(self.config.link_check_interval);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = link_lost.cancelled() => return,
                _ = check.tick() => {
                    if !self.transport.is_connected() {
                        return;
                    }
                }
            }
        }
    }

    /// Keep the session alive until cancelled or out of attempts.
    ///
    /// Cancellation shuts the session down cleanly and returns `Ok(())`.
    pub async fn supervise(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let link_lost = match self.run_until_connected(cancel).await {
                Ok(active) => active.dispatcher().link_lost().clone(),
                Err(Error::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    return self.shutdown().await;
                }
                _ = self.wait_link_lost(link_lost) => {}
            }

            warn!("Hub link lost");
            self.teardown().await;
            self.handle_link_lost()?;

            if !self.backoff(cancel).await {
                self.drain();
                return Ok(());
            }
        }
    }

    fn handle_link_lost(&self) -> Result<()> {
        let error = self.fail(Error::TransportLost("hub link lost".into()));
        if error.is_terminal() {
            return Err(error);
        }
        Ok(())
    }

    /// Stop the motor, close the link and drain.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(active) = self.active() {
            if self.transport.is_connected() {
                if let Err(e) = active.dispatcher().stop(self.profile.motor_port).await {
                    warn!(error = %e, "Could not stop motor before disconnect");
                }
            }
        }
        self.teardown().await;
        self.drain();
        info!("Hub session closed");
        Ok(())
    }
}
