//! Command dispatcher.
//!
//! The only place commands are turned into frames and written to the
//! transport. Writes never wait for a hub response.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::ports::PortTable;
use crate::protocol::{Command, CommandLayout};
use crate::transport::HubTransport;
use crate::types::PortId;

/// Default number of commands kept in the history ring.
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// A command as it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub command: Command,
    pub frame: Vec<u8>,
    pub issued_at: SystemTime,
}

/// Ring buffer of the last N issued commands.
///
/// Used by diagnostics to correlate sensor changes with recent commands.
#[derive(Debug)]
pub struct CommandHistory {
    capacity: usize,
    entries: Mutex<VecDeque<CommandRecord>>,
}

impl CommandHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, record: CommandRecord) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// The last `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<CommandRecord> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Builds frames for logical commands and writes them to the transport.
pub struct CommandDispatcher {
    transport: Arc<dyn HubTransport>,
    ports: Arc<PortTable>,
    layout: CommandLayout,
    history: Arc<CommandHistory>,
    /// Cancelled when a write finds the link gone. Scoped to one connection.
    link_lost: CancellationToken,
}

impl CommandDispatcher {
    pub fn new(
        transport: Arc<dyn HubTransport>,
        ports: Arc<PortTable>,
        layout: CommandLayout,
        history: Arc<CommandHistory>,
    ) -> Self {
        Self {
            transport,
            ports,
            layout,
            history,
            link_lost: CancellationToken::new(),
        }
    }

    /// Resolves once a write on this dispatcher has found the link gone.
    pub fn link_lost(&self) -> &CancellationToken {
        &self.link_lost
    }

    pub fn layout(&self) -> &CommandLayout {
        &self.layout
    }

    pub fn history(&self) -> &Arc<CommandHistory> {
        &self.history
    }

    /// Validate, encode and write a command.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.validate(&command)?;
        let frame = command.to_frame(&self.layout)?;

        trace!(command = %command, frame = %hex::encode(&frame), "Sending command");

        if let Err(e) = self.transport.write(&frame).await {
            let lost = e.kind() == ErrorKind::TransportLost || !self.transport.is_connected();
            if lost {
                warn!(command = %command, error = %e, "Write failed, link lost");
                self.link_lost.cancel();
                return Err(Error::TransportLost(e.to_string()));
            }
            warn!(command = %command, error = %e, "Write failed");
            return Err(e);
        }

        self.history.push(CommandRecord {
            command,
            frame,
            issued_at: SystemTime::now(),
        });
        Ok(())
    }

    fn validate(&self, command: &Command) -> Result<()> {
        if let Command::SetMotorSpeed { port, .. } = command {
            match self.ports.lookup(*port) {
                None => return Err(Error::PortNotFound(port.0)),
                Some(device) if !device.is_motor() => {
                    debug!(port = %port, device = %device, "Refusing motor command");
                    return Err(Error::PortNotMotor(port.0));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub async fn set_motor_speed(&self, port: PortId, speed: i32) -> Result<()> {
        self.send(Command::SetMotorSpeed { port, speed }).await
    }

    pub async fn stop(&self, port: PortId) -> Result<()> {
        self.set_motor_speed(port, 0).await
    }

    pub async fn set_light(&self, port: PortId, color: u8) -> Result<()> {
        self.send(Command::SetLight { port, color }).await
    }

    pub async fn play_sound(&self, sound_id: u8) -> Result<()> {
        self.send(Command::PlaySound { sound_id }).await
    }

    pub async fn query_port_info(&self, port: PortId, info_type: u8) -> Result<()> {
        self.send(Command::QueryPortInfo { port, info_type }).await
    }

    pub async fn query_port_mode_info(&self, port: PortId, mode: u8, info_type: u8) -> Result<()> {
        self.send(Command::QueryPortModeInfo {
            port,
            mode,
            info_type,
        })
        .await
    }

    pub async fn subscribe_port_value(
        &self,
        port: PortId,
        mode: u8,
        delta: u32,
        notify: bool,
    ) -> Result<()> {
        self.send(Command::SubscribePortValue {
            port,
            mode,
            delta,
            notify,
        })
        .await
    }

    pub async fn port_event(&self, port: PortId, event: u8, params: Vec<u8>) -> Result<()> {
        self.send(Command::PortEvent {
            port,
            event,
            params,
        })
        .await
    }

    /// Enable hub property notifications.
    pub async fn activate(&self, property: u8, operation: u8) -> Result<()> {
        self.send(Command::HubProperty {
            property,
            operation,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{DeviceHandle, MemoryTransport};
    use crate::types::DeviceType;

    async fn setup() -> (Arc<MemoryTransport>, Arc<PortTable>, CommandDispatcher) {
        let transport = Arc::new(MemoryTransport::with_device(DeviceHandle::new("mem")));
        transport.connect(&DeviceHandle::new("mem")).await.unwrap();
        let ports = Arc::new(PortTable::new());
        let dispatcher = CommandDispatcher::new(
            transport.clone(),
            Arc::clone(&ports),
            CommandLayout::default(),
            Arc::new(CommandHistory::default()),
        );
        (transport, ports, dispatcher)
    }

    #[tokio::test]
    async fn test_motor_requires_motor_port() {
        let (transport, ports, dispatcher) = setup().await;

        let err = dispatcher.set_motor_speed(PortId(0x32), 50).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PortNotFound);

        ports.record_attach(PortId(0x32), DeviceType::DUPLO_TRAIN_BASE_LIGHT);
        let err = dispatcher.set_motor_speed(PortId(0x32), 50).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PortNotMotor);
        assert!(transport.written().is_empty());

        ports.record_attach(PortId(0x32), DeviceType::DUPLO_TRAIN_MOTOR);
        dispatcher.set_motor_speed(PortId(0x32), 150).await.unwrap();
        assert_eq!(
            transport.written(),
            vec![vec![0x08, 0x00, 0x81, 0x32, 0x01, 0x51, 0x00, 0x64]]
        );
    }

    #[tokio::test]
    async fn test_clamped_speeds_match() {
        let (transport, ports, dispatcher) = setup().await;
        ports.record_attach(PortId(0x32), DeviceType::DUPLO_TRAIN_MOTOR);

        dispatcher.set_motor_speed(PortId(0x32), -150).await.unwrap();
        dispatcher.set_motor_speed(PortId(0x32), -100).await.unwrap();
        let written = transport.written();
        assert_eq!(written[0], written[1]);
    }

    #[tokio::test]
    async fn test_write_after_drop_is_transport_lost() {
        let (transport, _ports, dispatcher) = setup().await;
        assert!(!dispatcher.link_lost().is_cancelled());

        transport.drop_link();
        let err = dispatcher.play_sound(3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportLost);
        assert!(dispatcher.link_lost().is_cancelled());
        assert!(dispatcher.history().is_empty());
    }

    #[tokio::test]
    async fn test_history_ring() {
        let history = CommandHistory::new(3);
        for sound_id in 1..=5 {
            history.push(CommandRecord {
                command: Command::PlaySound { sound_id },
                frame: vec![],
                issued_at: SystemTime::now(),
            });
        }
        assert_eq!(history.len(), 3);
        let recent = history.recent(2);
        assert_eq!(recent[0].command, Command::PlaySound { sound_id: 4 });
        assert_eq!(recent[1].command, Command::PlaySound { sound_id: 5 });
        assert_eq!(history.recent(10).len(), 3);
    }

    #[tokio::test]
    async fn test_helpers_record_history() {
        let (transport, _ports, dispatcher) = setup().await;
        dispatcher.activate(0x02, 0x02).await.unwrap();
        dispatcher.set_light(PortId(0x11), 5).await.unwrap();
        dispatcher.query_port_info(PortId(0x32), 0x01).await.unwrap();

        assert_eq!(dispatcher.history().len(), 3);
        assert_eq!(transport.written()[0], vec![0x05, 0x00, 0x01, 0x02, 0x02]);
    }
}
