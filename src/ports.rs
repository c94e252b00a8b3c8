//! Port table.
//!
//! Tracks which device type each hub port hosts. Written only by the
//! notification router as attach/detach messages arrive; read by the
//! dispatcher to validate command targets.

use std::collections::BTreeMap;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::types::{Capabilities, DeviceClass, DeviceType, PortId};

/// State of a single port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    pub port: PortId,
    /// Currently attached device type.
    pub attached: Option<DeviceType>,
    /// Capabilities from the last port information response.
    pub capabilities: Option<Capabilities>,
    /// Device types this port hosted during the session, oldest first.
    /// A repeated attach of the attached type is not recorded again.
    pub history: Vec<DeviceType>,
    /// When the current device attached.
    pub attached_at: Option<Instant>,
}

impl PortEntry {
    fn new(port: PortId) -> Self {
        Self {
            port,
            attached: None,
            capabilities: None,
            history: Vec::new(),
            attached_at: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    pub fn class(&self) -> Option<DeviceClass> {
        self.attached.map(DeviceType::class)
    }
}

/// Port id to port state map.
///
/// Entries are never removed; a detach only clears the attached device.
#[derive(Debug, Default)]
pub struct PortTable {
    entries: RwLock<BTreeMap<PortId, PortEntry>>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attach. Returns the device type it replaced, if the port
    /// was still marked attached.
    pub fn record_attach(&self, port: PortId, device_type: DeviceType) -> Option<DeviceType> {
        let mut entries = self.entries.write();
        let entry = entries.entry(port).or_insert_with(|| PortEntry::new(port));

        let previous = entry.attached.replace(device_type);
        if previous != Some(device_type) {
            entry.history.push(device_type);
            entry.attached_at = Some(Instant::now());
        }

        match previous {
            Some(old) if old != device_type => {
                info!(port = %port, old = %old, new = %device_type, "Port re-attached with new device");
            }
            Some(_) => debug!(port = %port, "Duplicate attach"),
            None => info!(port = %port, device = %device_type, "Device attached"),
        }

        previous
    }

    /// Record a detach. Returns the device type that was attached.
    pub fn record_detach(&self, port: PortId) -> Option<DeviceType> {
        let mut entries = self.entries.write();
        let entry = entries.entry(port).or_insert_with(|| PortEntry::new(port));

        let previous = entry.attached.take();
        entry.attached_at = None;

        match previous {
            Some(device) => info!(port = %port, device = %device, "Device detached"),
            None => debug!(port = %port, "Detach for port with no device"),
        }

        previous
    }

    /// Device type currently attached at `port`.
    pub fn lookup(&self, port: PortId) -> Option<DeviceType> {
        self.entries.read().get(&port).and_then(|e| e.attached)
    }

    pub fn record_capabilities(&self, port: PortId, capabilities: Capabilities) {
        let mut entries = self.entries.write();
        entries
            .entry(port)
            .or_insert_with(|| PortEntry::new(port))
            .capabilities = Some(capabilities);
    }

    pub fn entry(&self, port: PortId) -> Option<PortEntry> {
        self.entries.read().get(&port).cloned()
    }

    /// All known ports, ordered by id.
    pub fn snapshot(&self) -> Vec<PortEntry> {
        self.entries.read().values().cloned().collect()
    }

    /// Ports currently hosting a device of `class`, ordered by id.
    pub fn ports_with_class(&self, class: DeviceClass) -> Vec<PortId> {
        self.entries
            .read()
            .values()
            .filter(|e| e.class() == Some(class))
            .map(|e| e.port)
            .collect()
    }

    pub fn attached_count(&self) -> usize {
        self.entries.read().values().filter(|e| e.is_attached()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_detach_reattach() {
        let table = PortTable::new();
        let port = PortId(50);

        assert_eq!(table.record_attach(port, DeviceType(0x0029)), None);
        assert_eq!(table.lookup(port), Some(DeviceType(0x0029)));

        assert_eq!(table.record_detach(port), Some(DeviceType(0x0029)));
        assert_eq!(table.lookup(port), None);

        table.record_attach(port, DeviceType(0x005B));
        assert_eq!(table.lookup(port), Some(DeviceType(0x005B)));

        let entry = table.entry(port).unwrap();
        assert_eq!(entry.history, vec![DeviceType(0x0029), DeviceType(0x005B)]);
    }

    #[test]
    fn test_reattach_replaces() {
        let table = PortTable::new();
        let port = PortId(0x32);
        table.record_attach(port, DeviceType::DUPLO_TRAIN_MOTOR);
        let previous = table.record_attach(port, DeviceType::DUPLO_TRAIN_BASE_LIGHT);
        assert_eq!(previous, Some(DeviceType::DUPLO_TRAIN_MOTOR));
        assert_eq!(table.lookup(port), Some(DeviceType::DUPLO_TRAIN_BASE_LIGHT));
    }

    #[test]
    fn test_duplicate_attach_not_repeated_in_history() {
        let table = PortTable::new();
        let port = PortId(0x32);
        table.record_attach(port, DeviceType::DUPLO_TRAIN_MOTOR);
        let attached_at = table.entry(port).and_then(|e| e.attached_at);

        let previous = table.record_attach(port, DeviceType::DUPLO_TRAIN_MOTOR);
        assert_eq!(previous, Some(DeviceType::DUPLO_TRAIN_MOTOR));

        let entry = table.entry(port).unwrap();
        assert_eq!(entry.history, vec![DeviceType::DUPLO_TRAIN_MOTOR]);
        assert_eq!(entry.attached_at, attached_at);

        table.record_attach(port, DeviceType::DUPLO_TRAIN_BASE_LIGHT);
        assert_eq!(
            table.entry(port).unwrap().history,
            vec![DeviceType::DUPLO_TRAIN_MOTOR, DeviceType::DUPLO_TRAIN_BASE_LIGHT]
        );
    }

    #[test]
    fn test_detach_keeps_entry() {
        let table = PortTable::new();
        table.record_attach(PortId(1), DeviceType::VOLTAGE_SENSOR);
        table.record_detach(PortId(1));
        table.record_detach(PortId(2));

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.iter().all(|e| !e.is_attached()));
        assert_eq!(table.attached_count(), 0);
    }

    #[test]
    fn test_ports_with_class() {
        let table = PortTable::new();
        table.record_attach(PortId(0x35), DeviceType::VOLTAGE_SENSOR);
        table.record_attach(PortId(0x32), DeviceType::DUPLO_TRAIN_MOTOR);
        table.record_attach(PortId(0x11), DeviceType::DUPLO_TRAIN_BASE_LIGHT);

        assert_eq!(table.ports_with_class(DeviceClass::Motor), vec![PortId(0x32)]);
        assert_eq!(table.ports_with_class(DeviceClass::Speaker), vec![]);

        table.record_capabilities(PortId(0x32), Capabilities::new(Capabilities::OUTPUT));
        assert!(table
            .entry(PortId(0x32))
            .and_then(|e| e.capabilities)
            .is_some_and(|c| c.has(Capabilities::OUTPUT)));
    }
}
