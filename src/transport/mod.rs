//! Transport layer for hublink.
//!
//! A transport finds a hub, opens the link, delivers inbound frames to a
//! callback and writes outbound frames. Everything above this layer is
//! transport-agnostic.

mod bridge;
mod memory;

#[cfg(feature = "ble")]
mod ble;

pub use bridge::BridgeTransport;
pub use memory::MemoryTransport;

#[cfg(feature = "ble")]
pub use ble::BleTransport;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Callback invoked with each raw inbound frame.
///
/// May run on any task or thread the transport chooses.
pub type FrameCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// A hub found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Transport-specific address.
    pub id: String,
    /// Advertised name.
    pub name: Option<String>,
    /// Manufacturer id from the advertisement.
    pub manufacturer_id: Option<u16>,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            manufacturer_id: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_manufacturer(mut self, id: u16) -> Self {
        self.manufacturer_id = Some(id);
        self
    }

    /// Whether the advertisement carries the LEGO manufacturer id.
    pub fn is_lego_hub(&self) -> bool {
        self.manufacturer_id == Some(crate::LEGO_MANUFACTURER_ID)
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// Link to a single hub.
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Look for a hub. `Ok(None)` when nothing was found before `timeout`.
    async fn scan(&self, timeout: Duration) -> Result<Option<DeviceHandle>>;

    /// Open the link to a scanned hub.
    async fn connect(&self, device: &DeviceHandle) -> Result<()>;

    /// Route inbound frames to `on_frame`. Replaces any previous callback.
    async fn subscribe(&self, on_frame: FrameCallback) -> Result<()>;

    /// Write one complete frame.
    async fn write(&self, frame: &[u8]) -> Result<()>;

    /// Close the link. Closing an idle transport is a no-op.
    async fn disconnect(&self) -> Result<()>;

    /// Check if the link is up.
    fn is_connected(&self) -> bool;

    /// Get transport type name.
    fn transport_type(&self) -> &'static str;
}

/// Transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Bluetooth LE via the host adapter.
    #[default]
    Ble,
    /// TCP connection to a hub bridge or simulator.
    Bridge,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ble => write!(f, "ble"),
            Self::Bridge => write!(f, "bridge"),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Which transport to use.
    #[serde(default)]
    pub kind: TransportKind,

    /// Bridge address (`host:port`), required for the bridge transport.
    #[serde(default)]
    pub bridge_addr: Option<String>,

    /// Bluetooth adapter index.
    #[serde(default)]
    pub adapter_index: usize,

    /// Connection timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Write timeout.
    #[serde(default = "default_write_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_write_timeout() -> Duration {
    Duration::from_secs(2)
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            bridge_addr: None,
            adapter_index: 0,
            connect_timeout: default_connect_timeout(),
            write_timeout: default_write_timeout(),
        }
    }
}

/// Create the configured transport.
pub async fn create_transport(config: &TransportConfig) -> Result<Arc<dyn HubTransport>> {
    match config.kind {
        TransportKind::Bridge => {
            let addr = config
                .bridge_addr
                .clone()
                .ok_or_else(|| Error::InvalidConfig("transport.bridge_addr is required".into()))?;
            Ok(Arc::new(BridgeTransport::new(addr, config)))
        }
        #[cfg(feature = "ble")]
        TransportKind::Ble => {
            let transport = BleTransport::new(config).await?;
            Ok(Arc::new(transport))
        }
        #[cfg(not(feature = "ble"))]
        TransportKind::Ble => Err(Error::Config(
            "built without bluetooth support (enable the `ble` feature)".into(),
        )),
    }
}
