//! Bluetooth LE transport (btleplug).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::{DeviceHandle, FrameCallback, HubTransport, TransportConfig};
use crate::error::{Result, TransportError};

/// Interval between peripheral list polls while scanning.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn service_uuid() -> Uuid {
    Uuid::from_u128(crate::SERVICE_UUID)
}

fn characteristic_uuid() -> Uuid {
    Uuid::from_u128(crate::CHARACTERISTIC_UUID)
}

struct Link {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

/// Bluetooth LE transport on one host adapter.
pub struct BleTransport {
    adapter: Adapter,
    connect_timeout: Duration,
    write_timeout: Duration,
    /// Peripheral found by the last scan.
    found: RwLock<Option<Peripheral>>,
    link: RwLock<Option<Arc<Link>>>,
    connected: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BleTransport {
    /// Open the configured adapter.
    pub async fn new(config: &TransportConfig) -> Result<Self> {
        let manager = Manager::new().await.map_err(TransportError::from)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(TransportError::from)?
            .into_iter()
            .nth(config.adapter_index)
            .ok_or_else(|| {
                TransportError::NoAdapter(format!("no adapter at index {}", config.adapter_index))
            })?;

        Ok(Self {
            adapter,
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            found: RwLock::new(None),
            link: RwLock::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// First peripheral advertising the LEGO manufacturer id.
    async fn find_hub(&self) -> std::result::Result<Option<(Peripheral, DeviceHandle)>, TransportError> {
        for peripheral in self.adapter.peripherals().await? {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            if !props
                .manufacturer_data
                .contains_key(&crate::LEGO_MANUFACTURER_ID)
            {
                continue;
            }
            let mut handle = DeviceHandle::new(props.address.to_string())
                .with_manufacturer(crate::LEGO_MANUFACTURER_ID);
            if let Some(name) = props.local_name {
                handle = handle.with_name(name);
            }
            return Ok(Some((peripheral, handle)));
        }
        Ok(None)
    }

    fn stop_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl HubTransport for BleTransport {
    async fn scan(&self, limit: Duration) -> Result<Option<DeviceHandle>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::ScanFailed(e.to_string()))?;

        let deadline = Instant::now() + limit;
        let mut result = None;
        while Instant::now() < deadline {
            if let Some((peripheral, handle)) = self.find_hub().await? {
                debug!(device = %handle, "Hub advertisement found");
                *self.found.write() = Some(peripheral);
                result = Some(handle);
                break;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        }

        if let Err(e) = self.adapter.stop_scan().await {
            warn!(error = %e, "Failed to stop scan");
        }
        Ok(result)
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<()> {
        let peripheral = self
            .found
            .read()
            .clone()
            .ok_or_else(|| TransportError::ConnectFailed {
                device: device.id.clone(),
                reason: "device was not found by the last scan".into(),
            })?;

        let connect_failed = |reason: String| TransportError::ConnectFailed {
            device: device.id.clone(),
            reason,
        };

        timeout(self.connect_timeout, peripheral.connect())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| connect_failed(e.to_string()))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| connect_failed(e.to_string()))?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic_uuid() && c.service_uuid == service_uuid())
            .ok_or_else(|| connect_failed("hub characteristic not found".into()))?;

        self.stop_tasks();
        *self.link.write() = Some(Arc::new(Link {
            peripheral: peripheral.clone(),
            characteristic,
        }));
        self.connected.store(true, Ordering::SeqCst);

        // Watch for the adapter reporting the link gone
        let mut events = self.adapter.events().await.map_err(TransportError::from)?;
        let connected = Arc::clone(&self.connected);
        let id = peripheral.id();
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        connected.store(false, Ordering::SeqCst);
                        info!("Hub disconnected");
                        break;
                    }
                }
            }
        });
        self.tasks.lock().push(watcher);

        info!(device = %device, "Connected to hub");
        Ok(())
    }

    async fn subscribe(&self, on_frame: FrameCallback) -> Result<()> {
        let link = self
            .link
            .read()
            .clone()
            .ok_or_else(|| TransportError::SubscribeFailed("not connected".into()))?;

        link.peripheral
            .subscribe(&link.characteristic)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        let mut notifications = link
            .peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;

        let uuid = characteristic_uuid();
        let connected = Arc::clone(&self.connected);
        let reader = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                trace!(frame = %hex::encode(&notification.value), "Notification received");
                on_frame(notification.value);
            }
            connected.store(false, Ordering::SeqCst);
        });
        self.tasks.lock().push(reader);
        Ok(())
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        let link = self
            .link
            .read()
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let write = link
            .peripheral
            .write(&link.characteristic, frame, WriteType::WithoutResponse);
        match timeout(self.write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if !self.is_connected() => {
                debug!(error = %e, "Write raced a disconnect");
                Err(TransportError::NotConnected.into())
            }
            Ok(Err(e)) => Err(TransportError::WriteFailed(e.to_string()).into()),
            Err(_) => Err(TransportError::Timeout.into()),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_tasks();
        self.connected.store(false, Ordering::SeqCst);
        let link = self.link.write().take();
        if let Some(link) = link {
            if let Err(e) = link.peripheral.disconnect().await {
                warn!(error = %e, "Disconnect failed");
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn transport_type(&self) -> &'static str {
        "ble"
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}
