//! In-process scriptable transport.
//!
//! Stands in for a hub in tests and dry runs: scan and connect outcomes are
//! scripted, written frames are recorded, and a responder can answer writes
//! with inbound frames the way a hub would.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::{DeviceHandle, FrameCallback, HubTransport};
use crate::error::{Result, TransportError};

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

/// Scriptable in-memory transport.
pub struct MemoryTransport {
    /// Device returned by scans once the script runs out.
    device: RwLock<Option<DeviceHandle>>,
    /// Scripted scan outcomes, consumed first.
    scan_script: Mutex<VecDeque<Option<DeviceHandle>>>,
    /// Number of upcoming connects that fail.
    failing_connects: AtomicU32,
    connected: AtomicBool,
    callback: RwLock<Option<FrameCallback>>,
    responder: RwLock<Option<Responder>>,
    written: Mutex<Vec<Vec<u8>>>,
    scans: AtomicU32,
    connects: AtomicU32,
}

impl MemoryTransport {
    /// Transport whose scans find nothing.
    pub fn new() -> Self {
        Self {
            device: RwLock::new(None),
            scan_script: Mutex::new(VecDeque::new()),
            failing_connects: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            callback: RwLock::new(None),
            responder: RwLock::new(None),
            written: Mutex::new(Vec::new()),
            scans: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        }
    }

    /// Transport whose scans always find `device`.
    pub fn with_device(device: DeviceHandle) -> Self {
        let transport = Self::new();
        *transport.device.write() = Some(device);
        transport
    }

    /// Queue the outcome of the next scan.
    pub fn push_scan_result(&self, result: Option<DeviceHandle>) {
        self.scan_script.lock().push_back(result);
    }

    /// Make the next `count` connects fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Answer every written frame with the frames `responder` returns.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        *self.responder.write() = Some(Box::new(responder));
    }

    /// Deliver an inbound frame to the subscriber, as if the hub sent it.
    pub fn inject_frame(&self, frame: &[u8]) {
        let callback = self.callback.read().clone();
        match callback {
            Some(callback) => callback(frame.to_vec()),
            None => debug!("Inbound frame dropped, no subscriber"),
        }
    }

    /// Simulate the hub going out of range.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Frames written so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }

    pub fn clear_written(&self) {
        self.written.lock().clear();
    }

    pub fn scan_count(&self) -> u32 {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HubTransport for MemoryTransport {
    async fn scan(&self, _timeout: Duration) -> Result<Option<DeviceHandle>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let scripted = self.scan_script.lock().pop_front();
        Ok(match scripted {
            Some(result) => result,
            None => self.device.read().clone(),
        })
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(TransportError::ConnectFailed {
                device: device.id.clone(),
                reason: "scripted failure".into(),
            }
            .into());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, on_frame: FrameCallback) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        *self.callback.write() = Some(on_frame);
        Ok(())
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        trace!(frame = %hex::encode(frame), "Memory write");
        self.written.lock().push(frame.to_vec());

        let replies = match &*self.responder.read() {
            Some(responder) => responder(frame),
            None => Vec::new(),
        };
        for reply in replies {
            self.inject_frame(&reply);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        *self.callback.write() = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn transport_type(&self) -> &'static str {
        "memory"
    }
}
