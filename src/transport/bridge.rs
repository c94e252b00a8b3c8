//! TCP bridge transport.
//!
//! Talks to a hub bridge (or simulator) that forwards raw hub frames over a
//! TCP stream. Frames are delimited by the hub length byte.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use super::{DeviceHandle, FrameCallback, HubTransport, TransportConfig};
use crate::error::{Result, TransportError};
use crate::protocol::FrameCodec;

type FrameSink = SplitSink<Framed<TcpStream, FrameCodec>, Vec<u8>>;

/// TCP transport to a hub bridge.
pub struct BridgeTransport {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    /// Write half of the open stream.
    sink: tokio::sync::Mutex<Option<FrameSink>>,
    /// Inbound frame subscriber, read by the reader task per frame.
    callback: Arc<RwLock<Option<FrameCallback>>>,
    /// Frames that arrived before anyone subscribed.
    backlog: Arc<Mutex<Vec<Vec<u8>>>>,
    connected: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeTransport {
    pub fn new(addr: impl Into<String>, config: &TransportConfig) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            sink: tokio::sync::Mutex::new(None),
            callback: Arc::new(RwLock::new(None)),
            backlog: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn open(&self, limit: Duration) -> std::result::Result<TcpStream, TransportError> {
        let stream = timeout(limit, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectFailed {
                device: self.addr.clone(),
                reason: e.to_string(),
            })?;
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::ConnectFailed {
                device: self.addr.clone(),
                reason: e.to_string(),
            })?;
        Ok(stream)
    }

    fn stop_reader(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl HubTransport for BridgeTransport {
    async fn scan(&self, limit: Duration) -> Result<Option<DeviceHandle>> {
        // The bridge fronts exactly one hub; it is "found" if it accepts a connection.
        match self.open(limit).await {
            Ok(_probe) => Ok(Some(
                DeviceHandle::new(self.addr.clone())
                    .with_name("hub bridge")
                    .with_manufacturer(crate::LEGO_MANUFACTURER_ID),
            )),
            Err(e) => {
                debug!(addr = %self.addr, error = %e, "Bridge not reachable");
                Ok(None)
            }
        }
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<()> {
        self.stop_reader();
        let stream = self.open(self.connect_timeout).await?;
        let (sink, mut stream) = Framed::new(stream, FrameCodec::new()).split();

        *self.sink.lock().await = Some(sink);
        self.connected.store(true, Ordering::SeqCst);

        self.backlog.lock().clear();
        let callback = Arc::clone(&self.callback);
        let backlog = Arc::clone(&self.backlog);
        let connected = Arc::clone(&self.connected);
        let addr = self.addr.clone();
        let handle = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(frame) => {
                        trace!(frame = %hex::encode(&frame), "Bridge frame received");
                        // Hubs announce attached devices straight after connecting
                        let callback = {
                            let guard = callback.read();
                            if guard.is_none() {
                                backlog.lock().push(frame);
                                continue;
                            }
                            guard.clone()
                        };
                        if let Some(callback) = callback {
                            callback(frame);
                        }
                    }
                    Err(e) => {
                        warn!(addr = %addr, error = %e, "Bridge stream error");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            info!(addr = %addr, "Bridge stream closed");
        });
        *self.reader.lock() = Some(handle);

        info!(device = %device, "Connected to hub bridge");
        Ok(())
    }

    async fn subscribe(&self, on_frame: FrameCallback) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::SubscribeFailed("not connected".into()).into());
        }
        // Replay under the lock so early frames stay ahead of new ones
        let mut callback = self.callback.write();
        let pending = std::mem::take(&mut *self.backlog.lock());
        if !pending.is_empty() {
            debug!(frames = pending.len(), "Replaying frames received before subscribe");
        }
        for frame in pending {
            on_frame(frame);
        }
        *callback = Some(on_frame);
        Ok(())
    }

    async fn write(&self, frame: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected.into());
        }

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;

        match timeout(self.write_timeout, sink.send(frame.to_vec())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                if !self.is_connected() {
                    return Err(TransportError::NotConnected.into());
                }
                Err(TransportError::WriteFailed(e.to_string()).into())
            }
            Err(_) => Err(TransportError::Timeout.into()),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.stop_reader();
        self.connected.store(false, Ordering::SeqCst);
        *self.callback.write() = None;

        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            // Peer may already be gone
            let _ = sink.close().await;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn transport_type(&self) -> &'static str {
        "bridge"
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
