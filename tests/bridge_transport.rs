//! TCP bridge transport tests - a fake hub behind a local listener.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use hublink::config::HubProfile;
use hublink::protocol::FrameCodec;
use hublink::supervisor::{ConnectionSupervisor, SupervisorConfig};
use hublink::transport::{create_transport, HubTransport, TransportConfig, TransportKind};
use hublink::types::{DeviceType, PortId};

// ============================================================================
// Fake hub
// ============================================================================

const ATTACH_MOTOR: [u8; 7] = [0x07, 0x00, 0x04, 0x32, 0x01, 0x29, 0x00];

/// Accepts bridge connections, announces a motor on 0x32 and forwards every
/// received frame to the returned channel. Closes a connection on request.
async fn fake_hub() -> (String, mpsc::UnboundedReceiver<Vec<u8>>, mpsc::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = mpsc::channel::<()>(1);
    let close_rx = Arc::new(tokio::sync::Mutex::new(close_rx));

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let frames_tx = frames_tx.clone();
            let close_rx = Arc::clone(&close_rx);
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, FrameCodec::new());
                // Scan probes hang up straight away
                if framed.send(ATTACH_MOTOR.to_vec()).await.is_err() {
                    return;
                }
                let mut close_rx = close_rx.lock().await;
                loop {
                    tokio::select! {
                        _ = close_rx.recv() => return,
                        frame = framed.next() => match frame {
                            Some(Ok(frame)) => {
                                let _ = frames_tx.send(frame);
                            }
                            _ => return,
                        },
                    }
                }
            });
        }
    });

    (addr, frames_rx, close_tx)
}

fn bridge_config(addr: &str) -> TransportConfig {
    TransportConfig {
        kind: TransportKind::Bridge,
        bridge_addr: Some(addr.to_string()),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        max_attempts: 2,
        retry_delay: Duration::from_millis(20),
        scan_timeout: Duration::from_secs(1),
        link_check_interval: Duration::from_millis(10),
        activation_settle: Duration::from_millis(20),
    }
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("fake hub stopped")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_bridge_session_round_trip() {
    let (addr, mut frames, _close) = fake_hub().await;
    let transport = create_transport(&bridge_config(&addr)).await.unwrap();
    assert_eq!(transport.transport_type(), "bridge");

    let supervisor =
        ConnectionSupervisor::new(transport, HubProfile::default(), supervisor_config());
    let active = supervisor.connect_once().await.unwrap();

    // Activation goes out first
    assert_eq!(next_frame(&mut frames).await, vec![0x05, 0x00, 0x01, 0x02, 0x02]);

    let motor = PortId(0x32);
    for _ in 0..100 {
        if active.ports().lookup(motor).is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(active.ports().lookup(motor), Some(DeviceType::DUPLO_TRAIN_MOTOR));

    active.dispatcher().set_motor_speed(motor, -100).await.unwrap();
    assert_eq!(
        next_frame(&mut frames).await,
        vec![0x08, 0x00, 0x81, 0x32, 0x01, 0x51, 0x00, 0x9C]
    );

    supervisor.shutdown().await.unwrap();
    assert_eq!(
        next_frame(&mut frames).await,
        vec![0x08, 0x00, 0x81, 0x32, 0x01, 0x51, 0x00, 0x00]
    );
}

#[tokio::test]
async fn test_bridge_detects_closed_stream() {
    let (addr, mut frames, close) = fake_hub().await;
    let transport = create_transport(&bridge_config(&addr)).await.unwrap();
    let supervisor = ConnectionSupervisor::new(
        Arc::clone(&transport),
        HubProfile::default(),
        supervisor_config(),
    );
    supervisor.connect_once().await.unwrap();
    next_frame(&mut frames).await;
    assert!(transport.is_connected());

    close.send(()).await.unwrap();
    for _ in 0..100 {
        if !transport.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!transport.is_connected());
    assert!(transport.write(&[0x05, 0x00, 0x02, 0x01, 0x01]).await.is_err());
}

#[tokio::test]
async fn test_unreachable_bridge_finds_nothing() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let transport = create_transport(&bridge_config(&addr)).await.unwrap();
    let found = transport.scan(Duration::from_millis(200)).await.unwrap();
    assert!(found.is_none());
}
