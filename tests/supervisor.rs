//! Session lifecycle tests against the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use hublink::config::HubProfile;
use hublink::error::{Error, ErrorKind};
use hublink::events::HubEvent;
use hublink::protocol::{info_type, Message, PortInfo};
use hublink::router::ResponseKey;
use hublink::supervisor::{ConnectionSupervisor, SupervisorConfig};
use hublink::transport::{DeviceHandle, HubTransport, MemoryTransport};
use hublink::types::{DeviceType, PortId, SessionState};
use hublink::LEGO_MANUFACTURER_ID;

// ============================================================================
// Test Infrastructure
// ============================================================================

const MOTOR: PortId = PortId(0x32);

fn hub() -> DeviceHandle {
    DeviceHandle::new("hub-1")
        .with_name("Train Base")
        .with_manufacturer(LEGO_MANUFACTURER_ID)
}

fn fast_config(max_attempts: u32) -> SupervisorConfig {
    SupervisorConfig {
        max_attempts,
        retry_delay: Duration::from_millis(5),
        scan_timeout: Duration::from_millis(5),
        link_check_interval: Duration::from_millis(5),
        activation_settle: Duration::ZERO,
    }
}

fn supervisor(
    transport: &Arc<MemoryTransport>,
    max_attempts: u32,
) -> Arc<ConnectionSupervisor> {
    Arc::new(ConnectionSupervisor::new(
        Arc::clone(transport) as Arc<dyn HubTransport>,
        HubProfile::default(),
        fast_config(max_attempts),
    ))
}

fn drain_states(rx: &mut broadcast::Receiver<HubEvent>) -> Vec<(SessionState, SessionState)> {
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let HubEvent::SessionStateChanged { old, new } = event {
            states.push((old, new));
        }
    }
    states
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not met in time");
}

// ============================================================================
// Reconnection
// ============================================================================

#[tokio::test]
async fn test_failed_scans_drain_after_max_attempts() {
    let transport = Arc::new(MemoryTransport::new());
    let supervisor = supervisor(&transport, 3);
    let mut events = supervisor.subscribe();

    let cancel = CancellationToken::new();
    let result = supervisor.run_until_connected(&cancel).await;
    assert!(matches!(result, Err(Error::ReconnectExhausted { attempts: 3 })));

    use SessionState::*;
    assert_eq!(
        drain_states(&mut events),
        vec![
            (Disconnected, Scanning),
            (Scanning, Disconnected),
            (Disconnected, Scanning),
            (Scanning, Disconnected),
            (Disconnected, Scanning),
            (Scanning, Disconnected),
            (Disconnected, Draining),
        ]
    );
    assert_eq!(transport.scan_count(), 3);

    // Terminal: nothing else is attempted
    let again = supervisor.connect_once().await;
    assert!(matches!(again, Err(Error::ReconnectExhausted { .. })));
    assert_eq!(transport.scan_count(), 3);
    assert_eq!(supervisor.session().last_error, Some(ErrorKind::Transport));
}

#[tokio::test]
async fn test_reconnects_after_link_loss() {
    let transport = Arc::new(MemoryTransport::with_device(hub()));
    let supervisor = supervisor(&transport, 3);

    let cancel = CancellationToken::new();
    let task = {
        let supervisor = Arc::clone(&supervisor);
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.supervise(&cancel).await })
    };

    wait_for(|| supervisor.active().is_some()).await;
    let first = supervisor.active().unwrap();
    transport.inject_frame(&[0x06, 0x00, 0x04, 0x32, 0x01, 0x29, 0x00]);
    wait_for(|| first.ports().lookup(MOTOR).is_some()).await;

    transport.drop_link();
    wait_for(|| transport.connect_count() == 2 && supervisor.active().is_some()).await;

    // The new session starts with an empty port table
    let second = supervisor.active().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.ports().lookup(MOTOR), None);
    assert_eq!(supervisor.state(), SessionState::Connected);
    assert_eq!(supervisor.session().attempt_count, 0);

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(supervisor.state(), SessionState::Draining);
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_stale_session_write_keeps_new_link() {
    let transport = Arc::new(MemoryTransport::with_device(hub()));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::clone(&transport) as Arc<dyn HubTransport>,
        HubProfile::default(),
        SupervisorConfig {
            retry_delay: Duration::from_millis(100),
            ..fast_config(3)
        },
    ));

    let cancel = CancellationToken::new();
    let task = {
        let supervisor = Arc::clone(&supervisor);
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.supervise(&cancel).await })
    };

    wait_for(|| supervisor.active().is_some()).await;
    let old = supervisor.active().unwrap();
    transport.drop_link();
    wait_for(|| supervisor.state() == SessionState::Disconnected).await;

    // A caller still holding the old session writes during the backoff
    let result = old.dispatcher().play_sound(1).await;
    assert!(matches!(result, Err(Error::TransportLost(_))));

    wait_for(|| transport.connect_count() == 2 && supervisor.active().is_some()).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(supervisor.state(), SessionState::Connected);
    assert_eq!(transport.connect_count(), 2);
    assert!(transport.is_connected());
    assert_eq!(supervisor.session().attempt_count, 0);

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_write_failure_reports_transport_lost() {
    let transport = Arc::new(MemoryTransport::with_device(hub()));
    let supervisor = supervisor(&transport, 3);
    let active = supervisor.connect_once().await.unwrap();

    transport.inject_frame(&[0x06, 0x00, 0x04, 0x32, 0x01, 0x29, 0x00]);
    wait_for(|| active.ports().lookup(MOTOR).is_some()).await;

    transport.drop_link();
    let result = active.dispatcher().set_motor_speed(MOTOR, 50).await;
    assert!(matches!(result, Err(Error::TransportLost(_))));
}

// ============================================================================
// Port table through the router
// ============================================================================

#[tokio::test]
async fn test_port_lifecycle() {
    let transport = Arc::new(MemoryTransport::with_device(hub()));
    let supervisor = supervisor(&transport, 3);
    let mut events = supervisor.subscribe();
    let active = supervisor.connect_once().await.unwrap();
    let ports = Arc::clone(active.ports());

    transport.inject_frame(&[0x06, 0x00, 0x04, 0x32, 0x01, 0x29, 0x00]);
    wait_for(|| ports.lookup(MOTOR) == Some(DeviceType(0x0029))).await;

    transport.inject_frame(&[0x05, 0x00, 0x04, 0x32, 0x00]);
    wait_for(|| ports.lookup(MOTOR).is_none()).await;

    transport.inject_frame(&[0x06, 0x00, 0x04, 0x32, 0x01, 0x5B, 0x00]);
    wait_for(|| ports.lookup(MOTOR) == Some(DeviceType(0x005B))).await;

    let entry = ports.entry(MOTOR).unwrap();
    assert_eq!(entry.history, vec![DeviceType(0x0029), DeviceType(0x005B)]);

    let mut port_events = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            HubEvent::PortAttached { .. } | HubEvent::PortDetached { .. } => {
                port_events.push(event);
            }
            _ => {}
        }
    }
    assert_eq!(
        port_events,
        vec![
            HubEvent::PortAttached {
                port: MOTOR,
                device_type: DeviceType(0x0029)
            },
            HubEvent::PortDetached { port: MOTOR },
            HubEvent::PortAttached {
                port: MOTOR,
                device_type: DeviceType(0x005B)
            },
        ]
    );
}

#[tokio::test]
async fn test_motor_command_needs_motor_port() {
    let transport = Arc::new(MemoryTransport::with_device(hub()));
    let supervisor = supervisor(&transport, 3);
    let active = supervisor.connect_once().await.unwrap();
    let dispatcher = active.dispatcher();

    let result = dispatcher.set_motor_speed(MOTOR, 30).await;
    assert!(matches!(result, Err(Error::PortNotFound(0x32))));

    // Speaker on the motor port
    transport.inject_frame(&[0x06, 0x00, 0x04, 0x32, 0x01, 0x2A, 0x00]);
    wait_for(|| active.ports().lookup(MOTOR).is_some()).await;
    let result = dispatcher.set_motor_speed(MOTOR, 30).await;
    assert!(matches!(result, Err(Error::PortNotMotor(0x32))));

    transport.clear_written();
    transport.inject_frame(&[0x06, 0x00, 0x04, 0x32, 0x01, 0x29, 0x00]);
    wait_for(|| active.ports().lookup(MOTOR) == Some(DeviceType(0x0029))).await;
    dispatcher.set_motor_speed(MOTOR, -1).await.unwrap();
    assert_eq!(
        transport.written(),
        vec![vec![0x08, 0x00, 0x81, 0x32, 0x01, 0x51, 0x00, 0xFF]]
    );
}

#[tokio::test]
async fn test_query_response_matched_by_port() {
    let transport = Arc::new(MemoryTransport::with_device(hub()));
    transport.set_responder(|frame| {
        if frame.get(2) == Some(&0x21) {
            vec![vec![0x0B, 0x00, 0x43, frame[3], 0x01, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00]]
        } else {
            Vec::new()
        }
    });
    let supervisor = supervisor(&transport, 3);
    let active = supervisor.connect_once().await.unwrap();

    let pending = active.router().expect(ResponseKey::port_info(MOTOR));
    active
        .dispatcher()
        .query_port_info(MOTOR, info_type::MODE_INFO)
        .await
        .unwrap();

    let reply = pending.wait(Duration::from_secs(1)).await;
    assert!(matches!(
        reply,
        Some(Message::PortInformationResponse {
            port: Some(MOTOR),
            info: Some(PortInfo::ModeInfo {
                total_modes: Some(1),
                ..
            }),
            ..
        })
    ));

    wait_for(|| {
        active
            .ports()
            .entry(MOTOR)
            .is_some_and(|entry| entry.capabilities.is_some())
    })
    .await;
}

#[tokio::test]
async fn test_unanswered_query_times_out() {
    let transport = Arc::new(MemoryTransport::with_device(hub()));
    let supervisor = supervisor(&transport, 3);
    let active = supervisor.connect_once().await.unwrap();

    let pending = active.router().expect(ResponseKey::mode_info(MOTOR, 0));
    active
        .dispatcher()
        .query_port_mode_info(MOTOR, 0, 0x00)
        .await
        .unwrap();
    assert!(pending.wait(Duration::from_millis(20)).await.is_none());
}
