//! Integration tests for the endpoint connection lifecycle.
//!
//! These tests run the real driver task of a `ConnectionEndpoint` against the
//! simulated transport, with tokio's clock paused so the liveness timer can be
//! stepped deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use classroom_core::{ConnectionState, Flag, FlagBits, MacAddress, MachineKind, MachineRecord, UserAccount};
use classroom_master::application::supervise_endpoint::{
    ConnectionEndpoint, Dispatch, EndpointContext, EndpointEvent, EndpointSettings,
};
use classroom_master::application::user_directory::{ScreenshotPolicy, UserDirectory};
use classroom_master::infrastructure::directory::memory::InMemoryDirectory;
use classroom_master::infrastructure::network::{WakeError, WakeOnLan};
use classroom_master::infrastructure::transport::mock::{MockConnector, MockMachine, SessionCommand};
use classroom_master::infrastructure::transport::{LinkEvent, LinkState};
use tokio::sync::mpsc;

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Remembers every MAC address it was asked to wake.
#[derive(Default)]
struct RecordingWaker {
    woken: Mutex<Vec<String>>,
}

impl WakeOnLan for RecordingWaker {
    fn wake(&self, mac: &MacAddress) -> Result<(), WakeError> {
        self.woken.lock().unwrap().push(mac.to_string());
        Ok(())
    }
}

struct Harness {
    endpoint: Arc<ConnectionEndpoint>,
    machine: Arc<MockMachine>,
    waker: Arc<RecordingWaker>,
    events: mpsc::UnboundedReceiver<EndpointEvent>,
}

fn harness() -> Harness {
    let directory = Arc::new(InMemoryDirectory::new());
    directory.add_user(UserAccount {
        id: "uid=anna".to_string(),
        username: "anna".to_string(),
        is_teacher: false,
        group_ids: vec![],
    });
    let connector = Arc::new(MockConnector::new());
    let waker = Arc::new(RecordingWaker::default());
    let (events_tx, events) = mpsc::unbounded_channel();
    let context = EndpointContext {
        connector: connector.clone(),
        users: Arc::new(UserDirectory::new(directory, ScreenshotPolicy::default())),
        waker: waker.clone(),
        reachability: None,
        settings: EndpointSettings::default(),
        events: events_tx,
    };
    let record = MachineRecord {
        id: "cn=pc01".to_string(),
        name: "pc01".to_string(),
        ips: vec!["10.0.0.1".to_string()],
        macs: vec!["00:11:22:AA:BB:CC".to_string()],
        description: Some("front row".to_string()),
        kind: MachineKind::Windows,
    };
    let endpoint = ConnectionEndpoint::new(record, context).expect("machine has an address");
    Harness {
        endpoint,
        machine: connector.machine("10.0.0.1"),
        waker,
        events,
    }
}

/// Lets the driver task drain its queue.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn bring_up(h: &Harness) {
    h.machine.emit(LinkEvent::StateChanged(LinkState::Connected));
    h.machine.emit(LinkEvent::StateChanged(LinkState::Connected));
    settle().await;
}

fn drain(events: &mut mpsc::UnboundedReceiver<EndpointEvent>) -> Vec<EndpointEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_driver_completes_handshake_and_tracks_reports() {
    // Arrange
    let mut h = harness();
    h.endpoint.open();

    // Act
    bring_up(&h).await;
    h.machine.emit(LinkEvent::Identity {
        username: "anna".to_string(),
        homedir: "/home/anna".to_string(),
    });
    settle().await;
    h.machine.emit(LinkEvent::Flags(FlagBits::SCREEN_LOCK));
    settle().await;

    // Assert
    assert_eq!(h.endpoint.state().current().unwrap(), ConnectionState::Ready);
    assert_eq!(h.endpoint.username().current().unwrap().as_deref(), Some("anna"));
    assert_eq!(h.endpoint.flag(Flag::ScreenLock).unwrap(), Some(true));
    assert_eq!(
        drain(&mut h.events),
        vec![
            EndpointEvent::Connected {
                name: "pc01".to_string()
            },
            EndpointEvent::Identity {
                name: "pc01".to_string(),
                username: Some("anna".to_string())
            },
            EndpointEvent::FlagChanged {
                name: "pc01".to_string(),
                flag: Flag::ScreenLock,
                value: true
            },
        ]
    );
    assert_eq!(h.machine.sessions_opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_driver_polls_identity_while_ready() {
    let h = harness();
    h.endpoint.open();
    bring_up(&h).await;
    h.machine.clear_commands();

    tokio::time::sleep(Duration::from_secs(3)).await;

    let polls = h
        .machine
        .commands()
        .into_iter()
        .filter(|c| *c == SessionCommand::RequestIdentity)
        .count();
    assert!(polls >= 2, "expected periodic identity requests, got {polls}");
}

#[tokio::test(start_paused = true)]
async fn test_silent_machine_is_reconnected_and_can_come_back() {
    // Arrange
    let h = harness();
    h.endpoint.open();
    bring_up(&h).await;
    h.machine.emit(LinkEvent::Identity {
        username: "anna".to_string(),
        homedir: "/home/anna".to_string(),
    });
    settle().await;

    // Act: no further replies for longer than the live timeout
    tokio::time::sleep(Duration::from_secs(12)).await;

    // Assert
    assert_eq!(h.machine.connects(), 2);
    assert_eq!(h.machine.session_closes(), 1);
    assert_eq!(
        h.endpoint.state().current().unwrap(),
        ConnectionState::Disconnected
    );
    assert_eq!(h.endpoint.username().current().unwrap(), None);

    // The fresh transport reaches Ready again
    bring_up(&h).await;
    assert_eq!(h.endpoint.state().current().unwrap(), ConnectionState::Ready);
    assert_eq!(h.machine.sessions_opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_link_failure_leaves_ready_and_blocks_commands() {
    let h = harness();
    h.endpoint.open();
    bring_up(&h).await;

    h.machine.emit(LinkEvent::StateChanged(LinkState::Disconnected));
    settle().await;

    assert_eq!(
        h.endpoint.state().current().unwrap(),
        ConnectionState::Disconnected
    );
    assert_eq!(h.endpoint.lock_screen().unwrap(), Dispatch::Skipped);
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_driver_and_session() {
    let h = harness();
    h.endpoint.open();
    bring_up(&h).await;

    h.endpoint.close().unwrap();
    h.machine.emit(LinkEvent::StateChanged(LinkState::Connected));
    settle().await;

    assert_eq!(h.machine.session_closes(), 1);
    assert_eq!(
        h.endpoint.state().current().unwrap(),
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn test_power_on_works_without_connection() {
    let h = harness();

    let result = h.endpoint.power_on().unwrap();

    assert_eq!(result, Dispatch::Sent);
    assert_eq!(*h.waker.woken.lock().unwrap(), vec!["00:11:22:aa:bb:cc"]);
}
