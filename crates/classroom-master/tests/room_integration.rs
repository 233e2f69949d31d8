//! Integration tests for room supervision.
//!
//! These tests exercise `RoomController` end-to-end against the in-memory
//! directory and the simulated transport: room selection, the demo broadcast
//! and the aggregate queries.

use std::sync::Arc;

use classroom_core::{Flag, MachineKind, MachineRecord, RoomRecord, UserAccount};
use classroom_master::application::manage_room::{RoomController, RoomError};
use classroom_master::application::supervise_endpoint::{ConnectionEndpoint, EndpointEvent};
use classroom_master::infrastructure::directory::memory::InMemoryDirectory;
use classroom_master::infrastructure::network::UdpWakeSender;
use classroom_master::infrastructure::storage::config::SupervisorConfig;
use classroom_master::infrastructure::transport::mock::{MockConnector, SessionCommand};
use classroom_master::infrastructure::transport::{LinkEvent, LinkState};
use tokio::sync::mpsc;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn machine(n: u8) -> MachineRecord {
    MachineRecord {
        id: format!("cn=pc{n:02},cn=computers"),
        name: format!("pc{n:02}"),
        ips: vec![format!("192.168.10.{n}")],
        macs: vec![],
        description: None,
        kind: MachineKind::Windows,
    }
}

fn setup() -> (
    RoomController,
    mpsc::UnboundedReceiver<EndpointEvent>,
    Arc<MockConnector>,
) {
    let directory = Arc::new(InMemoryDirectory::new());
    for n in 1..=3 {
        directory.add_machine(machine(n));
    }
    directory.add_room(
        Some("demoschool"),
        RoomRecord {
            id: "cn=demoschool-room101,cn=rooms".to_string(),
            name: "demoschool-room101".to_string(),
            member_machine_ids: vec![
                "cn=pc01,cn=computers".to_string(),
                "cn=pc02,cn=computers".to_string(),
                "cn=pc03,cn=computers".to_string(),
                "cn=gone,cn=computers".to_string(),
            ],
        },
    );
    directory.add_user(UserAccount {
        id: "uid=teach".to_string(),
        username: "teach".to_string(),
        is_teacher: true,
        group_ids: vec![],
    });
    directory.add_user(UserAccount {
        id: "uid=anna".to_string(),
        username: "anna".to_string(),
        is_teacher: false,
        group_ids: vec![],
    });

    let connector = Arc::new(MockConnector::new());
    let config = SupervisorConfig::default();
    let waker = Arc::new(UdpWakeSender::new(&config.wake_on_lan));
    let (controller, events) = RoomController::new(directory, connector.clone(), waker, &config);
    (controller, events, connector)
}

async fn make_ready(endpoint: &ConnectionEndpoint, username: &str) {
    let session = endpoint.current_session();
    for _ in 0..2 {
        endpoint
            .handle_link_event(session, LinkEvent::StateChanged(LinkState::Connected))
            .await
            .unwrap();
    }
    endpoint
        .handle_link_event(
            session,
            LinkEvent::Identity {
                username: username.to_string(),
                homedir: format!("/home/{username}"),
            },
        )
        .await
        .unwrap();
}

/// Feeds each simulated agent's flag register back into its endpoint, the
/// way a real agent answers a flag request.
fn report_flags(controller: &RoomController, connector: &MockConnector) {
    for endpoint in controller.endpoints() {
        let bits = connector.machine(endpoint.ip()).flags();
        endpoint.handle_flags(bits.0).unwrap();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_room_with_unresolvable_member_supervises_the_rest() {
    // Arrange
    let (mut controller, _events, connector) = setup();

    // Act
    let count = controller.set("demoschool-room101").await.unwrap();

    // Assert: the member missing from the directory is skipped, the rest connect
    assert_eq!(count, 3);
    let ids: Vec<String> = controller
        .endpoints()
        .iter()
        .map(|e| e.machine().id.clone())
        .collect();
    assert!(!ids.contains(&"cn=gone,cn=computers".to_string()));
    assert_eq!(
        ids,
        vec![
            "cn=pc01,cn=computers",
            "cn=pc02,cn=computers",
            "cn=pc03,cn=computers"
        ]
    );
    let hosts: Vec<String> = connector.requests().into_iter().map(|r| r.host).collect();
    assert_eq!(hosts, vec!["192.168.10.1", "192.168.10.2", "192.168.10.3"]);
    assert!(connector.requests().iter().all(|r| r.port == 11100));
}

#[tokio::test]
async fn test_unknown_room_is_reported() {
    let (mut controller, _events, _connector) = setup();

    let result = controller.set("room999").await;

    assert!(matches!(result, Err(RoomError::RoomNotFound(_))));
}

#[tokio::test]
async fn test_demo_broadcast_round_trip() {
    // Arrange
    let (mut controller, mut events, connector) = setup();
    controller.set("demoschool-room101").await.unwrap();
    make_ready(controller.endpoint("pc01").unwrap(), "teach").await;
    make_ready(controller.endpoint("pc02").unwrap(), "teach (Ms. Teach)").await;
    make_ready(controller.endpoint("pc03").unwrap(), "anna").await;

    // Act: start
    controller.start_demo("pc01", true).await.unwrap();
    report_flags(&controller, &connector);

    // Assert: teacher client windowed, student fullscreen
    let start_of = |ip: &str| {
        connector
            .machine(ip)
            .commands()
            .into_iter()
            .find(|c| matches!(c, SessionCommand::StartDemo { .. }))
    };
    assert_eq!(
        start_of("192.168.10.2"),
        Some(SessionCommand::StartDemo {
            host: "192.168.10.1".to_string(),
            port: 11400,
            fullscreen: false,
        })
    );
    assert_eq!(
        start_of("192.168.10.3"),
        Some(SessionCommand::StartDemo {
            host: "192.168.10.1".to_string(),
            port: 11400,
            fullscreen: true,
        })
    );
    let server_commands = connector.machine("192.168.10.1").commands();
    assert!(server_commands.contains(&SessionCommand::StartDemoServer {
        vnc_port: 11100,
        demo_port: 11400
    }));
    assert!(server_commands.contains(&SessionCommand::AllowHost("192.168.10.2".to_string())));
    assert!(server_commands.contains(&SessionCommand::AllowHost("192.168.10.3".to_string())));
    assert!(controller.is_demo_active().unwrap());

    let demo_flags: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| match e {
            EndpointEvent::FlagChanged { name, flag, value } => Some((name, flag, value)),
            _ => None,
        })
        .collect();
    assert!(demo_flags.contains(&("pc01".to_string(), Flag::DemoServer, true)));
    assert!(demo_flags.contains(&("pc03".to_string(), Flag::DemoClient, true)));

    // Act: stop
    controller.stop_demo().unwrap();
    report_flags(&controller, &connector);

    // Assert: no machine reports a demo any more
    for endpoint in controller.endpoints() {
        assert_ne!(endpoint.flag(Flag::DemoServer).unwrap(), Some(true));
        assert_ne!(endpoint.flag(Flag::DemoClient).unwrap(), Some(true));
    }
    assert!(!controller.is_demo_active().unwrap());
    assert!(connector
        .machine("192.168.10.1")
        .commands()
        .contains(&SessionCommand::DenyHost("192.168.10.3".to_string())));
}

#[tokio::test]
async fn test_logged_in_users_and_student_addresses() {
    let (mut controller, _events, _connector) = setup();
    controller.set("demoschool-room101").await.unwrap();
    make_ready(controller.endpoint("pc01").unwrap(), "teach").await;
    make_ready(controller.endpoint("pc03").unwrap(), "anna").await;

    let users = controller.logged_in_usernames().await.unwrap();
    let students = controller.ip_addresses(true).await;

    assert_eq!(users, vec!["teach", "anna"]);
    assert_eq!(students, vec!["192.168.10.2", "192.168.10.3"]);
}
