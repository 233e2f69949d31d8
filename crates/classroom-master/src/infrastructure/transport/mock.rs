//! Recording transport for unit and integration testing.
//!
//! [`MockConnector`] hands out transports that talk to a simulated agent per
//! host ([`MockMachine`]).  The simulated agent records every protocol command
//! and keeps a state bitmask that follows the commands (locking the screen
//! sets `ScreenLock`, starting a demo client sets `DemoClient`, ...), so tests
//! can feed realistic flag reports back into an endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use classroom_core::{Flag, FlagBits};
use parking_lot::Mutex;

use super::{
    ConnectRequest, LinkEvent, LinkEventSink, ProtocolSession, Transport, TransportConnector,
};

/// A protocol command received by a [`MockMachine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    RequestIdentity,
    RequestFlags,
    LockScreen,
    UnlockScreen,
    LockInput,
    UnlockInput,
    DisplayMessage { title: String, text: String },
    PowerDown,
    Restart,
    Logout,
    StartDemoServer { vnc_port: u16, demo_port: u16 },
    StopDemoServer,
    AllowHost(String),
    DenyHost(String),
    StartDemo { host: String, port: u16, fullscreen: bool },
    StopDemo,
}

#[derive(Debug, Default)]
struct MachineState {
    commands: Vec<SessionCommand>,
    flags: FlagBits,
    image: Option<Vec<u8>>,
    connects: usize,
    sessions_opened: usize,
    transport_stops: usize,
    session_closes: usize,
    sink: Option<LinkEventSink>,
}

/// Simulated agent on one host.
#[derive(Debug, Default)]
pub struct MockMachine {
    state: Mutex<MachineState>,
}

impl MockMachine {
    /// Every command received so far, oldest first.
    pub fn commands(&self) -> Vec<SessionCommand> {
        self.state.lock().commands.clone()
    }

    /// Forgets the recorded commands.
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// The state bitmask the agent would report now.
    pub fn flags(&self) -> FlagBits {
        self.state.lock().flags
    }

    /// Sets the framebuffer returned by `current_image`.
    pub fn set_image(&self, bytes: Vec<u8>) {
        self.state.lock().image = Some(bytes);
    }

    /// Number of `connect` calls for this host.
    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of protocol sessions layered on transports of this host.
    pub fn sessions_opened(&self) -> usize {
        self.state.lock().sessions_opened
    }

    /// Number of times a bare transport was stopped.
    pub fn transport_stops(&self) -> usize {
        self.state.lock().transport_stops
    }

    /// Number of times a protocol session was closed.
    pub fn session_closes(&self) -> usize {
        self.state.lock().session_closes
    }

    /// Sends `event` through the sink of the most recent connect call.
    ///
    /// Returns `false` if this host was never connected.
    pub fn emit(&self, event: LinkEvent) -> bool {
        let sink = self.state.lock().sink.clone();
        match sink {
            Some(sink) => {
                sink.emit(event);
                true
            }
            None => false,
        }
    }

    fn record(&self, command: SessionCommand) {
        let mut state = self.state.lock();
        let flags = state.flags;
        state.flags = match &command {
            SessionCommand::LockScreen => flags.with(Flag::ScreenLock, true),
            SessionCommand::UnlockScreen => flags.with(Flag::ScreenLock, false),
            SessionCommand::LockInput => flags.with(Flag::InputLock, true),
            SessionCommand::UnlockInput => flags.with(Flag::InputLock, false),
            SessionCommand::DisplayMessage { .. } => flags.with(Flag::MessageBox, true),
            SessionCommand::StartDemoServer { .. } => flags.with(Flag::DemoServer, true),
            SessionCommand::StopDemoServer => flags.with(Flag::DemoServer, false),
            SessionCommand::StartDemo { .. } => flags.with(Flag::DemoClient, true),
            SessionCommand::StopDemo => flags.with(Flag::DemoClient, false),
            _ => flags,
        };
        state.commands.push(command);
    }
}

/// A [`TransportConnector`] that connects to [`MockMachine`]s.
#[derive(Debug, Default)]
pub struct MockConnector {
    machines: Mutex<HashMap<String, Arc<MockMachine>>>,
    requests: Mutex<Vec<ConnectRequest>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The simulated agent for `host`, created on first use.
    pub fn machine(&self, host: &str) -> Arc<MockMachine> {
        Arc::clone(self.machines.lock().entry(host.to_string()).or_default())
    }

    /// Every connect request received so far.
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.requests.lock().clone()
    }
}

impl TransportConnector for MockConnector {
    fn connect(&self, request: &ConnectRequest, events: LinkEventSink) -> Box<dyn Transport> {
        self.requests.lock().push(request.clone());
        let machine = self.machine(&request.host);
        {
            let mut state = machine.state.lock();
            state.connects += 1;
            state.sink = Some(events);
        }
        Box::new(MockTransport { machine })
    }
}

struct MockTransport {
    machine: Arc<MockMachine>,
}

impl Transport for MockTransport {
    fn into_session(self: Box<Self>) -> Box<dyn ProtocolSession> {
        self.machine.state.lock().sessions_opened += 1;
        Box::new(MockSession {
            machine: self.machine,
        })
    }

    fn stop(self: Box<Self>) {
        self.machine.state.lock().transport_stops += 1;
    }
}

struct MockSession {
    machine: Arc<MockMachine>,
}

impl ProtocolSession for MockSession {
    fn request_identity(&self) {
        self.machine.record(SessionCommand::RequestIdentity);
    }

    fn request_flags(&self) {
        self.machine.record(SessionCommand::RequestFlags);
    }

    fn lock_screen(&self) {
        self.machine.record(SessionCommand::LockScreen);
    }

    fn unlock_screen(&self) {
        self.machine.record(SessionCommand::UnlockScreen);
    }

    fn lock_input(&self) {
        self.machine.record(SessionCommand::LockInput);
    }

    fn unlock_input(&self) {
        self.machine.record(SessionCommand::UnlockInput);
    }

    fn display_message(&self, title: &str, text: &str) {
        self.machine.record(SessionCommand::DisplayMessage {
            title: title.to_string(),
            text: text.to_string(),
        });
    }

    fn power_down(&self) {
        self.machine.record(SessionCommand::PowerDown);
    }

    fn restart(&self) {
        self.machine.record(SessionCommand::Restart);
    }

    fn logout(&self) {
        self.machine.record(SessionCommand::Logout);
    }

    fn start_demo_server(&self, vnc_port: u16, demo_port: u16) {
        self.machine.record(SessionCommand::StartDemoServer {
            vnc_port,
            demo_port,
        });
    }

    fn stop_demo_server(&self) {
        self.machine.record(SessionCommand::StopDemoServer);
    }

    fn allow_host(&self, ip: &str) {
        self.machine.record(SessionCommand::AllowHost(ip.to_string()));
    }

    fn deny_host(&self, ip: &str) {
        self.machine.record(SessionCommand::DenyHost(ip.to_string()));
    }

    fn start_demo(&self, host: &str, port: u16, fullscreen: bool) {
        self.machine.record(SessionCommand::StartDemo {
            host: host.to_string(),
            port,
            fullscreen,
        });
    }

    fn stop_demo(&self) {
        self.machine.record(SessionCommand::StopDemo);
    }

    fn current_image(&self) -> Option<Vec<u8>> {
        self.machine.state.lock().image.clone()
    }

    fn close(self: Box<Self>) {
        self.machine.state.lock().session_closes += 1;
    }
}
