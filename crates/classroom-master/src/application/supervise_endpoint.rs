//! SuperviseEndpoint: one supervised machine and its connection lifecycle.
//!
//! A [`ConnectionEndpoint`] owns the transport to one machine, tracks what the
//! machine reports (logged-in user, state flags) and exposes the remote
//! commands an operator can issue.
//!
//! # Connection lifecycle
//!
//! ```text
//!                 connect()
//! Disconnected ──────────────► (transport running)
//!                                     │ LinkState::Connected
//!                                     ▼
//!                              Connected (session started, identity requested)
//!                                     │ LinkState::Connected again
//!                                     ▼
//!                                   Ready ──── commands are dispatched
//! ```
//!
//! The remote-control transport drops and re-establishes its link right after
//! the protocol session has been layered on top of it.  The session is only
//! usable after that, so `Ready` is reached on the *second* `Connected` report,
//! whether or not a `Disconnected` report came in between.
//!
//! Any other link state moves the endpoint out of `Connected`/`Ready`.  The
//! session is kept; the user information is cleared.
//!
//! # Liveness
//!
//! While `Ready`, [`ConnectionEndpoint::update`] runs once per poll interval.
//! It sends an identity request and checks when the last identity reply
//! arrived.  After half the live timeout it warns; after the full timeout it
//! closes the connection and opens a fresh one.
//!
//! # Threading
//!
//! Link events and poll ticks are processed by one driver task per endpoint
//! (see [`ConnectionEndpoint::start`]), so they never run concurrently for the
//! same endpoint.  Operator commands may arrive from any task.  All reported
//! values live in [`AttributeCell`]s; the link itself sits behind its own
//! mutex, which is never held while a cell is locked.

use std::sync::{Arc, Weak};
use std::time::Duration;

use classroom_core::{
    AttributeCell, ConcurrencyError, ConnectionState, Flag, FlagBits, MachineKind, MachineRecord,
    MacAddress,
};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::user_directory::{UserDirectory, UserEntry};
use crate::infrastructure::network::{Reachability, WakeError, WakeOnLan};
use crate::infrastructure::storage::config::SupervisorConfig;
use crate::infrastructure::transport::{
    ConnectRequest, LinkEvent, LinkEventSink, LinkState, ProtocolSession, TaggedLinkEvent,
    Transport, TransportConnector,
};

// ── Settings ──────────────────────────────────────────────────────────────────

/// Timing and port parameters shared by all endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSettings {
    pub vnc_port: u16,
    pub demo_port: u16,
    pub framebuffer_update: Duration,
    pub poll_interval: Duration,
    pub live_timeout: Duration,
}

impl EndpointSettings {
    const MIN_PERIOD: Duration = Duration::from_secs(1);

    /// Reads the settings from the configuration, raising the poll interval
    /// and live timeout to at least one second.
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            vnc_port: config.vnc.port,
            demo_port: config.vnc.demo_port,
            framebuffer_update: Duration::from_secs(config.vnc.framebuffer_update_secs),
            poll_interval: Duration::from_secs(config.liveness.poll_interval_secs)
                .max(Self::MIN_PERIOD),
            live_timeout: Duration::from_secs(config.liveness.timeout_secs).max(Self::MIN_PERIOD),
        }
    }

    /// Silence after which a warning is logged.
    pub fn warn_after(&self) -> Duration {
        (self.live_timeout / 2).max(Self::MIN_PERIOD)
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

/// Collaborators every endpoint of a room shares.
#[derive(Clone)]
pub struct EndpointContext {
    pub connector: Arc<dyn TransportConnector>,
    pub users: Arc<UserDirectory>,
    pub waker: Arc<dyn WakeOnLan>,
    /// Picks among several addresses; `None` always uses the first one.
    pub reachability: Option<Arc<dyn Reachability>>,
    pub settings: EndpointSettings,
    pub events: mpsc::UnboundedSender<EndpointEvent>,
}

/// The IP and MAC address an endpoint works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveAddress {
    pub ip: String,
    pub mac: Option<String>,
}

/// Chooses the address to connect to and to wake.
///
/// Without `reachability` the first IP and MAC of the record are used.  With
/// it, the first IP that answers wins and the MAC is taken from the ARP cache
/// when it is one of the record's MACs.  Returns `None` when the record has no
/// usable IP.  Blocks while addresses are checked.
pub fn select_active_address(
    machine: &MachineRecord,
    reachability: Option<&dyn Reachability>,
) -> Option<ActiveAddress> {
    let ips: Vec<&str> = machine
        .ips
        .iter()
        .map(|ip| ip.trim())
        .filter(|ip| !ip.is_empty())
        .collect();
    let first_ip = ips.first()?.to_string();
    let first_mac = machine.primary_mac().map(str::to_string);

    let Some(reachability) = reachability else {
        return Some(ActiveAddress {
            ip: first_ip,
            mac: first_mac,
        });
    };

    let ip = match ips.iter().find(|ip| reachability.is_reachable(ip)) {
        Some(ip) => ip.to_string(),
        None => {
            warn!("{}: none of {:?} answers, using {first_ip}", machine.name, ips);
            first_ip
        }
    };

    let mac = match reachability.mac_of(&ip) {
        Some(found) => match machine.macs.iter().find(|m| m.eq_ignore_ascii_case(&found)) {
            Some(listed) => Some(listed.clone()),
            None => {
                warn!(
                    "{}: active MAC {found} is not listed for the machine",
                    machine.name
                );
                first_mac
            }
        },
        None => {
            debug!("{}: no ARP entry for {ip}", machine.name);
            first_mac
        }
    };

    Some(ActiveAddress { ip, mac })
}

// ── Public types ──────────────────────────────────────────────────────────────

/// Error type for endpoint operations.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The directory record carries no IP address.
    #[error("machine {0} has no IP address")]
    MissingAddress(String),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error("power on failed: {0}")]
    Wake(#[from] WakeError),
}

/// Outcome of a remote command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The command was handed to the protocol session.
    Sent,
    /// The endpoint was not ready; nothing was sent.
    Skipped,
}

/// Notifications published by endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    /// The endpoint became ready.
    Connected { name: String },
    /// The logged-in user changed.
    Identity {
        name: String,
        username: Option<String>,
    },
    /// One named state flag flipped.
    FlagChanged {
        name: String,
        flag: Flag,
        value: bool,
    },
}

/// Serializable view of an endpoint for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSnapshot {
    pub id: String,
    pub name: String,
    pub user: Option<String>,
    pub teacher: bool,
    pub connection: ConnectionState,
    pub description: Option<String>,
    pub ip: String,
    pub mac: Option<String>,
    #[serde(rename = "objectType")]
    pub kind: MachineKind,
    #[serde(rename = "ScreenLock")]
    pub screen_lock: Option<bool>,
    #[serde(rename = "InputLock")]
    pub input_lock: Option<bool>,
    #[serde(rename = "DemoServer")]
    pub demo_server: Option<bool>,
    #[serde(rename = "DemoClient")]
    pub demo_client: Option<bool>,
    #[serde(rename = "MessageBox")]
    pub message_box: Option<bool>,
}

// ── Endpoint ──────────────────────────────────────────────────────────────────

enum Link {
    Closed,
    Transport(Box<dyn Transport>),
    Session(Box<dyn ProtocolSession>),
}

enum LinkUp {
    SessionStarted,
    SessionReady,
    Ignored,
}

/// Supervisory connection to one machine.
pub struct ConnectionEndpoint {
    machine: MachineRecord,
    ip: String,
    mac: Option<String>,
    context: EndpointContext,

    link: Mutex<Link>,
    session: Mutex<Uuid>,
    link_tx: mpsc::UnboundedSender<TaggedLinkEvent>,
    link_rx: Mutex<Option<mpsc::UnboundedReceiver<TaggedLinkEvent>>>,
    driver: Mutex<Option<JoinHandle<()>>>,

    state: AttributeCell<ConnectionState>,
    username: AttributeCell<Option<String>>,
    homedir: AttributeCell<Option<String>>,
    flags: AttributeCell<Option<FlagBits>>,
    teacher: AttributeCell<bool>,
    last_response: Mutex<Instant>,
    allowed_viewers: Mutex<Vec<String>>,
}

impl ConnectionEndpoint {
    /// Creates an endpoint for `machine`.  Nothing is connected yet.
    ///
    /// # Errors
    ///
    /// [`EndpointError::MissingAddress`] if the machine has no IP address.
    pub fn new(machine: MachineRecord, context: EndpointContext) -> Result<Arc<Self>, EndpointError> {
        let ActiveAddress { ip, mac } =
            select_active_address(&machine, context.reachability.as_deref())
                .ok_or_else(|| EndpointError::MissingAddress(machine.name.clone()))?;
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        Ok(Arc::new(Self {
            machine,
            ip,
            mac,
            context,
            link: Mutex::new(Link::Closed),
            session: Mutex::new(Uuid::nil()),
            link_tx,
            link_rx: Mutex::new(Some(link_rx)),
            driver: Mutex::new(None),
            state: AttributeCell::new(ConnectionState::Disconnected),
            username: AttributeCell::uninitialized(),
            homedir: AttributeCell::uninitialized(),
            flags: AttributeCell::uninitialized(),
            teacher: AttributeCell::new(false),
            last_response: Mutex::new(Instant::now()),
            allowed_viewers: Mutex::new(Vec::new()),
        }))
    }

    // ── Identity ──────────────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.machine.name
    }

    /// The address the connection is made to.
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// The wake target, if the machine has a MAC address.
    pub fn mac(&self) -> Option<&str> {
        self.mac.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.machine.description.as_deref()
    }

    pub fn kind(&self) -> MachineKind {
        self.machine.kind
    }

    pub fn machine(&self) -> &MachineRecord {
        &self.machine
    }

    // ── Observed state ────────────────────────────────────────────────────────

    pub fn state(&self) -> &AttributeCell<ConnectionState> {
        &self.state
    }

    pub fn username(&self) -> &AttributeCell<Option<String>> {
        &self.username
    }

    pub fn homedir(&self) -> &AttributeCell<Option<String>> {
        &self.homedir
    }

    pub fn flags(&self) -> &AttributeCell<Option<FlagBits>> {
        &self.flags
    }

    pub fn teacher(&self) -> &AttributeCell<bool> {
        &self.teacher
    }

    pub fn is_ready(&self) -> Result<bool, ConcurrencyError> {
        Ok(self.state.current()? == ConnectionState::Ready)
    }

    /// Current value of `flag`, or `None` while no flags were reported.
    pub fn flag(&self, flag: Flag) -> Result<Option<bool>, ConcurrencyError> {
        Ok(self.flags.current()?.map(|bits| bits.contains(flag)))
    }

    /// Viewer addresses currently granted access to this machine's demo server.
    pub fn allowed_viewers(&self) -> Vec<String> {
        self.allowed_viewers.lock().clone()
    }

    /// Id of the most recent connect call.  Link events tagged with any other
    /// id are ignored.
    pub fn current_session(&self) -> Uuid {
        *self.session.lock()
    }

    /// Reports whether the state, flags, user or teacher cell changed since
    /// the last call.  Every cell is rolled forward.
    pub fn has_changed(&self) -> Result<bool, ConcurrencyError> {
        let state = self.state.has_changed()?;
        let flags = self.flags.has_changed()?;
        let user = self.username.has_changed()?;
        let teacher = self.teacher.has_changed()?;
        Ok(state || flags || user || teacher)
    }

    pub fn snapshot(&self) -> Result<EndpointSnapshot, ConcurrencyError> {
        let flags = self.flags.current()?;
        let flag = |f: Flag| flags.map(|bits| bits.contains(f));
        Ok(EndpointSnapshot {
            id: self.machine.name.clone(),
            name: self.machine.name.clone(),
            user: self.username.current()?,
            teacher: self.teacher.current()?,
            connection: self.state.current()?,
            description: self.machine.description.clone(),
            ip: self.ip.clone(),
            mac: self.mac().map(str::to_string),
            kind: self.machine.kind,
            screen_lock: flag(Flag::ScreenLock),
            input_lock: flag(Flag::InputLock),
            demo_server: flag(Flag::DemoServer),
            demo_client: flag(Flag::DemoClient),
            message_box: flag(Flag::MessageBox),
        })
    }

    /// Whether the logged-in user is a teacher.  `false` when nobody is
    /// logged in or the user is unknown.
    pub async fn is_teacher_user(&self) -> bool {
        self.current_user_entry()
            .await
            .map_or(false, |entry| entry.is_teacher)
    }

    /// Whether screenshots of this machine must be hidden from the operator.
    pub async fn hide_screenshot(&self) -> bool {
        self.current_user_entry()
            .await
            .map_or(false, |entry| entry.hide_screenshot)
    }

    async fn current_user_entry(&self) -> Option<Arc<UserEntry>> {
        let username = self.username.current().ok().flatten()?;
        self.lookup_user(&username).await
    }

    async fn lookup_user(&self, username: &str) -> Option<Arc<UserEntry>> {
        match self.context.users.get(username).await {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("{}: no user entry for {username:?}: {e}", self.ip);
                None
            }
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Connects and starts the driver task.
    pub fn open(self: &Arc<Self>) {
        self.connect();
        self.start();
    }

    /// Opens the transport unless one is already running.
    pub fn connect(&self) {
        let mut link = self.link.lock();
        if !matches!(*link, Link::Closed) {
            debug!("{}: connection already open", self.ip);
            return;
        }
        let session = Uuid::new_v4();
        *self.session.lock() = session;
        info!("{}: opening connection", self.ip);
        let request = ConnectRequest {
            host: self.ip.clone(),
            port: self.context.settings.vnc_port,
            framebuffer_update: self.context.settings.framebuffer_update,
        };
        let sink = LinkEventSink::new(session, self.link_tx.clone());
        *link = Link::Transport(self.context.connector.connect(&request, sink));
    }

    /// Spawns the task that processes link events and poll ticks.
    ///
    /// Must be called inside a tokio runtime.  The task holds a weak reference
    /// and ends when the endpoint is dropped or closed.  An endpoint's driver
    /// can be started once.
    pub fn start(self: &Arc<Self>) {
        let Some(events) = self.link_rx.lock().take() else {
            debug!("{}: driver already started", self.ip);
            return;
        };
        let handle = tokio::spawn(drive(
            Arc::downgrade(self),
            events,
            self.context.settings.poll_interval,
        ));
        *self.driver.lock() = Some(handle);
    }

    /// Stops the driver and closes the connection.
    pub fn close(&self) -> Result<(), ConcurrencyError> {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        self.disconnect()
    }

    /// Tears the link down.  A running session is closed, which also stops its
    /// transport; a bare transport is stopped directly.
    fn disconnect(&self) -> Result<(), ConcurrencyError> {
        let link = std::mem::replace(&mut *self.link.lock(), Link::Closed);
        match link {
            Link::Session(session) => {
                info!("{}: closing connection", self.ip);
                session.close();
            }
            Link::Transport(transport) => {
                info!("{}: closing connection", self.ip);
                transport.stop();
            }
            Link::Closed => {}
        }
        self.state.set(ConnectionState::Disconnected, false)?;
        self.clear_user_state()
    }

    fn clear_user_state(&self) -> Result<(), ConcurrencyError> {
        self.username.reset(None)?;
        self.homedir.reset(None)?;
        self.flags.reset(None)?;
        self.teacher.reset(false)
    }

    fn reset_response_timeout(&self, guard: Duration) {
        *self.last_response.lock() = Instant::now() + guard;
    }

    // ── Link event handling ───────────────────────────────────────────────────

    /// Processes one event reported by the transport.
    pub async fn handle_link_event(
        &self,
        session: Uuid,
        event: LinkEvent,
    ) -> Result<(), ConcurrencyError> {
        let current = self.current_session();
        if session != current {
            debug!("{}: dropping event of closed session {session}", self.ip);
            return Ok(());
        }
        match event {
            LinkEvent::StateChanged(state) => self.handle_link_state(state),
            LinkEvent::Identity { username, homedir } => {
                self.handle_identity(username, homedir).await
            }
            LinkEvent::Flags(bits) => self.handle_flags(bits).map(|_| ()),
        }
    }

    /// Applies a link state change.  Transport failures end up here and only
    /// ever change the connection state.
    pub fn handle_link_state(&self, link_state: LinkState) -> Result<(), ConcurrencyError> {
        let next = ConnectionState::from(link_state);
        let previous = self.state.current()?;

        if next == ConnectionState::Connected {
            return self.handle_link_up(previous);
        }

        self.state.set(next, false)?;
        if next.is_failure() && next != previous {
            warn!("{}: connection failed: {next:?}", self.ip);
        }
        if previous.is_link_up() {
            if previous == ConnectionState::Ready {
                info!("{}: lost connection: new state={next:?}", self.ip);
            } else {
                debug!("{}: link dropped during session setup", self.ip);
            }
            self.clear_user_state()?;
        }
        Ok(())
    }

    fn handle_link_up(&self, previous: ConnectionState) -> Result<(), ConcurrencyError> {
        let step = {
            let mut link = self.link.lock();
            match std::mem::replace(&mut *link, Link::Closed) {
                Link::Transport(transport) => {
                    *link = Link::Session(transport.into_session());
                    LinkUp::SessionStarted
                }
                Link::Session(session) => {
                    *link = Link::Session(session);
                    if previous == ConnectionState::Ready {
                        LinkUp::Ignored
                    } else {
                        LinkUp::SessionReady
                    }
                }
                Link::Closed => LinkUp::Ignored,
            }
        };

        match step {
            LinkUp::SessionStarted => {
                info!("{}: connection established", self.ip);
                self.state.set(ConnectionState::Connected, false)?;
                self.reset_response_timeout(self.context.settings.live_timeout);
                self.with_session(|session| session.request_identity());
            }
            LinkUp::SessionReady => {
                info!("{}: session on top of connection established", self.ip);
                self.state.set(ConnectionState::Ready, false)?;
                self.publish(EndpointEvent::Connected {
                    name: self.machine.name.clone(),
                });
            }
            LinkUp::Ignored => {}
        }
        Ok(())
    }

    /// Stores an identity reply.  Empty strings mean nobody is logged in.
    pub async fn handle_identity(
        &self,
        username: String,
        homedir: String,
    ) -> Result<(), ConcurrencyError> {
        *self.last_response.lock() = Instant::now();

        let username = Some(username).filter(|u| !u.is_empty());
        let homedir = Some(homedir).filter(|h| !h.is_empty());
        let previous = self.username.current()?;
        self.username.set(username.clone(), false)?;
        self.homedir.set(homedir, false)?;

        let teacher = match username.as_deref() {
            Some(name) => self
                .lookup_user(name)
                .await
                .map_or(false, |entry| entry.is_teacher),
            None => false,
        };
        self.teacher.set(teacher, false)?;

        if username.is_some() {
            self.with_session(|session| session.request_flags());
        }
        if previous != username {
            self.publish(EndpointEvent::Identity {
                name: self.machine.name.clone(),
                username,
            });
        }
        Ok(())
    }

    /// Stores a flag report and publishes one event per flipped flag.
    pub fn handle_flags(&self, bits: u32) -> Result<Vec<(Flag, bool)>, ConcurrencyError> {
        let bits = FlagBits(bits);
        let previous = self.flags.current()?;
        self.flags.set(Some(bits), false)?;
        let changes = bits.changes_since(previous);
        for &(flag, value) in &changes {
            debug!("{}: {flag} -> {value}", self.ip);
            self.publish(EndpointEvent::FlagChanged {
                name: self.machine.name.clone(),
                flag,
                value,
            });
        }
        Ok(changes)
    }

    /// One liveness tick.  Does nothing unless the endpoint is ready.
    pub fn update(&self) -> Result<(), EndpointError> {
        if !self.is_ready()? {
            return Ok(());
        }

        let timeout = self.context.settings.live_timeout;
        let last_response = *self.last_response.lock();
        let silent = Instant::now().saturating_duration_since(last_response);
        if silent > timeout {
            info!(
                "connection to {} is dead for {:.2}s - reconnecting (timeout={}s)",
                self.ip,
                silent.as_secs_f64(),
                timeout.as_secs()
            );
            self.disconnect()?;
            self.reset_response_timeout(timeout);
            self.connect();
            return Ok(());
        }
        if silent > self.context.settings.warn_after() {
            warn!(
                "connection to {} seems to be dead for {:.2}s",
                self.ip,
                silent.as_secs_f64()
            );
        }

        self.with_session(|session| session.request_identity());
        Ok(())
    }

    // ── Remote commands ───────────────────────────────────────────────────────

    pub fn lock_screen(&self) -> Result<Dispatch, EndpointError> {
        self.dispatch("lock screen", |s| s.lock_screen())
    }

    pub fn unlock_screen(&self) -> Result<Dispatch, EndpointError> {
        self.dispatch("unlock screen", |s| s.unlock_screen())
    }

    pub fn lock_input(&self) -> Result<Dispatch, EndpointError> {
        self.dispatch("lock input", |s| s.lock_input())
    }

    pub fn unlock_input(&self) -> Result<Dispatch, EndpointError> {
        self.dispatch("unlock input", |s| s.unlock_input())
    }

    pub fn send_message(&self, title: &str, text: &str) -> Result<Dispatch, EndpointError> {
        self.dispatch("message", |s| s.display_message(title, text))
    }

    /// Graceful shutdown through the agent.
    pub fn power_off(&self) -> Result<Dispatch, EndpointError> {
        self.dispatch("power off", |s| s.power_down())
    }

    pub fn restart(&self) -> Result<Dispatch, EndpointError> {
        self.dispatch("restart", |s| s.restart())
    }

    pub fn log_out(&self) -> Result<Dispatch, EndpointError> {
        self.dispatch("log out", |s| s.logout())
    }

    /// Wakes the machine with a magic packet.  Works in any connection state.
    ///
    /// # Errors
    ///
    /// [`EndpointError::Wake`] if the MAC address is malformed or no packet
    /// could be sent.
    pub fn power_on(&self) -> Result<Dispatch, EndpointError> {
        let Some(raw) = self.mac() else {
            warn!("{}: no MAC address set - skipping power on", self.ip);
            return Ok(Dispatch::Skipped);
        };
        let mac: MacAddress = raw.parse().map_err(WakeError::from)?;
        self.context.waker.wake(&mac)?;
        info!("{}: wake-on-lan sent to {mac}", self.ip);
        Ok(Dispatch::Sent)
    }

    /// (Re)starts the demo server and grants exactly `viewers` access.
    pub fn start_demo_server(&self, viewers: &[String]) -> Result<Dispatch, EndpointError> {
        let settings = self.context.settings;
        self.dispatch("start demo server", |s| {
            s.stop_demo_server();
            s.start_demo_server(settings.vnc_port, settings.demo_port);
            let mut allowed = self.allowed_viewers.lock();
            revoke_all(s, &mut allowed);
            grant(s, &mut allowed, viewers);
        })
    }

    pub fn stop_demo_server(&self) -> Result<Dispatch, EndpointError> {
        self.dispatch("stop demo server", |s| {
            revoke_all(s, &mut self.allowed_viewers.lock());
            s.stop_demo_server();
        })
    }

    /// Grants `viewers` access to the demo server.  Already granted addresses
    /// are not sent again.
    pub fn allow_viewers(&self, viewers: &[String]) -> Result<Dispatch, EndpointError> {
        self.dispatch("allow viewers", |s| {
            grant(s, &mut self.allowed_viewers.lock(), viewers);
        })
    }

    /// Revokes access for those of `viewers` that were granted.
    pub fn deny_viewers(&self, viewers: &[String]) -> Result<Dispatch, EndpointError> {
        self.dispatch("deny viewers", |s| {
            let mut allowed = self.allowed_viewers.lock();
            for ip in viewers {
                if let Some(pos) = allowed.iter().position(|a| a == ip) {
                    s.deny_host(ip);
                    allowed.remove(pos);
                }
            }
        })
    }

    pub fn deny_all_viewers(&self) -> Result<Dispatch, EndpointError> {
        self.dispatch("deny all viewers", |s| {
            revoke_all(s, &mut self.allowed_viewers.lock());
        })
    }

    /// Shows the demo of `server` on this machine.
    pub fn start_demo_client(
        &self,
        server: &ConnectionEndpoint,
        fullscreen: bool,
    ) -> Result<Dispatch, EndpointError> {
        let demo_port = self.context.settings.demo_port;
        let server_ip = server.ip();
        self.dispatch("start demo client", |s| {
            s.stop_demo();
            s.unlock_screen();
            s.unlock_input();
            s.start_demo(server_ip, demo_port, fullscreen);
        })
    }

    pub fn stop_demo_client(&self) -> Result<Dispatch, EndpointError> {
        self.dispatch("stop demo client", |s| s.stop_demo())
    }

    /// The latest framebuffer, or `None` if the endpoint is not ready or no
    /// frame has arrived yet.
    pub fn capture_screenshot(&self) -> Result<Option<Vec<u8>>, EndpointError> {
        if !self.is_ready()? {
            warn!("{}: not ready - skipping screenshot", self.ip);
            return Ok(None);
        }
        let image = match &*self.link.lock() {
            Link::Session(session) => session.current_image(),
            _ => None,
        };
        if image.is_none() {
            info!("{}: no screenshot available yet", self.ip);
        }
        Ok(image)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn dispatch<F>(&self, op: &str, command: F) -> Result<Dispatch, EndpointError>
    where
        F: FnOnce(&dyn ProtocolSession),
    {
        if !self.is_ready()? {
            warn!("{}: not ready - skipping {op}", self.ip);
            return Ok(Dispatch::Skipped);
        }
        if self.with_session(command) {
            Ok(Dispatch::Sent)
        } else {
            warn!("{}: no session - skipping {op}", self.ip);
            Ok(Dispatch::Skipped)
        }
    }

    /// Runs `command` on the protocol session if one exists.
    fn with_session<F>(&self, command: F) -> bool
    where
        F: FnOnce(&dyn ProtocolSession),
    {
        match &*self.link.lock() {
            Link::Session(session) => {
                command(session.as_ref());
                true
            }
            _ => false,
        }
    }

    fn publish(&self, event: EndpointEvent) {
        if self.context.events.send(event).is_err() {
            debug!("{}: no event subscriber", self.ip);
        }
    }
}

fn grant(session: &dyn ProtocolSession, allowed: &mut Vec<String>, viewers: &[String]) {
    for ip in viewers {
        if !allowed.contains(ip) {
            session.allow_host(ip);
            allowed.push(ip.clone());
        }
    }
}

fn revoke_all(session: &dyn ProtocolSession, allowed: &mut Vec<String>) {
    for ip in allowed.drain(..) {
        session.deny_host(&ip);
    }
}

impl Drop for ConnectionEndpoint {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.abort();
        }
        match std::mem::replace(self.link.get_mut(), Link::Closed) {
            Link::Session(session) => session.close(),
            Link::Transport(transport) => transport.stop(),
            Link::Closed => {}
        }
    }
}

impl std::fmt::Debug for ConnectionEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEndpoint")
            .field("name", &self.machine.name)
            .field("ip", &self.ip)
            .finish_non_exhaustive()
    }
}

// ── Driver task ───────────────────────────────────────────────────────────────

async fn drive(
    endpoint: Weak<ConnectionEndpoint>,
    mut events: mpsc::UnboundedReceiver<TaggedLinkEvent>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let result = tokio::select! {
            received = events.recv() => {
                let Some((session, event)) = received else { break };
                let Some(endpoint) = endpoint.upgrade() else { break };
                endpoint
                    .handle_link_event(session, event)
                    .await
                    .map_err(EndpointError::from)
            }
            _ = ticker.tick() => {
                let Some(endpoint) = endpoint.upgrade() else { break };
                endpoint.update()
            }
        };
        if let Err(e) = result {
            error!("endpoint supervision stopped: {e}");
            break;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
