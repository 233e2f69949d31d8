//! Transport and protocol capabilities of the remote-control stack.
//!
//! The byte-level protocol spoken with the agents is an external capability.
//! The master sees it through two layers:
//!
//! ```text
//! TransportConnector::connect()  ──►  Box<dyn Transport>        (link only)
//!                                        │ into_session()
//!                                        ▼
//!                                     Box<dyn ProtocolSession>  (commands)
//! ```
//!
//! A [`ProtocolSession`] takes ownership of the transport it is layered on, and
//! closing the session stops that transport.  Once a session exists there is
//! no transport handle left to stop a second time.
//!
//! Everything the remote side reports (link state changes, identity replies,
//! state flags) is delivered through the [`LinkEventSink`] handed to
//! [`TransportConnector::connect`].  Each connect gets a fresh session id so
//! events of an already closed transport can be told apart and dropped.

use classroom_core::ConnectionState;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

pub mod mock;

/// Ways a transport can fail.  Never returned to callers: a failure becomes
/// the endpoint's [`ConnectionState`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed")]
    ConnectionFailed,
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("host unreachable")]
    HostUnreachable,
}

/// Link state reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
    Failed(TransportError),
}

impl From<LinkState> for ConnectionState {
    fn from(state: LinkState) -> Self {
        match state {
            LinkState::Disconnected => ConnectionState::Disconnected,
            LinkState::Connected => ConnectionState::Connected,
            LinkState::Failed(TransportError::ConnectionFailed) => ConnectionState::ConnectionError,
            LinkState::Failed(TransportError::AuthenticationFailed) => ConnectionState::AuthError,
            LinkState::Failed(TransportError::HostUnreachable) => ConnectionState::Unreachable,
        }
    }
}

/// Something the remote side reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    StateChanged(LinkState),
    /// Reply to an identity request.  Empty strings mean nobody is logged in.
    Identity { username: String, homedir: String },
    /// Raw state bitmask.
    Flags(u32),
}

/// A [`LinkEvent`] tagged with the session it belongs to.
pub type TaggedLinkEvent = (Uuid, LinkEvent);

/// Sending half handed to a transport for reporting events.
#[derive(Debug, Clone)]
pub struct LinkEventSink {
    session: Uuid,
    tx: mpsc::UnboundedSender<TaggedLinkEvent>,
}

impl LinkEventSink {
    pub fn new(session: Uuid, tx: mpsc::UnboundedSender<TaggedLinkEvent>) -> Self {
        Self { session, tx }
    }

    /// Id of the connect call this sink was created for.
    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Delivers `event`.  Events sent after the endpoint went away are dropped.
    pub fn emit(&self, event: LinkEvent) {
        if self.tx.send((self.session, event)).is_err() {
            debug!("link event for closed session {} dropped", self.session);
        }
    }
}

/// Parameters of a single connect call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
    /// How often the transport refreshes its framebuffer copy.
    pub framebuffer_update: std::time::Duration,
}

/// Opens transports.  A transport is self-reconnecting: `connect` never fails
/// synchronously, failures are reported as [`LinkState::Failed`] events.
pub trait TransportConnector: Send + Sync {
    fn connect(&self, request: &ConnectRequest, events: LinkEventSink) -> Box<dyn Transport>;
}

/// A running transport without a protocol session.
pub trait Transport: Send {
    /// Layers the supervisory protocol on this transport.  The session owns
    /// the transport from now on.
    fn into_session(self: Box<Self>) -> Box<dyn ProtocolSession>;

    /// Stops the transport.
    fn stop(self: Box<Self>);
}

/// Supervisory protocol commands.  All calls dispatch and return immediately;
/// answers arrive later as [`LinkEvent`]s.
pub trait ProtocolSession: Send {
    fn request_identity(&self);
    fn request_flags(&self);

    fn lock_screen(&self);
    fn unlock_screen(&self);
    fn lock_input(&self);
    fn unlock_input(&self);
    fn display_message(&self, title: &str, text: &str);

    fn power_down(&self);
    fn restart(&self);
    fn logout(&self);

    fn start_demo_server(&self, vnc_port: u16, demo_port: u16);
    fn stop_demo_server(&self);
    fn allow_host(&self, ip: &str);
    fn deny_host(&self, ip: &str);
    fn start_demo(&self, host: &str, port: u16, fullscreen: bool);
    fn stop_demo(&self);

    /// The most recent framebuffer as encoded image bytes, if one arrived.
    fn current_image(&self) -> Option<Vec<u8>>;

    /// Tears the session down, stopping the underlying transport.
    fn close(self: Box<Self>);
}
