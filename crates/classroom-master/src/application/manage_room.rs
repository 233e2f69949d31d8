//! ManageRoom: the currently supervised room and its demo broadcast.
//!
//! A [`RoomController`] owns one [`ConnectionEndpoint`] per machine of the
//! selected room.  Selecting a room always closes the previous one first.
//!
//! # Demo broadcast
//!
//! One machine (usually the teacher's) becomes the demo server; every other
//! ready machine becomes a demo client showing the server's screen.  Clients
//! where a teacher or nobody is logged in always get a window instead of a
//! fullscreen view.
//!
//! Stopping a demo trusts the flags the machines report rather than the
//! controller's own bookkeeping: a demo may have been started by a previous
//! master process, or a machine may have reconnected since.

use std::collections::BTreeMap;
use std::sync::Arc;

use classroom_core::{ConcurrencyError, Flag, RoomRecord};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::supervise_endpoint::{
    ConnectionEndpoint, EndpointContext, EndpointError, EndpointEvent, EndpointSettings,
};
use crate::application::user_directory::{ScreenshotPolicy, UserDirectory};
use crate::infrastructure::directory::{DirectoryError, DirectoryLookup};
use crate::infrastructure::network::{Reachability, SystemReachability, WakeOnLan};
use crate::infrastructure::storage::config::SupervisorConfig;
use crate::infrastructure::transport::TransportConnector;

/// Error type for room operations.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("unknown computer room {0:?}")]
    RoomNotFound(String),

    #[error("did not find exactly one room for {query:?} (count: {count})")]
    AmbiguousRoom { query: String, count: usize },

    #[error("there are no computers in room {0:?}")]
    EmptyRoom(String),

    #[error("unknown computer {0:?}")]
    UnknownEndpoint(String),

    #[error("directory lookup failed: {0}")]
    Directory(DirectoryError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

struct ActiveRoom {
    record: RoomRecord,
    endpoints: BTreeMap<String, Arc<ConnectionEndpoint>>,
}

/// Supervises the machines of one room at a time.
pub struct RoomController {
    directory: Arc<dyn DirectoryLookup>,
    context: EndpointContext,
    school: Option<String>,
    room: Option<ActiveRoom>,
    demo_server: Option<String>,
}

impl RoomController {
    /// Creates a controller without an active room.
    ///
    /// Returns the controller and the receiver for the events of all its
    /// endpoints.
    pub fn new(
        directory: Arc<dyn DirectoryLookup>,
        connector: Arc<dyn TransportConnector>,
        waker: Arc<dyn WakeOnLan>,
        config: &SupervisorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<EndpointEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let users = Arc::new(UserDirectory::new(
            Arc::clone(&directory),
            ScreenshotPolicy::from_config(&config.screenshots),
        ));
        let reachability = config
            .addresses
            .check_client_addresses
            .then(|| Arc::new(SystemReachability::new()) as Arc<dyn Reachability>);
        let context = EndpointContext {
            connector,
            users,
            waker,
            reachability,
            settings: EndpointSettings::from_config(config),
            events,
        };
        let controller = Self {
            directory,
            context,
            school: None,
            room: None,
            demo_server: None,
        };
        (controller, rx)
    }

    /// The user cache shared by all endpoints.
    pub fn users(&self) -> &Arc<UserDirectory> {
        &self.context.users
    }

    pub fn school(&self) -> Option<&str> {
        self.school.as_deref()
    }

    /// Selects the school room names are resolved in.  Clears the active room.
    pub fn set_school(&mut self, school: Option<String>) -> Result<(), RoomError> {
        self.clear()?;
        self.school = school;
        Ok(())
    }

    /// Short name of the active room.
    pub fn room_name(&self) -> Option<&str> {
        self.room.as_ref().map(|room| room.record.name.as_str())
    }

    /// Directory id of the active room.
    pub fn room_id(&self) -> Option<&str> {
        self.room.as_ref().map(|room| room.record.id.as_str())
    }

    pub fn endpoint(&self, name: &str) -> Option<&Arc<ConnectionEndpoint>> {
        self.room.as_ref()?.endpoints.get(name)
    }

    /// All endpoints of the active room, sorted by name.
    pub fn endpoints(&self) -> Vec<Arc<ConnectionEndpoint>> {
        self.room
            .as_ref()
            .map(|room| room.endpoints.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.room.as_ref().map_or(0, |room| room.endpoints.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Room lifecycle ────────────────────────────────────────────────────────

    /// Makes `name_or_id` the active room and opens a connection to each of
    /// its machines.  Returns the number of machines supervised.
    ///
    /// Machines that cannot be resolved or lack an IP address are logged and
    /// left out.
    ///
    /// # Errors
    ///
    /// [`RoomError::RoomNotFound`], [`RoomError::AmbiguousRoom`] or
    /// [`RoomError::EmptyRoom`] when the room itself is unusable.  The
    /// previous room is closed in every case.
    pub async fn set(&mut self, name_or_id: &str) -> Result<usize, RoomError> {
        self.clear()?;

        let record = self
            .directory
            .resolve_room(name_or_id, self.school.as_deref())
            .await
            .map_err(|e| match e {
                DirectoryError::NotFound(_) => RoomError::RoomNotFound(name_or_id.to_string()),
                DirectoryError::Ambiguous { count, .. } => RoomError::AmbiguousRoom {
                    query: name_or_id.to_string(),
                    count,
                },
                other => RoomError::Directory(other),
            })?;
        if record.member_machine_ids.is_empty() {
            return Err(RoomError::EmptyRoom(record.name));
        }
        info!(
            "room {:?} will be initialized with {} computers",
            record.name,
            record.member_machine_ids.len()
        );

        let mut endpoints = BTreeMap::new();
        for id in &record.member_machine_ids {
            let machine = match self.directory.resolve_machine(id).await {
                Ok(machine) => machine,
                Err(e) => {
                    warn!("computer {id:?} could not be added: {e}");
                    continue;
                }
            };
            let context = self.context.clone();
            let created = if context.reachability.is_some() {
                // address checks ping, which blocks
                match tokio::task::spawn_blocking(move || ConnectionEndpoint::new(machine, context))
                    .await
                {
                    Ok(created) => created,
                    Err(e) => {
                        warn!("computer {id:?} could not be added: {e}");
                        continue;
                    }
                }
            } else {
                ConnectionEndpoint::new(machine, context)
            };
            let endpoint = match created {
                Ok(endpoint) => endpoint,
                Err(e) => {
                    warn!("computer {id:?} could not be added: {e}");
                    continue;
                }
            };
            if endpoints.contains_key(endpoint.name()) {
                warn!("computer {id:?} could not be added: duplicate name {}", endpoint.name());
                continue;
            }
            endpoint.open();
            endpoints.insert(endpoint.name().to_string(), endpoint);
        }

        let count = endpoints.len();
        self.room = Some(ActiveRoom { record, endpoints });
        Ok(count)
    }

    /// Closes every endpoint and forgets the active room.
    pub fn clear(&mut self) -> Result<(), RoomError> {
        self.demo_server = None;
        let Some(room) = self.room.take() else {
            return Ok(());
        };
        info!("closing room {:?}", room.record.name);
        for endpoint in room.endpoints.values() {
            endpoint.close()?;
        }
        Ok(())
    }

    // ── Demo ──────────────────────────────────────────────────────────────────

    /// Returns `true` if any machine reports a demo server or client running.
    pub fn is_demo_active(&self) -> Result<bool, RoomError> {
        for endpoint in self.endpoints() {
            if endpoint.flag(Flag::DemoServer)? == Some(true)
                || endpoint.flag(Flag::DemoClient)? == Some(true)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The machine reporting a running demo server.
    pub fn demo_server(&self) -> Result<Option<Arc<ConnectionEndpoint>>, RoomError> {
        Ok(self.flagged(Flag::DemoServer)?.into_iter().next())
    }

    /// The machines reporting a running demo client.
    pub fn demo_clients(&self) -> Result<Vec<Arc<ConnectionEndpoint>>, RoomError> {
        self.flagged(Flag::DemoClient)
    }

    fn flagged(&self, flag: Flag) -> Result<Vec<Arc<ConnectionEndpoint>>, RoomError> {
        let mut found = Vec::new();
        for endpoint in self.endpoints() {
            if endpoint.flag(flag)? == Some(true) {
                found.push(endpoint);
            }
        }
        Ok(found)
    }

    /// Broadcasts the screen of `server_name` to every other ready machine.
    ///
    /// # Errors
    ///
    /// [`RoomError::UnknownEndpoint`] if the room has no machine of that name.
    pub async fn start_demo(&mut self, server_name: &str, fullscreen: bool) -> Result<(), RoomError> {
        if self.demo_server.is_some() || self.is_demo_active()? {
            self.stop_demo()?;
        }

        let server = self
            .endpoint(server_name)
            .cloned()
            .ok_or_else(|| RoomError::UnknownEndpoint(server_name.to_string()))?;

        let mut clients = Vec::new();
        for endpoint in self.endpoints() {
            if endpoint.name() == server_name || !endpoint.kind().is_broadcastable() {
                continue;
            }
            if endpoint.is_ready()? {
                clients.push(endpoint);
            }
        }

        let mut windowed = Vec::new();
        for client in &clients {
            let anonymous = client
                .username()
                .current()?
                .map_or(true, |name| name.trim().is_empty());
            windowed.push(anonymous || client.is_teacher_user().await);
        }

        info!("demo server is {server_name}");
        info!(
            "demo clients: {}",
            clients.iter().map(|c| c.name()).collect::<Vec<_>>().join(", ")
        );
        debug!(
            "demo clients (windowed): {}",
            clients
                .iter()
                .zip(&windowed)
                .filter(|(_, windowed)| **windowed)
                .map(|(c, _)| c.name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let viewers: Vec<String> = clients.iter().map(|c| c.ip().to_string()).collect();
        server.start_demo_server(&viewers)?;
        self.demo_server = Some(server_name.to_string());

        for (client, windowed) in clients.iter().zip(windowed) {
            client.start_demo_client(&server, fullscreen && !windowed)?;
        }
        Ok(())
    }

    /// Stops the demo server and every machine reporting a demo client.
    pub fn stop_demo(&mut self) -> Result<(), RoomError> {
        let mut servers = self.flagged(Flag::DemoServer)?;
        if let Some(recorded) = self.demo_server.take().and_then(|name| self.endpoint(&name).cloned()) {
            if !servers.iter().any(|s| Arc::ptr_eq(s, &recorded)) {
                servers.push(recorded);
            }
        }
        for server in servers {
            info!("stopping demo server {}", server.name());
            server.stop_demo_server()?;
        }
        for client in self.demo_clients()? {
            client.stop_demo_client()?;
        }
        Ok(())
    }

    // ── Aggregate queries ─────────────────────────────────────────────────────

    /// Login names of the users on all ready machines.
    pub async fn logged_in_usernames(&self) -> Result<Vec<String>, RoomError> {
        let mut names = Vec::new();
        for endpoint in self.endpoints() {
            if !endpoint.is_ready()? {
                continue;
            }
            let Some(user) = endpoint.username().current()? else {
                continue;
            };
            match self.context.users.get(&user).await {
                Ok(entry) => names.push(entry.username.clone()),
                Err(e) => debug!("{}: ignoring user {user:?}: {e}", endpoint.ip()),
            }
        }
        Ok(names)
    }

    /// Addresses of all machines, optionally without those a teacher is
    /// logged in to.
    pub async fn ip_addresses(&self, students_only: bool) -> Vec<String> {
        let mut ips = Vec::new();
        for endpoint in self.endpoints() {
            if students_only && endpoint.is_teacher_user().await {
                continue;
            }
            ips.push(endpoint.ip().to_string());
        }
        ips
    }
}
