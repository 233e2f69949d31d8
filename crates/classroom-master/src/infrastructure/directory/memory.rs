//! In-memory directory for tests and offline demos.
//!
//! Rooms are matched by id first, then by name (optionally restricted to a
//! school), mirroring how the directory backend resolves a room given either a
//! distinguished name or a short name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use classroom_core::{MachineRecord, RoomRecord, UserAccount};
use parking_lot::RwLock;

use super::{DirectoryError, DirectoryLookup};

#[derive(Debug, Clone)]
struct RoomEntry {
    school: Option<String>,
    record: RoomRecord,
}

/// A [`DirectoryLookup`] backed by plain collections.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    rooms: RwLock<Vec<RoomEntry>>,
    machines: RwLock<HashMap<String, MachineRecord>>,
    users: RwLock<Vec<UserAccount>>,
    user_lookups: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a room belonging to `school`.
    pub fn add_room(&self, school: Option<&str>, record: RoomRecord) {
        self.rooms.write().push(RoomEntry {
            school: school.map(str::to_string),
            record,
        });
    }

    /// Adds or replaces a machine, keyed by its id.
    pub fn add_machine(&self, record: MachineRecord) {
        self.machines.write().insert(record.id.clone(), record);
    }

    /// Adds a user account.  Adding two accounts with the same username makes
    /// lookups of that name ambiguous.
    pub fn add_user(&self, account: UserAccount) {
        self.users.write().push(account);
    }

    /// Number of `resolve_user_by_name` calls served so far.
    pub fn user_lookups(&self) -> usize {
        self.user_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DirectoryLookup for InMemoryDirectory {
    async fn resolve_room(
        &self,
        name_or_id: &str,
        school: Option<&str>,
    ) -> Result<RoomRecord, DirectoryError> {
        let rooms = self.rooms.read();
        if let Some(entry) = rooms.iter().find(|e| e.record.id == name_or_id) {
            return Ok(entry.record.clone());
        }
        let matches: Vec<&RoomEntry> = rooms
            .iter()
            .filter(|e| e.record.name == name_or_id)
            .filter(|e| school.is_none() || e.school.as_deref() == school)
            .collect();
        match matches.as_slice() {
            [] => Err(DirectoryError::NotFound(name_or_id.to_string())),
            [only] => Ok(only.record.clone()),
            many => Err(DirectoryError::Ambiguous {
                query: name_or_id.to_string(),
                count: many.len(),
            }),
        }
    }

    async fn resolve_machine(&self, id: &str) -> Result<MachineRecord, DirectoryError> {
        self.machines
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(id.to_string()))
    }

    async fn resolve_user_by_name(&self, username: &str) -> Result<UserAccount, DirectoryError> {
        self.user_lookups.fetch_add(1, Ordering::Relaxed);
        let users = self.users.read();
        let matches: Vec<&UserAccount> = users.iter().filter(|u| u.username == username).collect();
        match matches.as_slice() {
            [] => Err(DirectoryError::NotFound(username.to_string())),
            [only] => Ok((*only).clone()),
            many => Err(DirectoryError::Ambiguous {
                query: username.to_string(),
                count: many.len(),
            }),
        }
    }
}
