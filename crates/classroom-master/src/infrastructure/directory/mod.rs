//! Directory lookup: rooms, machines and user accounts.
//!
//! The directory service (an LDAP tree in production) is an external
//! collaborator.  The supervision layer only needs three typed queries, defined
//! by the [`DirectoryLookup`] trait.  Tests and demos use
//! [`memory::InMemoryDirectory`].

use async_trait::async_trait;
use classroom_core::{MachineRecord, RoomRecord, UserAccount};
use thiserror::Error;

pub mod memory;

/// Error type for directory queries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// No object matched the query.
    #[error("no directory object matches {0:?}")]
    NotFound(String),

    /// More than one object matched where exactly one was expected.
    #[error("{count} directory objects match {query:?}, expected exactly one")]
    Ambiguous { query: String, count: usize },

    /// The lookup key was empty or did not contain a name.
    #[error("invalid lookup key {0:?}: name missing")]
    MissingKey(String),

    /// The directory backend failed to answer.
    #[error("directory backend error: {0}")]
    Backend(String),
}

/// Read-only queries against the directory service.
#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    /// Resolves a room by its id or by its name within `school`.
    ///
    /// # Errors
    ///
    /// [`DirectoryError::NotFound`] when nothing matches,
    /// [`DirectoryError::Ambiguous`] when a name matches several rooms.
    async fn resolve_room(
        &self,
        name_or_id: &str,
        school: Option<&str>,
    ) -> Result<RoomRecord, DirectoryError>;

    /// Resolves a machine by its directory id.
    async fn resolve_machine(&self, id: &str) -> Result<MachineRecord, DirectoryError>;

    /// Resolves exactly one user account by login name.
    async fn resolve_user_by_name(&self, username: &str) -> Result<UserAccount, DirectoryError>;
}
