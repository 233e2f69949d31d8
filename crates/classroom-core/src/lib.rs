//! # classroom-core
//!
//! Shared library for classroom supervision containing the domain entities
//! and the Wake-on-LAN codec.
//!
//! The master (`classroom-master`) keeps a supervisory connection open to every
//! machine of a room.  This crate defines the vocabulary it works with:
//!
//! - **`domain`** – attribute cells, connection states, state flags and the
//!   directory records describing rooms, machines and users.
//! - **`protocol`** – MAC address parsing and the magic packet used to power
//!   machines on.
//!
//! It has no dependencies on sockets, directory backends or async runtimes.

pub mod domain;
pub mod protocol;

pub use domain::attribute::{AttributeCell, ConcurrencyError, LOCK_TIMEOUT};
pub use domain::connection::ConnectionState;
pub use domain::directory::{MachineKind, MachineRecord, RoomRecord, UserAccount};
pub use domain::flags::{Flag, FlagBits};
pub use protocol::wake::{magic_packet, MacAddress, MacAddressError};
