//! Application layer use cases for the master.
//!
//! Use cases in this layer orchestrate the domain types of `classroom-core`
//! and talk to the outside world only through the traits of
//! [`crate::infrastructure`].
//!
//! # Sub-modules
//!
//! - **`supervise_endpoint`** – One supervised machine: connection handshake,
//!   liveness polling, reported state and the remote commands.
//!
//! - **`manage_room`** – The active room: opens an endpoint per member machine
//!   and coordinates the demo broadcast between them.
//!
//! - **`user_directory`** – Cached lookup of logged-in users (teacher role and
//!   screenshot policy).

pub mod manage_room;
pub mod supervise_endpoint;
pub mod user_directory;
