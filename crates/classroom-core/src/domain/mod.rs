//! Domain entities for classroom supervision.
//!
//! Everything here is free of I/O: the types can be created and tested without
//! a network, a directory server or a running async runtime.
//!
//! - **`attribute`** – [`attribute::AttributeCell`], the lock-protected
//!   current/previous value pair every piece of live machine state is kept in.
//! - **`connection`** – the abstracted connection state of a machine.
//! - **`flags`** – decoding of the state bitmask a machine reports.
//! - **`directory`** – typed rooms, machines and user accounts.

pub mod attribute;
pub mod connection;
pub mod directory;
pub mod flags;
