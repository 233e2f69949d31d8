//! Infrastructure layer of the master.
//!
//! Contains the adapters to everything outside the process: the directory
//! service, the remote-control transport, Wake-on-LAN sockets and the
//! configuration file.
//!
//! **Dependency rule**: the application layer only talks to the traits defined
//! here ([`directory::DirectoryLookup`], [`transport::TransportConnector`],
//! [`network::WakeOnLan`]), never to a concrete backend.

pub mod directory;
pub mod network;
pub mod storage;
pub mod transport;
