//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the TOML configuration and
//! supplies defaults for anything the file leaves out.

pub mod config;
