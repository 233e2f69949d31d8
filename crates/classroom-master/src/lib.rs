//! classroom-master library entry point.
//!
//! Exposes the application and infrastructure layers so that integration
//! tests in `tests/` and the embedding UI/RPC layer share the same module
//! tree.

pub mod application;
pub mod infrastructure;
