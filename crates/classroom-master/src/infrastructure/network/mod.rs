//! Network infrastructure owned by the master.
//!
//! The supervisory connection itself goes through the transport capability
//! (see [`crate::infrastructure::transport`]).  The only packets the master
//! sends on its own are Wake-on-LAN broadcasts, which must work while the
//! target machine is switched off and therefore cannot use that connection,
//! and the reachability checks used to pick the address of a machine with
//! several network cards.
//!
//! # Sub-modules
//!
//! - **`wake_on_lan`** – [`UdpWakeSender`], the socket-based [`WakeOnLan`]
//!   implementation.
//! - **`reachability`** – [`SystemReachability`], ping and ARP cache lookups
//!   behind [`Reachability`].

use classroom_core::{MacAddress, MacAddressError};
use thiserror::Error;

pub mod reachability;
pub mod wake_on_lan;

pub use reachability::SystemReachability;
pub use wake_on_lan::UdpWakeSender;

/// Error type for Wake-on-LAN delivery.
#[derive(Debug, Error)]
pub enum WakeError {
    /// The stored MAC address could not be parsed.
    #[error("invalid MAC address: {0}")]
    InvalidMac(#[from] MacAddressError),

    /// Enumerating interfaces or sending a packet failed.
    #[error("wake-on-lan I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No usable local IPv4 interface was left after filtering.
    #[error("no local IPv4 interface available for wake-on-lan")]
    NoInterface,
}

/// Out-of-band power-on of a machine.
#[cfg_attr(test, mockall::automock)]
pub trait WakeOnLan: Send + Sync {
    /// Broadcasts a magic packet for `mac`.
    fn wake(&self, mac: &MacAddress) -> Result<(), WakeError>;
}

/// Reachability checks against a machine's configured addresses.
#[cfg_attr(test, mockall::automock)]
pub trait Reachability: Send + Sync {
    /// Returns `true` if `ip` answers within about a second.
    fn is_reachable(&self, ip: &str) -> bool;

    /// The MAC address the local ARP cache holds for `ip`, lower-cased.
    fn mac_of(&self, ip: &str) -> Option<String>;
}
