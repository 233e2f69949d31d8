//! Out-of-band wire formats owned by the master.
//!
//! The supervisory protocol itself is an opaque capability provided by the
//! transport; the only bytes this workspace produces are Wake-on-LAN packets.

pub mod wake;

pub use wake::{magic_packet, MacAddress, MacAddressError, BROADCAST_IP, MAGIC_PACKET_LEN, WAKE_PORT};
