//! UDP Wake-on-LAN sender.
//!
//! A magic packet is broadcast from every local IPv4 address whose interface
//! is not excluded by the configuration, to port 9 of every configured target
//! broadcast address.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};

use classroom_core::protocol::wake::{BROADCAST_IP, WAKE_PORT};
use classroom_core::{magic_packet, MacAddress};
use tracing::{debug, warn};

use super::{WakeError, WakeOnLan};
use crate::infrastructure::storage::config::WakeOnLanConfig;

/// Sends magic packets over real sockets.
#[derive(Debug, Clone)]
pub struct UdpWakeSender {
    blacklisted_interfaces: Vec<String>,
    blacklisted_prefixes: Vec<String>,
    targets: Vec<Ipv4Addr>,
}

impl UdpWakeSender {
    /// Builds a sender from the `[wake_on_lan]` configuration section.
    ///
    /// Target entries that are not IPv4 addresses are logged and ignored.
    pub fn new(config: &WakeOnLanConfig) -> Self {
        let mut targets: Vec<Ipv4Addr> = config
            .target_broadcast_ips
            .iter()
            .filter_map(|raw| match raw.trim().parse::<Ipv4Addr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    warn!("ignoring invalid wake-on-lan target {raw:?}");
                    None
                }
            })
            .collect();
        if targets.is_empty() {
            targets.push(BROADCAST_IP);
        }
        Self {
            blacklisted_interfaces: config.blacklisted_interfaces.clone(),
            blacklisted_prefixes: config.blacklisted_interface_prefixes.clone(),
            targets,
        }
    }

    /// Broadcast addresses packets are sent to.
    pub fn targets(&self) -> &[Ipv4Addr] {
        &self.targets
    }

    fn is_excluded(&self, interface: &str) -> bool {
        self.blacklisted_interfaces.iter().any(|name| name == interface)
            || self
                .blacklisted_prefixes
                .iter()
                .any(|prefix| interface.starts_with(prefix.as_str()))
    }

    /// Picks the IPv4 source addresses among `(interface name, address)`
    /// pairs.  Duplicates are removed, order is preserved.
    pub fn select_sources<I>(&self, interfaces: I) -> Vec<Ipv4Addr>
    where
        I: IntoIterator<Item = (String, IpAddr)>,
    {
        let mut sources = Vec::new();
        for (name, addr) in interfaces {
            if self.is_excluded(&name) {
                debug!("wake-on-lan: skipping interface {name}");
                continue;
            }
            if let IpAddr::V4(ip) = addr {
                if !sources.contains(&ip) {
                    sources.push(ip);
                }
            }
        }
        sources
    }

    fn local_sources(&self) -> Result<Vec<Ipv4Addr>, WakeError> {
        let interfaces = get_if_addrs::get_if_addrs()?;
        Ok(self.select_sources(interfaces.into_iter().map(|iface| {
            let ip = iface.ip();
            (iface.name, ip)
        })))
    }

    fn send_from(&self, source: Ipv4Addr, packet: &[u8]) -> Result<(), WakeError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(source, 0))?;
        socket.set_broadcast(true)?;
        for target in &self.targets {
            socket.send_to(packet, SocketAddrV4::new(*target, WAKE_PORT))?;
        }
        Ok(())
    }
}

impl Default for UdpWakeSender {
    fn default() -> Self {
        Self::new(&WakeOnLanConfig::default())
    }
}

impl WakeOnLan for UdpWakeSender {
    fn wake(&self, mac: &MacAddress) -> Result<(), WakeError> {
        let sources = self.local_sources()?;
        if sources.is_empty() {
            return Err(WakeError::NoInterface);
        }

        let packet = magic_packet(mac);
        let mut sent = 0usize;
        let mut last_error = None;
        for source in sources {
            match self.send_from(source, &packet) {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!("wake-on-lan for {mac} from {source} failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        match (sent, last_error) {
            (0, Some(e)) => Err(e),
            _ => {
                debug!("wake-on-lan for {mac} sent from {sent} interface(s)");
                Ok(())
            }
        }
    }
}
