//! Ping and ARP cache based [`Reachability`].

use std::process::{Command, Stdio};

use tracing::{debug, warn};

use super::Reachability;

/// Path of the kernel's ARP table on Linux.
const ARP_TABLE: &str = "/proc/net/arp";

/// Checks addresses with the system `ping` and the kernel ARP table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemReachability;

impl SystemReachability {
    pub fn new() -> Self {
        Self
    }
}

fn ping_command(ip: &str) -> Command {
    let mut command = Command::new("ping");
    #[cfg(target_os = "windows")]
    command.args(["-n", "1", "-w", "1000", ip]);
    #[cfg(target_os = "macos")]
    command.args(["-c", "1", "-t", "1", ip]);
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    command.args(["-c", "1", "-W", "1", ip]);
    command.stdout(Stdio::null()).stderr(Stdio::null());
    command
}

/// Finds the hardware address of `ip` in the text of `/proc/net/arp`.
///
/// Incomplete entries (all-zero address) count as missing.
pub fn arp_entry(table: &str, ip: &str) -> Option<String> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [addr, _hw_type, _flags, mac, ..] if *addr == ip && *mac != "00:00:00:00:00:00" => {
                Some(mac.to_lowercase())
            }
            _ => None,
        }
    })
}

impl Reachability for SystemReachability {
    fn is_reachable(&self, ip: &str) -> bool {
        match ping_command(ip).status() {
            Ok(status) => status.success(),
            Err(e) => {
                warn!("could not run ping for {ip}: {e}");
                false
            }
        }
    }

    fn mac_of(&self, ip: &str) -> Option<String> {
        let table = match std::fs::read_to_string(ARP_TABLE) {
            Ok(table) => table,
            Err(e) => {
                debug!("ARP table unavailable: {e}");
                return None;
            }
        };
        let mac = arp_entry(&table, ip);
        if mac.is_none() {
            warn!("{ip} is not in the ARP cache");
        }
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
10.200.18.21     0x1         0x2         52:54:00:AB:CD:01     *        ens3
10.200.18.22     0x1         0x0         00:00:00:00:00:00     *        ens3
";

    #[test]
    fn test_arp_entry_finds_lowercased_mac() {
        assert_eq!(
            arp_entry(TABLE, "10.200.18.21").as_deref(),
            Some("52:54:00:ab:cd:01")
        );
    }

    #[test]
    fn test_incomplete_arp_entry_is_missing() {
        assert_eq!(arp_entry(TABLE, "10.200.18.22"), None);
    }

    #[test]
    fn test_ip_not_in_arp_table() {
        assert_eq!(arp_entry(TABLE, "10.200.18.99"), None);
        // the header line never matches
        assert_eq!(arp_entry(TABLE, "IP"), None);
    }
}
