//! Typed records returned by the directory service.
//!
//! The directory (rooms, machines, user accounts) is an external collaborator.
//! These structs are the narrow view the supervision layer needs of it.

use serde::{Deserialize, Serialize};

/// A room resolved by name or id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    /// Stable directory identifier (e.g. a distinguished name).
    pub id: String,
    /// Short room name without the school prefix.
    pub name: String,
    /// Directory identifiers of the machines in the room.
    pub member_machine_ids: Vec<String>,
}

/// Kind of machine, as far as supervision cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineKind {
    #[default]
    Windows,
    Linux,
    MacOs,
    /// Thin client without a local display server; cannot show a demo.
    ThinClient,
    Other,
}

impl MachineKind {
    /// Returns `false` for machine types that cannot receive a demo broadcast.
    pub fn is_broadcastable(self) -> bool {
        !matches!(self, MachineKind::ThinClient)
    }
}

/// A machine resolved from the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub id: String,
    pub name: String,
    /// All configured IPv4 addresses; the first one is used.
    pub ips: Vec<String>,
    /// All configured MAC addresses; the first one is the wake target.
    pub macs: Vec<String>,
    pub description: Option<String>,
    pub kind: MachineKind,
}

impl MachineRecord {
    /// The address the master connects to.
    pub fn primary_ip(&self) -> Option<&str> {
        self.ips.first().map(String::as_str)
    }

    /// The MAC address used for Wake-on-LAN.
    pub fn primary_mac(&self) -> Option<&str> {
        self.macs.first().map(String::as_str)
    }
}

/// A user account resolved by login name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: String,
    pub username: String,
    pub is_teacher: bool,
    /// Group identifiers, either plain names or distinguished names.
    pub group_ids: Vec<String>,
}

impl UserAccount {
    /// Lower-cased group names, taking the first relative name of
    /// distinguished-name identifiers (`cn=Domain Admins,cn=groups,...`).
    pub fn group_names(&self) -> impl Iterator<Item = String> + '_ {
        self.group_ids.iter().map(|id| group_common_name(id))
    }
}

fn group_common_name(id: &str) -> String {
    let first = id.split(',').next().unwrap_or(id);
    let name = match first.split_once('=') {
        Some((_, value)) => value,
        None => first,
    };
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thin_clients_are_not_broadcastable() {
        assert!(!MachineKind::ThinClient.is_broadcastable());
        assert!(MachineKind::Windows.is_broadcastable());
        assert!(MachineKind::Other.is_broadcastable());
    }

    #[test]
    fn test_primary_addresses_are_first_entries() {
        let machine = MachineRecord {
            id: "cn=pc01".to_string(),
            name: "pc01".to_string(),
            ips: vec!["10.0.0.11".to_string(), "10.0.1.11".to_string()],
            macs: vec![],
            description: None,
            kind: MachineKind::Linux,
        };
        assert_eq!(machine.primary_ip(), Some("10.0.0.11"));
        assert_eq!(machine.primary_mac(), None);
    }

    #[test]
    fn test_group_names_from_plain_and_dn_ids() {
        let account = UserAccount {
            id: "uid=jdoe".to_string(),
            username: "jdoe".to_string(),
            is_teacher: false,
            group_ids: vec![
                "cn=Domain Admins,cn=groups,dc=school,dc=test".to_string(),
                "Lehrer".to_string(),
            ],
        };
        let names: Vec<String> = account.group_names().collect();
        assert_eq!(names, vec!["domain admins", "lehrer"]);
    }
}
