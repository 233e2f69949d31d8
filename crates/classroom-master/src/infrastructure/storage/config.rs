//! TOML-based configuration for the supervising master.
//!
//! The default file lives in the platform config directory:
//! - Windows:  `%APPDATA%\ClassroomSupervisor\config.toml`
//! - Linux:    `~/.config/classroom-supervisor/config.toml`
//! - macOS:    `~/Library/Application Support/ClassroomSupervisor/config.toml`
//!
//! Example:
//!
//! ```toml
//! [vnc]
//! port = 11100
//! demo_port = 11400
//!
//! [liveness]
//! poll_interval_secs = 1
//! timeout_secs = 10
//!
//! [screenshots]
//! hide_for_groups = ["Domain Admins"]
//! hide_for_teachers = true
//!
//! [addresses]
//! check_client_addresses = false
//!
//! [wake_on_lan]
//! blacklisted_interfaces = ["lo"]
//! blacklisted_interface_prefixes = ["docker", "tun"]
//! target_broadcast_ips = ["10.200.18.255"]
//! ```
//!
//! Every field is optional: missing sections and keys fall back to the values
//! produced by the `default_*` helpers below, so an empty file is a valid
//! configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration of the supervising master.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub vnc: VncConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub screenshots: ScreenshotConfig,
    #[serde(default)]
    pub addresses: AddressConfig,
    #[serde(default)]
    pub wake_on_lan: WakeOnLanConfig,
}

/// Ports and refresh rate of the remote-control transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VncConfig {
    /// Port the agents listen on.
    #[serde(default = "default_vnc_port")]
    pub port: u16,
    /// Port a demo server offers its screen on.
    #[serde(default = "default_demo_port")]
    pub demo_port: u16,
    /// Framebuffer refresh interval requested from the transport.
    #[serde(default = "default_one_second")]
    pub framebuffer_update_secs: u64,
}

/// Liveness polling of ready connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LivenessConfig {
    #[serde(default = "default_one_second")]
    pub poll_interval_secs: u64,
    /// Seconds without an identity reply before the connection is reopened.
    #[serde(default = "default_live_timeout")]
    pub timeout_secs: u64,
}

/// Who may not have their screen captured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenshotConfig {
    /// Group names (case-insensitive) whose members are hidden.
    #[serde(default = "default_hidden_groups")]
    pub hide_for_groups: Vec<String>,
    /// Hide every teacher regardless of group membership.
    #[serde(default = "default_true")]
    pub hide_for_teachers: bool,
}

/// Choice of the active address of machines with several IPs and MACs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AddressConfig {
    /// Ping each IP and use the first that answers; take the MAC from the
    /// ARP cache when it is one of the machine's MACs.  Otherwise the first
    /// IP and MAC are used.
    #[serde(default)]
    pub check_client_addresses: bool,
}

/// Where magic packets are sent from and to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WakeOnLanConfig {
    /// Interface names never used as a packet source.
    #[serde(default)]
    pub blacklisted_interfaces: Vec<String>,
    /// Interface name prefixes never used as a packet source.
    #[serde(default)]
    pub blacklisted_interface_prefixes: Vec<String>,
    /// Broadcast addresses to send to.  Empty means `255.255.255.255`.
    #[serde(default)]
    pub target_broadcast_ips: Vec<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_vnc_port() -> u16 {
    11100
}
fn default_demo_port() -> u16 {
    11400
}
fn default_one_second() -> u64 {
    1
}
fn default_live_timeout() -> u64 {
    10
}
fn default_hidden_groups() -> Vec<String> {
    vec!["Domain Admins".to_string()]
}
fn default_true() -> bool {
    true
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            port: default_vnc_port(),
            demo_port: default_demo_port(),
            framebuffer_update_secs: default_one_second(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_one_second(),
            timeout_secs: default_live_timeout(),
        }
    }
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            hide_for_groups: default_hidden_groups(),
            hide_for_teachers: default_true(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path, or `None` when the platform config
/// directory cannot be determined from the environment.
pub fn default_config_path() -> Option<PathBuf> {
    platform_config_dir().map(|dir| dir.join("config.toml"))
}

/// Loads the configuration at `path`, returning the defaults if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<SupervisorConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SupervisorConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path` as pretty TOML, creating parent directories.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(path: &Path, config: &SupervisorConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("ClassroomSupervisor"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("classroom-supervisor"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("ClassroomSupervisor")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("classroom_test_{}", Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_default_config_has_expected_ports_and_timeouts() {
        let cfg = SupervisorConfig::default();
        assert_eq!(cfg.vnc.port, 11100);
        assert_eq!(cfg.vnc.demo_port, 11400);
        assert_eq!(cfg.vnc.framebuffer_update_secs, 1);
        assert_eq!(cfg.liveness.poll_interval_secs, 1);
        assert_eq!(cfg.liveness.timeout_secs, 10);
        assert!(!cfg.addresses.check_client_addresses);
    }

    #[test]
    fn test_address_checking_can_be_enabled() {
        let cfg: SupervisorConfig =
            toml::from_str("[addresses]\ncheck_client_addresses = true\n").expect("deserialize");
        assert!(cfg.addresses.check_client_addresses);
        assert_eq!(cfg.vnc, VncConfig::default());
    }

    #[test]
    fn test_default_screenshot_policy_hides_domain_admins_and_teachers() {
        let cfg = ScreenshotConfig::default();
        assert_eq!(cfg.hide_for_groups, vec!["Domain Admins".to_string()]);
        assert!(cfg.hide_for_teachers);
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg: SupervisorConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, SupervisorConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        // Arrange
        let toml_str = r#"
[liveness]
timeout_secs = 30

[wake_on_lan]
blacklisted_interface_prefixes = ["docker"]
"#;

        // Act
        let cfg: SupervisorConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.liveness.timeout_secs, 30);
        assert_eq!(cfg.liveness.poll_interval_secs, 1);
        assert_eq!(cfg.wake_on_lan.blacklisted_interface_prefixes, vec!["docker"]);
        assert!(cfg.wake_on_lan.target_broadcast_ips.is_empty());
        assert_eq!(cfg.vnc.port, 11100);
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let dir_path = temp_path();
        let dir = dir_path.parent().unwrap();
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(&dir_path, "[[[ not valid toml").unwrap();

        let result = load_config(&dir_path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_load_config_returns_default_when_file_absent() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");
        assert_eq!(load_config(&path).unwrap(), SupervisorConfig::default());
    }

    #[test]
    fn test_save_then_load_round_trips_via_temp_dir() {
        // Arrange
        let path = temp_path();
        let mut cfg = SupervisorConfig::default();
        cfg.vnc.demo_port = 12000;
        cfg.screenshots.hide_for_teachers = false;
        cfg.wake_on_lan.target_broadcast_ips = vec!["10.0.0.255".to_string()];

        // Act
        save_config(&path, &cfg).unwrap();
        let loaded = load_config(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config_path_ends_with_config_toml() {
        if let Some(path) = default_config_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
    }
}
