//! State flags reported by a supervised machine.
//!
//! The agent on each machine periodically reports a small bitmask describing
//! which of its local features are active (screen lock, demo role, ...).  The
//! master never acts on the raw number; it decodes which *named* bits flipped
//! since the previous report and publishes one event per flipped bit.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One named bit of the state bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    AccessDialog,
    DemoServer,
    DemoClient,
    ScreenLock,
    InputLock,
    SystemTrayIcon,
    MessageBox,
}

impl Flag {
    /// Every flag, in bit order.
    pub const ALL: [Flag; 7] = [
        Flag::AccessDialog,
        Flag::DemoServer,
        Flag::DemoClient,
        Flag::ScreenLock,
        Flag::InputLock,
        Flag::SystemTrayIcon,
        Flag::MessageBox,
    ];

    /// The bit this flag occupies in the reported mask.
    pub const fn bit(self) -> u32 {
        match self {
            Flag::AccessDialog => FlagBits::ACCESS_DIALOG,
            Flag::DemoServer => FlagBits::DEMO_SERVER,
            Flag::DemoClient => FlagBits::DEMO_CLIENT,
            Flag::ScreenLock => FlagBits::SCREEN_LOCK,
            Flag::InputLock => FlagBits::INPUT_LOCK,
            Flag::SystemTrayIcon => FlagBits::SYSTEM_TRAY_ICON,
            Flag::MessageBox => FlagBits::MESSAGE_BOX,
        }
    }

    /// Event-style name, e.g. `"screen-lock"`.
    pub const fn name(self) -> &'static str {
        match self {
            Flag::AccessDialog => "access-dialog",
            Flag::DemoServer => "demo-server",
            Flag::DemoClient => "demo-client",
            Flag::ScreenLock => "screen-lock",
            Flag::InputLock => "input-lock",
            Flag::SystemTrayIcon => "system-tray-icon",
            Flag::MessageBox => "message-box",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raw state bitmask as reported by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagBits(pub u32);

impl FlagBits {
    pub const ACCESS_DIALOG: u32 = 1 << 0;
    pub const DEMO_SERVER: u32 = 1 << 1;
    pub const DEMO_CLIENT: u32 = 1 << 2;
    pub const SCREEN_LOCK: u32 = 1 << 3;
    pub const INPUT_LOCK: u32 = 1 << 4;
    pub const SYSTEM_TRAY_ICON: u32 = 1 << 5;
    pub const MESSAGE_BOX: u32 = 1 << 6;

    /// Returns `true` if `flag` is set.
    pub fn contains(self, flag: Flag) -> bool {
        self.0 & flag.bit() != 0
    }

    /// Returns a copy with `flag` set or cleared.
    pub fn with(self, flag: Flag, value: bool) -> Self {
        if value {
            FlagBits(self.0 | flag.bit())
        } else {
            FlagBits(self.0 & !flag.bit())
        }
    }

    /// Decodes which named flags differ between `previous` and `self`.
    ///
    /// When no previous report exists every set bit counts as changed.  Each
    /// entry carries the flag's new value.  Unknown bits are ignored.
    pub fn changes_since(self, previous: Option<FlagBits>) -> Vec<(Flag, bool)> {
        let diff = match previous {
            Some(old) => old.0 ^ self.0,
            None => self.0,
        };
        Flag::ALL
            .iter()
            .filter(|flag| diff & flag.bit() != 0)
            .map(|&flag| (flag, self.contains(flag)))
            .collect()
    }
}

impl From<u32> for FlagBits {
    fn from(bits: u32) -> Self {
        FlagBits(bits)
    }
}
