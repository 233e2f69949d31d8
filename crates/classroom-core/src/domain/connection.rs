//! Supervisory connection states.

use serde::{Deserialize, Serialize};

/// Connection state of one supervised machine as seen by the master.
///
/// ```text
/// Disconnected ──► Connected ──(second Connected event)──► Ready
///       ▲              │                                     │
///       └──────────────┴──── ConnectionError / AuthError ◄───┘
///                            Unreachable / Disconnected
/// ```
///
/// `Connected` means the transport is up and a protocol session has been
/// layered on top of it, but the session is not usable yet.  Commands are only
/// dispatched in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    #[serde(rename = "disconnected")]
    Disconnected,
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "error")]
    ConnectionError,
    #[serde(rename = "autherror")]
    AuthError,
    #[serde(rename = "offline")]
    Unreachable,
    #[serde(rename = "ready")]
    Ready,
}

impl ConnectionState {
    /// Returns `true` for `Connected` and `Ready`, the states in which the
    /// transport is up.
    pub fn is_link_up(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Ready)
    }

    /// Returns `true` for the states that describe a failed connection attempt.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ConnectionState::ConnectionError
                | ConnectionState::AuthError
                | ConnectionState::Unreachable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_up_states() {
        assert!(ConnectionState::Connected.is_link_up());
        assert!(ConnectionState::Ready.is_link_up());
        assert!(!ConnectionState::Disconnected.is_link_up());
        assert!(!ConnectionState::Unreachable.is_link_up());
    }

    #[test]
    fn test_failure_states() {
        assert!(ConnectionState::AuthError.is_failure());
        assert!(!ConnectionState::Disconnected.is_failure());
        assert!(!ConnectionState::Ready.is_failure());
    }

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
