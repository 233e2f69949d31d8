//! Wake-on-LAN magic packet codec.
//!
//! Wire format (102 bytes):
//! ```text
//! [0xFF x 6][MAC x 16]
//! ```
//! The packet is sent as a UDP broadcast, conventionally to port 9.  Network
//! cards with wake support scan every received frame for this pattern while
//! the machine is powered off, so the power-on command is the one command that
//! does not need a supervisory connection.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default UDP port for magic packets.
pub const WAKE_PORT: u16 = 9;

/// Limited broadcast address used when no target networks are configured.
pub const BROADCAST_IP: Ipv4Addr = Ipv4Addr::BROADCAST;

/// Size of an encoded magic packet in bytes.
pub const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

/// A MAC address could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MacAddressError {
    #[error("invalid MAC address {input:?}: expected 12 hex digits, got {digits}")]
    WrongLength { input: String, digits: usize },
    #[error("invalid MAC address {input:?}: not hexadecimal")]
    NotHex { input: String },
}

/// A 48-bit hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

impl FromStr for MacAddress {
    type Err = MacAddressError;

    /// Accepts `:`, `-` and `.` as delimiters (`00:11:22:33:44:55`,
    /// `00-11-22-33-44-55`, `0011.2233.4455`) or none at all.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let digits: String = input
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();
        if digits.len() != 12 {
            return Err(MacAddressError::WrongLength {
                input: input.to_string(),
                digits: digits.len(),
            });
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MacAddressError::NotHex {
                input: input.to_string(),
            });
        }
        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16).map_err(|_| {
                MacAddressError::NotHex {
                    input: input.to_string(),
                }
            })?;
        }
        Ok(MacAddress(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Builds the magic packet that wakes `mac`.
pub fn magic_packet(mac: &MacAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac.0);
    }
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_colon_separated_mac() {
        let mac: MacAddress = "12:34:56:78:9A:BC".parse().unwrap();
        assert_eq!(mac.0, [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
    }

    #[test]
    fn test_parse_dash_and_dot_separated_mac() {
        let dashed: MacAddress = "12-34-56-78-9a-bc".parse().unwrap();
        let dotted: MacAddress = "1234.5678.9abc".parse().unwrap();
        assert_eq!(dashed, dotted);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let err = "12:34:56".parse::<MacAddress>().unwrap_err();
        assert!(matches!(err, MacAddressError::WrongLength { digits: 6, .. }));
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let err = "zz:34:56:78:9a:bc".parse::<MacAddress>().unwrap_err();
        assert!(matches!(err, MacAddressError::NotHex { .. }));
    }

    #[test]
    fn test_parse_rejects_sign_prefixed_octets() {
        // u8 radix parsing alone would take "+0" as zero
        let result = "+0+1+2+3+4+5".parse::<MacAddress>();
        assert!(matches!(result, Err(MacAddressError::NotHex { .. })));
    }

    #[test]
    fn test_broadcast_ip_is_limited_broadcast() {
        assert_eq!(BROADCAST_IP.to_string(), "255.255.255.255");
    }

    #[test]
    fn test_display_is_lowercase_colon_form() {
        let mac = MacAddress([0x00, 0x1A, 0x2B, 0x3C, 0x4D, 0x5E]);
        assert_eq!(mac.to_string(), "00:1a:2b:3c:4d:5e");
    }

    #[test]
    fn test_magic_packet_layout() {
        // Arrange
        let mac = MacAddress([1, 2, 3, 4, 5, 6]);

        // Act
        let packet = magic_packet(&mac);

        // Assert
        assert_eq!(packet.len(), 102);
        assert_eq!(&packet[..6], &[0xFF; 6]);
        for repetition in packet[6..].chunks(6) {
            assert_eq!(repetition, &[1, 2, 3, 4, 5, 6]);
        }
    }
}
