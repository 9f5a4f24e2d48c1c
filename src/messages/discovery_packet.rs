//! # Discovery Packets
//!
//! Relay discovery runs on the mesh channel next to bridged vehicle traffic. Every
//! discovery packet starts with its own magic byte and has a fixed total length, so a
//! receiver can tell it apart from a vehicle frame by `(magic, length)` alone before
//! reading any field.
//!
//! ## Wire Layout (little-endian)
//!
//! | Packet | Magic | Length | Fields after the magic |
//! |---|---|---|---|
//! | Announcement | `0xA5` | 17 | system_id u8, available u8, gcs_rssi i16, gcs_snr i8, gcs_loss u8, lat i32, lon i32, alt i16 |
//! | Request | `0xA6` | 5 | client_id u8, target_relay_id u8, sequence u16 |
//! | Acceptance | `0xA7` | 5 | relay_id u8, client_id u8, sequence u16 |
//! | Rejection | `0xA8` | 6 | relay_id u8, client_id u8, sequence u16, reason u8 |
//! | Heartbeat | `0xA9` | 4 | sender_id u8, peer_id u8, flags u8 |

use crate::position::Position;
use crate::radio::RadioFrame;

pub const ANNOUNCEMENT_MAGIC: u8 = 0xA5;
pub const REQUEST_MAGIC: u8 = 0xA6;
pub const ACCEPTANCE_MAGIC: u8 = 0xA7;
pub const REJECTION_MAGIC: u8 = 0xA8;
pub const HEARTBEAT_MAGIC: u8 = 0xA9;

pub const ANNOUNCEMENT_SIZE: usize = 17;
pub const REQUEST_SIZE: usize = 5;
pub const ACCEPTANCE_SIZE: usize = 5;
pub const REJECTION_SIZE: usize = 6;
pub const HEARTBEAT_SIZE: usize = 4;

/// Heartbeat flag: sent by the relay side of a connection
pub const HEARTBEAT_FROM_RELAY: u8 = 0x01;

/// Why a relay turned a request down
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum RejectionReason {
    CapacityFull = 0,
    LinkQuality = 1,
    Policy = 2,
}

impl RejectionReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RejectionReason::CapacityFull),
            1 => Some(RejectionReason::LinkQuality),
            2 => Some(RejectionReason::Policy),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct Announcement {
    pub system_id: u8,
    pub available: bool,
    /// GCS link RSSI in dBm
    pub gcs_rssi: i16,
    /// GCS link SNR in dB
    pub gcs_snr: i8,
    /// GCS packet loss in percent
    pub gcs_loss: u8,
    pub position: Position,
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum DiscoveryPacket {
    Announcement(Announcement),
    Request { client_id: u8, target_relay_id: u8, sequence: u16 },
    Acceptance { relay_id: u8, client_id: u8, sequence: u16 },
    Rejection { relay_id: u8, client_id: u8, sequence: u16, reason: RejectionReason },
    Heartbeat { sender_id: u8, peer_id: u8, flags: u8 },
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DiscoveryPacketError {
    /// The frame's magic and length match no discovery packet; treat it as vehicle traffic
    NotDiscovery,
    /// A rejection with an unknown reason code
    InvalidReason(u8),
}

#[cfg(feature = "std")]
impl core::fmt::Display for DiscoveryPacketError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DiscoveryPacketError::NotDiscovery => write!(f, "not a discovery packet"),
            DiscoveryPacketError::InvalidReason(code) => write!(f, "unknown rejection reason {}", code),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DiscoveryPacketError {}

/// Magic bytes of all discovery packets
pub fn is_discovery_magic(byte: u8) -> bool {
    (ANNOUNCEMENT_MAGIC..=HEARTBEAT_MAGIC).contains(&byte)
}

impl DiscoveryPacket {
    /// Parses a mesh frame as a discovery packet
    ///
    /// # Returns
    /// * `Ok(packet)` - The frame is a well-formed discovery packet
    /// * `Err(DiscoveryPacketError::NotDiscovery)` - Any other frame
    /// * `Err(DiscoveryPacketError::InvalidReason)` - A rejection with a bad reason code
    pub fn parse(frame: &[u8]) -> Result<Self, DiscoveryPacketError> {
        let u16_at = |i: usize| u16::from_le_bytes([frame[i], frame[i + 1]]);
        let i32_at = |i: usize| i32::from_le_bytes([frame[i], frame[i + 1], frame[i + 2], frame[i + 3]]);

        match (frame.first(), frame.len()) {
            (Some(&ANNOUNCEMENT_MAGIC), ANNOUNCEMENT_SIZE) => Ok(DiscoveryPacket::Announcement(Announcement {
                system_id: frame[1],
                available: frame[2] != 0,
                gcs_rssi: u16_at(3) as i16,
                gcs_snr: frame[5] as i8,
                gcs_loss: frame[6],
                position: Position::new(i32_at(7), i32_at(11), u16_at(15) as i16),
            })),
            (Some(&REQUEST_MAGIC), REQUEST_SIZE) => Ok(DiscoveryPacket::Request {
                client_id: frame[1],
                target_relay_id: frame[2],
                sequence: u16_at(3),
            }),
            (Some(&ACCEPTANCE_MAGIC), ACCEPTANCE_SIZE) => Ok(DiscoveryPacket::Acceptance {
                relay_id: frame[1],
                client_id: frame[2],
                sequence: u16_at(3),
            }),
            (Some(&REJECTION_MAGIC), REJECTION_SIZE) => Ok(DiscoveryPacket::Rejection {
                relay_id: frame[1],
                client_id: frame[2],
                sequence: u16_at(3),
                reason: RejectionReason::from_u8(frame[5]).ok_or(DiscoveryPacketError::InvalidReason(frame[5]))?,
            }),
            (Some(&HEARTBEAT_MAGIC), HEARTBEAT_SIZE) => Ok(DiscoveryPacket::Heartbeat {
                sender_id: frame[1],
                peer_id: frame[2],
                flags: frame[3],
            }),
            _ => Err(DiscoveryPacketError::NotDiscovery),
        }
    }

    /// Serializes the packet into a mesh frame
    pub fn encode(&self) -> RadioFrame {
        let mut bytes = [0u8; ANNOUNCEMENT_SIZE];
        let len = match *self {
            DiscoveryPacket::Announcement(a) => {
                bytes[0] = ANNOUNCEMENT_MAGIC;
                bytes[1] = a.system_id;
                bytes[2] = a.available as u8;
                bytes[3..5].copy_from_slice(&a.gcs_rssi.to_le_bytes());
                bytes[5] = a.gcs_snr as u8;
                bytes[6] = a.gcs_loss;
                bytes[7..11].copy_from_slice(&a.position.lat.to_le_bytes());
                bytes[11..15].copy_from_slice(&a.position.lon.to_le_bytes());
                bytes[15..17].copy_from_slice(&a.position.alt.to_le_bytes());
                ANNOUNCEMENT_SIZE
            }
            DiscoveryPacket::Request {
                client_id,
                target_relay_id,
                sequence,
            } => {
                bytes[0] = REQUEST_MAGIC;
                bytes[1] = client_id;
                bytes[2] = target_relay_id;
                bytes[3..5].copy_from_slice(&sequence.to_le_bytes());
                REQUEST_SIZE
            }
            DiscoveryPacket::Acceptance {
                relay_id,
                client_id,
                sequence,
            } => {
                bytes[0] = ACCEPTANCE_MAGIC;
                bytes[1] = relay_id;
                bytes[2] = client_id;
                bytes[3..5].copy_from_slice(&sequence.to_le_bytes());
                ACCEPTANCE_SIZE
            }
            DiscoveryPacket::Rejection {
                relay_id,
                client_id,
                sequence,
                reason,
            } => {
                bytes[0] = REJECTION_MAGIC;
                bytes[1] = relay_id;
                bytes[2] = client_id;
                bytes[3..5].copy_from_slice(&sequence.to_le_bytes());
                bytes[5] = reason as u8;
                REJECTION_SIZE
            }
            DiscoveryPacket::Heartbeat { sender_id, peer_id, flags } => {
                bytes[0] = HEARTBEAT_MAGIC;
                bytes[1] = sender_id;
                bytes[2] = peer_id;
                bytes[3] = flags;
                HEARTBEAT_SIZE
            }
        };
        let mut frame = RadioFrame::new();
        // Discovery packets are at most ANNOUNCEMENT_SIZE bytes, well under the frame capacity
        let _ = frame.extend_from_slice(&bytes[..len]);
        frame
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiscoveryPacket::Announcement(_) => "announcement",
            DiscoveryPacket::Request { .. } => "request",
            DiscoveryPacket::Acceptance { .. } => "acceptance",
            DiscoveryPacket::Rejection { .. } => "rejection",
            DiscoveryPacket::Heartbeat { .. } => "heartbeat",
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn announcement_layout() {
        let packet = DiscoveryPacket::Announcement(Announcement {
            system_id: 7,
            available: true,
            gcs_rssi: -60,
            gcs_snr: -3,
            gcs_loss: 2,
            position: Position::new(473_977_420, 85_455_940, 488),
        });
        let frame = packet.encode();
        assert_eq!(frame.len(), ANNOUNCEMENT_SIZE);
        assert_eq!(frame[0], ANNOUNCEMENT_MAGIC);
        assert_eq!(&frame[3..5], &(-60i16).to_le_bytes());
        assert_eq!(frame[5], 0xFD);
        assert_eq!(DiscoveryPacket::parse(&frame), Ok(packet));
    }

    #[test]
    fn rejection_carries_reason() {
        let frame = DiscoveryPacket::Rejection {
            relay_id: 3,
            client_id: 42,
            sequence: 0x0102,
            reason: RejectionReason::CapacityFull,
        }
        .encode();
        assert_eq!(frame.as_slice(), &[REJECTION_MAGIC, 3, 42, 0x02, 0x01, 0]);
    }

    #[test]
    fn unknown_rejection_reason_is_an_error() {
        assert_eq!(
            DiscoveryPacket::parse(&[REJECTION_MAGIC, 3, 42, 0, 0, 9]),
            Err(DiscoveryPacketError::InvalidReason(9))
        );
    }

    #[test]
    fn magic_with_wrong_length_is_vehicle_traffic() {
        assert_eq!(
            DiscoveryPacket::parse(&[REQUEST_MAGIC, 1, 2, 3]),
            Err(DiscoveryPacketError::NotDiscovery)
        );
        assert_eq!(
            DiscoveryPacket::parse(&[0xFD, 9, 0, 0, 0]),
            Err(DiscoveryPacketError::NotDiscovery)
        );
        assert_eq!(DiscoveryPacket::parse(&[]), Err(DiscoveryPacketError::NotDiscovery));
    }

    #[test]
    fn heartbeat_parses() {
        assert_eq!(
            DiscoveryPacket::parse(&[HEARTBEAT_MAGIC, 5, 9, HEARTBEAT_FROM_RELAY]),
            Ok(DiscoveryPacket::Heartbeat {
                sender_id: 5,
                peer_id: 9,
                flags: HEARTBEAT_FROM_RELAY
            })
        );
    }
}
