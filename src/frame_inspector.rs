//! # Frame Inspection
//!
//! Bridged radio frames are opaque to the relay core. The only things the core
//! needs from them are the sender's system id (for peer tracking and own-id
//! detection), the expected frame length and a scheduling tier. [`FrameInspector`]
//! is that seam; [`MavlinkInspector`] implements it for MAVLink v1/v2 by reading
//! header fields only.
//!
//! ## MAVLink header layout
//!
//! ```text
//! v1: FE len seq sys comp msg           payload crc(2)            = len + 8
//! v2: FD len inc cmp seq sys comp msg(3) payload crc(2) [sig(13)] = len + 12 (+13)
//! ```

const MAVLINK_V1_MAGIC: u8 = 0xFE;
const MAVLINK_V2_MAGIC: u8 = 0xFD;

const V1_HEADER_SIZE: usize = 6;
const V2_HEADER_SIZE: usize = 10;
const CRC_SIZE: usize = 2;
const V2_SIGNATURE_SIZE: usize = 13;
const V2_INCOMPAT_SIGNED: u8 = 0x01;

/// Control-plane messages: mode and parameter changes, commands, setpoints
const TIER_COMMAND_IDS: [u32; 9] = [11, 23, 76, 81, 82, 84, 85, 511, 512];

/// Mission transfer and acknowledgements
const TIER_MISSION_IDS: [u32; 15] = [20, 21, 22, 39, 40, 41, 42, 43, 44, 45, 47, 51, 73, 77, 254];

/// Scheduling tier handed to the radio scheduler alongside a frame
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(u8)]
pub enum PriorityTier {
    Command = 1,
    Mission = 2,
    Telemetry = 3,
}

/// Header-level view of vehicle messages carried over the radios
pub trait FrameInspector {
    /// Sender system id, if the frame is recognisable
    fn extract_system_id(&self, frame: &[u8]) -> Option<u8>;

    /// Total frame length implied by the header in `prefix`, if enough of it is present
    fn expected_length(&self, prefix: &[u8]) -> Option<usize>;

    fn is_valid_start(&self, prefix: &[u8]) -> bool;

    fn priority_tier(&self, frame: &[u8]) -> PriorityTier;
}

/// [`FrameInspector`] for MAVLink v1 and v2 frames
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct MavlinkInspector;

impl MavlinkInspector {
    pub const fn new() -> Self {
        MavlinkInspector
    }

    /// Message id of a frame, if its header is complete
    pub fn message_id(&self, frame: &[u8]) -> Option<u32> {
        match frame.first()? {
            &MAVLINK_V1_MAGIC if frame.len() >= V1_HEADER_SIZE => Some(frame[5] as u32),
            &MAVLINK_V2_MAGIC if frame.len() >= V2_HEADER_SIZE => {
                Some(u32::from_le_bytes([frame[7], frame[8], frame[9], 0]))
            }
            _ => None,
        }
    }
}

impl FrameInspector for MavlinkInspector {
    fn extract_system_id(&self, frame: &[u8]) -> Option<u8> {
        match frame.first()? {
            &MAVLINK_V1_MAGIC if frame.len() >= V1_HEADER_SIZE => Some(frame[3]),
            &MAVLINK_V2_MAGIC if frame.len() >= V2_HEADER_SIZE => Some(frame[5]),
            _ => None,
        }
    }

    fn expected_length(&self, prefix: &[u8]) -> Option<usize> {
        let payload_len = *prefix.get(1)? as usize;
        match prefix[0] {
            MAVLINK_V1_MAGIC => Some(V1_HEADER_SIZE + payload_len + CRC_SIZE),
            MAVLINK_V2_MAGIC => {
                let incompat = *prefix.get(2)?;
                let signature = if incompat & V2_INCOMPAT_SIGNED != 0 { V2_SIGNATURE_SIZE } else { 0 };
                Some(V2_HEADER_SIZE + payload_len + CRC_SIZE + signature)
            }
            _ => None,
        }
    }

    fn is_valid_start(&self, prefix: &[u8]) -> bool {
        matches!(prefix.first(), Some(&MAVLINK_V1_MAGIC) | Some(&MAVLINK_V2_MAGIC))
    }

    fn priority_tier(&self, frame: &[u8]) -> PriorityTier {
        match self.message_id(frame) {
            Some(id) if TIER_COMMAND_IDS.contains(&id) => PriorityTier::Command,
            Some(id) if TIER_MISSION_IDS.contains(&id) => PriorityTier::Mission,
            _ => PriorityTier::Telemetry,
        }
    }
}
