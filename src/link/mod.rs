//! # Link Protocol
//!
//! The framed, checksummed control/data protocol carried on the point-to-point serial
//! link between the Primary and the Secondary controller.
//!
//! - `codec`: byte framing, Fletcher-16 and the streaming decoder
//! - `command`: command codes, directions and typed payload schemas

pub mod codec;
pub mod command;

pub use codec::{encode_frame, fletcher16, Fletcher16, Frame, FrameBuffer, FrameRef, LinkCodec, LinkStatistics, PayloadBuffer};
pub use codec::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, START_BYTE};
pub use command::{
    BridgeData, CommandCode, CommandSchema, Direction, DiscoveryStart, InitPayload, LinkMessage, NodeRole, RadioData,
    RelayLostReason, RelayRequestMetrics, RelaySelected, StatusReport, MAX_BRIDGE_DATA, MAX_RELAY_DATA,
};

/// Errors raised while encoding or decoding link frames
///
/// None of these travel upward past the codec: the receive path counts them and
/// resynchronises, the transmit path logs and drops the message.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LinkError {
    /// Payload does not fit in a single frame (length in bytes)
    PayloadTooLarge(usize),
    /// Payload length is not valid for the command's schema
    PayloadLengthMismatch { command: u8, length: usize },
    /// Embedded data length disagrees with the bytes actually present
    DataLengthMismatch { declared: usize, actual: usize },
    /// A field holds a value outside its enumeration
    InvalidField(u8),
}

#[cfg(feature = "std")]
impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LinkError::PayloadTooLarge(len) => write!(f, "payload of {} bytes exceeds {} byte limit", len, MAX_PAYLOAD_SIZE),
            LinkError::PayloadLengthMismatch { command, length } => {
                write!(f, "payload length {} invalid for command 0x{:02X}", length, command)
            }
            LinkError::DataLengthMismatch { declared, actual } => {
                write!(f, "declared data length {} but {} bytes present", declared, actual)
            }
            LinkError::InvalidField(value) => write!(f, "invalid field value {}", value),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LinkError {}
