//! # Command Registry
//!
//! Every link frame carries one command code, and every code has exactly one payload
//! schema. The registry table below is the single source of truth for names,
//! directions and payload bounds; decoding checks the payload length against the
//! table before any field is read.
//!
//! ## Command groups
//!
//! - **Bidirectional control**: `INIT`, `ACK`, `STATUS_REQUEST`, `STATUS_REPORT`
//! - **Primary to Secondary**: `RELAY_ACTIVATE`, `RELAY_TX`, `BRIDGE_TX`,
//!   `BROADCAST_RELAY_REQ`, `START_RELAY_DISCOVERY`
//! - **Secondary to Primary**: `RELAY_RX`, `BRIDGE_RX`, `RELAY_SELECTED`,
//!   `RELAY_ESTABLISHED`, `RELAY_LOST`
//!
//! All multi-byte fields are little-endian and tightly packed.

use heapless::Vec;

use super::codec::{PayloadBuffer, MAX_PAYLOAD_SIZE};
use super::LinkError;

/// Largest radio frame carried by `RELAY_TX` / `RELAY_RX` (8 header bytes before it)
pub const MAX_RELAY_DATA: usize = 245;

/// Largest radio frame carried by `BRIDGE_TX` / `BRIDGE_RX` (11 header bytes before it)
pub const MAX_BRIDGE_DATA: usize = MAX_PAYLOAD_SIZE - BRIDGE_HEADER_SIZE;

const RADIO_DATA_HEADER_SIZE: usize = 8;
const BRIDGE_HEADER_SIZE: usize = 11;
const INIT_MODE_SIZE: usize = 16;

const INIT_SIZE: usize = INIT_MODE_SIZE + 12;
const STATUS_REPORT_SIZE: usize = 34;
const RELAY_REQUEST_SIZE: usize = 12;
const DISCOVERY_START_SIZE: usize = 22;
const RELAY_SELECTED_SIZE: usize = 13;

/// Command codes of the link protocol
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum CommandCode {
    Init = 0x01,
    Ack = 0x02,
    RelayActivate = 0x03,
    RelayTx = 0x04,
    RelayRx = 0x05,
    StatusReport = 0x06,
    StatusRequest = 0x07,
    BridgeTx = 0x08,
    BridgeRx = 0x09,
    BroadcastRelayReq = 0x0A,
    StartRelayDiscovery = 0x0B,
    RelaySelected = 0x0C,
    RelayEstablished = 0x0D,
    RelayLost = 0x0E,
}

impl CommandCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        let code = match value {
            0x01 => CommandCode::Init,
            0x02 => CommandCode::Ack,
            0x03 => CommandCode::RelayActivate,
            0x04 => CommandCode::RelayTx,
            0x05 => CommandCode::RelayRx,
            0x06 => CommandCode::StatusReport,
            0x07 => CommandCode::StatusRequest,
            0x08 => CommandCode::BridgeTx,
            0x09 => CommandCode::BridgeRx,
            0x0A => CommandCode::BroadcastRelayReq,
            0x0B => CommandCode::StartRelayDiscovery,
            0x0C => CommandCode::RelaySelected,
            0x0D => CommandCode::RelayEstablished,
            0x0E => CommandCode::RelayLost,
            _ => return None,
        };
        Some(code)
    }

    /// Registry entry for this code
    pub fn schema(self) -> &'static CommandSchema {
        // Codes are dense from 0x01, so the table is indexed directly
        &REGISTRY[self as usize - 1]
    }

    pub fn name(self) -> &'static str {
        self.schema().name
    }

    pub fn direction(self) -> Direction {
        self.schema().direction
    }
}

/// The two controllers on one vehicle
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeRole {
    Primary,
    Secondary,
}

/// Which side of the link may send a command
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Bidirectional,
    PrimaryToSecondary,
    SecondaryToPrimary,
}

impl Direction {
    /// Whether a node with `role` should act on a command travelling this way
    pub fn accepted_by(self, role: NodeRole) -> bool {
        match self {
            Direction::Bidirectional => true,
            Direction::PrimaryToSecondary => role == NodeRole::Secondary,
            Direction::SecondaryToPrimary => role == NodeRole::Primary,
        }
    }
}

/// Registry row: name, direction and payload bounds of one command
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CommandSchema {
    pub code: CommandCode,
    pub name: &'static str,
    pub direction: Direction,
    pub min_payload: usize,
    pub max_payload: usize,
}

impl CommandSchema {
    const fn fixed(code: CommandCode, name: &'static str, direction: Direction, size: usize) -> Self {
        CommandSchema {
            code,
            name,
            direction,
            min_payload: size,
            max_payload: size,
        }
    }

    const fn bounded(code: CommandCode, name: &'static str, direction: Direction, min: usize, max: usize) -> Self {
        CommandSchema {
            code,
            name,
            direction,
            min_payload: min,
            max_payload: max,
        }
    }

    pub fn accepts_length(&self, length: usize) -> bool {
        length >= self.min_payload && length <= self.max_payload
    }
}

static REGISTRY: [CommandSchema; 14] = [
    CommandSchema::fixed(CommandCode::Init, "INIT", Direction::Bidirectional, INIT_SIZE),
    CommandSchema::fixed(CommandCode::Ack, "ACK", Direction::Bidirectional, 0),
    CommandSchema::fixed(CommandCode::RelayActivate, "RELAY_ACTIVATE", Direction::PrimaryToSecondary, 1),
    CommandSchema::bounded(
        CommandCode::RelayTx,
        "RELAY_TX",
        Direction::PrimaryToSecondary,
        RADIO_DATA_HEADER_SIZE,
        RADIO_DATA_HEADER_SIZE + MAX_RELAY_DATA,
    ),
    CommandSchema::bounded(
        CommandCode::RelayRx,
        "RELAY_RX",
        Direction::SecondaryToPrimary,
        RADIO_DATA_HEADER_SIZE,
        RADIO_DATA_HEADER_SIZE + MAX_RELAY_DATA,
    ),
    CommandSchema::fixed(CommandCode::StatusReport, "STATUS_REPORT", Direction::Bidirectional, STATUS_REPORT_SIZE),
    CommandSchema::fixed(CommandCode::StatusRequest, "STATUS_REQUEST", Direction::Bidirectional, 0),
    CommandSchema::bounded(
        CommandCode::BridgeTx,
        "BRIDGE_TX",
        Direction::PrimaryToSecondary,
        BRIDGE_HEADER_SIZE,
        MAX_PAYLOAD_SIZE,
    ),
    CommandSchema::bounded(
        CommandCode::BridgeRx,
        "BRIDGE_RX",
        Direction::SecondaryToPrimary,
        BRIDGE_HEADER_SIZE,
        MAX_PAYLOAD_SIZE,
    ),
    CommandSchema::fixed(
        CommandCode::BroadcastRelayReq,
        "BROADCAST_RELAY_REQ",
        Direction::PrimaryToSecondary,
        RELAY_REQUEST_SIZE,
    ),
    CommandSchema::fixed(
        CommandCode::StartRelayDiscovery,
        "START_RELAY_DISCOVERY",
        Direction::PrimaryToSecondary,
        DISCOVERY_START_SIZE,
    ),
    CommandSchema::fixed(CommandCode::RelaySelected, "RELAY_SELECTED", Direction::SecondaryToPrimary, RELAY_SELECTED_SIZE),
    CommandSchema::fixed(CommandCode::RelayEstablished, "RELAY_ESTABLISHED", Direction::SecondaryToPrimary, 1),
    CommandSchema::fixed(CommandCode::RelayLost, "RELAY_LOST", Direction::SecondaryToPrimary, 2),
];

/// `INIT` payload: mode name and both radio frequencies
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct InitPayload {
    pub mode: [u8; INIT_MODE_SIZE],
    pub primary_freq: f32,
    pub secondary_freq: f32,
    pub timestamp: u32,
}

impl InitPayload {
    /// Builds an `INIT` payload, truncating `mode` to 16 bytes and NUL-padding the rest
    pub fn with(mode: &str, primary_freq: f32, secondary_freq: f32, timestamp: u32) -> Self {
        let mut name = [0u8; INIT_MODE_SIZE];
        let bytes = mode.as_bytes();
        let len = bytes.len().min(INIT_MODE_SIZE);
        name[..len].copy_from_slice(&bytes[..len]);
        InitPayload {
            mode: name,
            primary_freq,
            secondary_freq,
            timestamp,
        }
    }

    /// Mode name up to the first NUL, or "" if it is not valid UTF-8
    pub fn mode_name(&self) -> &str {
        let end = self.mode.iter().position(|&b| b == 0).unwrap_or(INIT_MODE_SIZE);
        core::str::from_utf8(&self.mode[..end]).unwrap_or("")
    }
}

/// `RELAY_TX` / `RELAY_RX` payload
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RadioData {
    pub rssi: f32,
    pub snr: f32,
    pub data: Vec<u8, MAX_RELAY_DATA>,
}

impl RadioData {
    pub fn with(rssi: f32, snr: f32, data: &[u8]) -> Result<Self, LinkError> {
        Ok(RadioData {
            rssi,
            snr,
            data: Vec::from_slice(data).map_err(|_| LinkError::PayloadTooLarge(data.len() + RADIO_DATA_HEADER_SIZE))?,
        })
    }
}

/// `BRIDGE_TX` / `BRIDGE_RX` payload
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct BridgeData {
    pub system_id: u8,
    pub rssi: f32,
    pub snr: f32,
    pub data: Vec<u8, MAX_BRIDGE_DATA>,
}

impl BridgeData {
    pub fn with(system_id: u8, rssi: f32, snr: f32, data: &[u8]) -> Result<Self, LinkError> {
        Ok(BridgeData {
            system_id,
            rssi,
            snr,
            data: Vec::from_slice(data).map_err(|_| LinkError::PayloadTooLarge(data.len() + BRIDGE_HEADER_SIZE))?,
        })
    }

    pub fn data_len(&self) -> u16 {
        self.data.len() as u16
    }
}

/// `STATUS_REPORT` payload
#[derive(Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct StatusReport {
    pub relay_active: bool,
    pub discovery_state: u8,
    pub own_system_id: u8,
    pub connected_relay: u8,
    pub client_count: u8,
    pub relay_table_count: u8,
    pub mesh_rx_packets: u32,
    pub mesh_tx_packets: u32,
    pub cad_deferrals: u32,
    pub tx_failures: u32,
    pub link_errors: u32,
    pub last_rssi: f32,
    pub last_snr: f32,
}

/// `BROADCAST_RELAY_REQ` payload: the degraded GCS link metrics
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RelayRequestMetrics {
    pub rssi: f32,
    pub snr: f32,
    pub packet_loss: f32,
}

/// `START_RELAY_DISCOVERY` payload
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct DiscoveryStart {
    pub own_lat: i32,
    pub own_lon: i32,
    pub own_alt: i16,
    pub gcs_rssi: f32,
    pub gcs_snr: f32,
    pub gcs_loss: f32,
}

/// `RELAY_SELECTED` payload
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RelaySelected {
    pub relay_id: u8,
    pub rssi: f32,
    pub snr: f32,
    pub score: f32,
}

/// Why a relay connection ended
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum RelayLostReason {
    HeartbeatTimeout = 0,
    LinkQuality = 1,
    Rejection = 2,
    GcsRestored = 3,
}

impl RelayLostReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RelayLostReason::HeartbeatTimeout),
            1 => Some(RelayLostReason::LinkQuality),
            2 => Some(RelayLostReason::Rejection),
            3 => Some(RelayLostReason::GcsRestored),
            _ => None,
        }
    }
}

/// A decoded link command, carrying its payload by value
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum LinkMessage {
    Init(InitPayload),
    Ack,
    RelayActivate { activate: bool },
    RelayTx(RadioData),
    RelayRx(RadioData),
    StatusReport(StatusReport),
    StatusRequest,
    BridgeTx(BridgeData),
    BridgeRx(BridgeData),
    BroadcastRelayReq(RelayRequestMetrics),
    StartRelayDiscovery(DiscoveryStart),
    RelaySelected(RelaySelected),
    RelayEstablished { relay_id: u8 },
    RelayLost { relay_id: u8, reason: RelayLostReason },
}

impl LinkMessage {
    pub fn code(&self) -> CommandCode {
        match self {
            LinkMessage::Init(_) => CommandCode::Init,
            LinkMessage::Ack => CommandCode::Ack,
            LinkMessage::RelayActivate { .. } => CommandCode::RelayActivate,
            LinkMessage::RelayTx(_) => CommandCode::RelayTx,
            LinkMessage::RelayRx(_) => CommandCode::RelayRx,
            LinkMessage::StatusReport(_) => CommandCode::StatusReport,
            LinkMessage::StatusRequest => CommandCode::StatusRequest,
            LinkMessage::BridgeTx(_) => CommandCode::BridgeTx,
            LinkMessage::BridgeRx(_) => CommandCode::BridgeRx,
            LinkMessage::BroadcastRelayReq(_) => CommandCode::BroadcastRelayReq,
            LinkMessage::StartRelayDiscovery(_) => CommandCode::StartRelayDiscovery,
            LinkMessage::RelaySelected(_) => CommandCode::RelaySelected,
            LinkMessage::RelayEstablished { .. } => CommandCode::RelayEstablished,
            LinkMessage::RelayLost { .. } => CommandCode::RelayLost,
        }
    }

    /// Only mode-change commands are acknowledged; everything else is fire-and-forget
    pub fn requires_ack(&self) -> bool {
        matches!(self, LinkMessage::RelayActivate { .. })
    }

    /// Serializes the payload (without framing) into `out`
    pub fn encode_payload(&self, out: &mut PayloadBuffer) -> Result<(), LinkError> {
        out.clear();
        let mut w = PayloadWriter { out };
        match self {
            LinkMessage::Init(init) => {
                w.bytes(&init.mode)?;
                w.f32(init.primary_freq)?;
                w.f32(init.secondary_freq)?;
                w.u32(init.timestamp)?;
            }
            LinkMessage::Ack | LinkMessage::StatusRequest => {}
            LinkMessage::RelayActivate { activate } => w.u8(*activate as u8)?,
            LinkMessage::RelayTx(radio) | LinkMessage::RelayRx(radio) => {
                w.f32(radio.rssi)?;
                w.f32(radio.snr)?;
                w.bytes(&radio.data)?;
            }
            LinkMessage::StatusReport(status) => {
                w.u8(status.relay_active as u8)?;
                w.u8(status.discovery_state)?;
                w.u8(status.own_system_id)?;
                w.u8(status.connected_relay)?;
                w.u8(status.client_count)?;
                w.u8(status.relay_table_count)?;
                w.u32(status.mesh_rx_packets)?;
                w.u32(status.mesh_tx_packets)?;
                w.u32(status.cad_deferrals)?;
                w.u32(status.tx_failures)?;
                w.u32(status.link_errors)?;
                w.f32(status.last_rssi)?;
                w.f32(status.last_snr)?;
            }
            LinkMessage::BridgeTx(bridge) | LinkMessage::BridgeRx(bridge) => {
                w.u8(bridge.system_id)?;
                w.f32(bridge.rssi)?;
                w.f32(bridge.snr)?;
                w.u16(bridge.data_len())?;
                w.bytes(&bridge.data)?;
            }
            LinkMessage::BroadcastRelayReq(req) => {
                w.f32(req.rssi)?;
                w.f32(req.snr)?;
                w.f32(req.packet_loss)?;
            }
            LinkMessage::StartRelayDiscovery(start) => {
                w.i32(start.own_lat)?;
                w.i32(start.own_lon)?;
                w.i16(start.own_alt)?;
                w.f32(start.gcs_rssi)?;
                w.f32(start.gcs_snr)?;
                w.f32(start.gcs_loss)?;
            }
            LinkMessage::RelaySelected(selected) => {
                w.u8(selected.relay_id)?;
                w.f32(selected.rssi)?;
                w.f32(selected.snr)?;
                w.f32(selected.score)?;
            }
            LinkMessage::RelayEstablished { relay_id } => w.u8(*relay_id)?,
            LinkMessage::RelayLost { relay_id, reason } => {
                w.u8(*relay_id)?;
                w.u8(*reason as u8)?;
            }
        }
        Ok(())
    }

    /// Decodes a payload according to the registry schema for `code`
    pub fn decode(code: CommandCode, payload: &[u8]) -> Result<Self, LinkError> {
        if !code.schema().accepts_length(payload.len()) {
            return Err(LinkError::PayloadLengthMismatch {
                command: code as u8,
                length: payload.len(),
            });
        }

        let mut r = PayloadReader { bytes: payload, pos: 0 };
        let message = match code {
            CommandCode::Init => {
                let mut mode = [0u8; INIT_MODE_SIZE];
                mode.copy_from_slice(r.take(INIT_MODE_SIZE)?);
                LinkMessage::Init(InitPayload {
                    mode,
                    primary_freq: r.f32()?,
                    secondary_freq: r.f32()?,
                    timestamp: r.u32()?,
                })
            }
            CommandCode::Ack => LinkMessage::Ack,
            CommandCode::StatusRequest => LinkMessage::StatusRequest,
            CommandCode::RelayActivate => LinkMessage::RelayActivate { activate: r.u8()? != 0 },
            CommandCode::RelayTx | CommandCode::RelayRx => {
                let rssi = r.f32()?;
                let snr = r.f32()?;
                let radio = RadioData::with(rssi, snr, r.rest())?;
                if code == CommandCode::RelayTx {
                    LinkMessage::RelayTx(radio)
                } else {
                    LinkMessage::RelayRx(radio)
                }
            }
            CommandCode::StatusReport => LinkMessage::StatusReport(StatusReport {
                relay_active: r.u8()? != 0,
                discovery_state: r.u8()?,
                own_system_id: r.u8()?,
                connected_relay: r.u8()?,
                client_count: r.u8()?,
                relay_table_count: r.u8()?,
                mesh_rx_packets: r.u32()?,
                mesh_tx_packets: r.u32()?,
                cad_deferrals: r.u32()?,
                tx_failures: r.u32()?,
                link_errors: r.u32()?,
                last_rssi: r.f32()?,
                last_snr: r.f32()?,
            }),
            CommandCode::BridgeTx | CommandCode::BridgeRx => {
                let system_id = r.u8()?;
                let rssi = r.f32()?;
                let snr = r.f32()?;
                let declared = r.u16()? as usize;
                let data = r.rest();
                if declared != data.len() {
                    return Err(LinkError::DataLengthMismatch {
                        declared,
                        actual: data.len(),
                    });
                }
                let bridge = BridgeData::with(system_id, rssi, snr, data)?;
                if code == CommandCode::BridgeTx {
                    LinkMessage::BridgeTx(bridge)
                } else {
                    LinkMessage::BridgeRx(bridge)
                }
            }
            CommandCode::BroadcastRelayReq => LinkMessage::BroadcastRelayReq(RelayRequestMetrics {
                rssi: r.f32()?,
                snr: r.f32()?,
                packet_loss: r.f32()?,
            }),
            CommandCode::StartRelayDiscovery => LinkMessage::StartRelayDiscovery(DiscoveryStart {
                own_lat: r.i32()?,
                own_lon: r.i32()?,
                own_alt: r.i16()?,
                gcs_rssi: r.f32()?,
                gcs_snr: r.f32()?,
                gcs_loss: r.f32()?,
            }),
            CommandCode::RelaySelected => LinkMessage::RelaySelected(RelaySelected {
                relay_id: r.u8()?,
                rssi: r.f32()?,
                snr: r.f32()?,
                score: r.f32()?,
            }),
            CommandCode::RelayEstablished => LinkMessage::RelayEstablished { relay_id: r.u8()? },
            CommandCode::RelayLost => {
                let relay_id = r.u8()?;
                let raw_reason = r.u8()?;
                let reason = RelayLostReason::from_u8(raw_reason).ok_or(LinkError::InvalidField(raw_reason))?;
                LinkMessage::RelayLost { relay_id, reason }
            }
        };
        Ok(message)
    }
}

struct PayloadWriter<'a> {
    out: &'a mut PayloadBuffer,
}

impl PayloadWriter<'_> {
    fn bytes(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let wanted = self.out.len() + data.len();
        self.out.extend_from_slice(data).map_err(|_| LinkError::PayloadTooLarge(wanted))
    }

    fn u8(&mut self, v: u8) -> Result<(), LinkError> {
        self.bytes(&[v])
    }

    fn u16(&mut self, v: u16) -> Result<(), LinkError> {
        self.bytes(&v.to_le_bytes())
    }

    fn i16(&mut self, v: i16) -> Result<(), LinkError> {
        self.bytes(&v.to_le_bytes())
    }

    fn u32(&mut self, v: u32) -> Result<(), LinkError> {
        self.bytes(&v.to_le_bytes())
    }

    fn i32(&mut self, v: i32) -> Result<(), LinkError> {
        self.bytes(&v.to_le_bytes())
    }

    fn f32(&mut self, v: f32) -> Result<(), LinkError> {
        self.bytes(&v.to_le_bytes())
    }
}

struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], LinkError> {
        let end = self.pos + n;
        let slice = self.bytes.get(self.pos..end).ok_or(LinkError::DataLengthMismatch {
            declared: end,
            actual: self.bytes.len(),
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], LinkError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.pos.min(self.bytes.len())..];
        self.pos = self.bytes.len();
        rest
    }

    fn u8(&mut self) -> Result<u8, LinkError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, LinkError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn i16(&mut self) -> Result<i16, LinkError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, LinkError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, LinkError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, LinkError> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn round_trip(message: LinkMessage) -> LinkMessage {
        let mut payload = PayloadBuffer::new();
        message.encode_payload(&mut payload).unwrap();
        assert!(message.code().schema().accepts_length(payload.len()));
        LinkMessage::decode(message.code(), &payload).unwrap()
    }

    #[test]
    fn registry_is_indexed_by_code() {
        for raw in 0x01u8..=0x0E {
            let code = CommandCode::from_u8(raw).unwrap();
            assert_eq!(code.schema().code, code);
        }
        assert!(CommandCode::from_u8(0x00).is_none());
        assert!(CommandCode::from_u8(0x0F).is_none());
    }

    #[test]
    fn directions_follow_command_groups() {
        assert!(CommandCode::Ack.direction().accepted_by(NodeRole::Primary));
        assert!(CommandCode::Ack.direction().accepted_by(NodeRole::Secondary));
        assert!(CommandCode::BridgeTx.direction().accepted_by(NodeRole::Secondary));
        assert!(!CommandCode::BridgeTx.direction().accepted_by(NodeRole::Primary));
        assert!(CommandCode::RelayLost.direction().accepted_by(NodeRole::Primary));
        assert!(!CommandCode::RelayLost.direction().accepted_by(NodeRole::Secondary));
    }

    #[test]
    fn init_payload_is_28_bytes_and_keeps_mode_name() {
        let init = InitPayload::with("BRIDGE", 868.1, 915.2, 1234);
        let mut payload = PayloadBuffer::new();
        LinkMessage::Init(init).encode_payload(&mut payload).unwrap();
        assert_eq!(payload.len(), 28);
        match round_trip(LinkMessage::Init(init)) {
            LinkMessage::Init(decoded) => {
                assert_eq!(decoded.mode_name(), "BRIDGE");
                assert_eq!(decoded.timestamp, 1234);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn long_mode_name_is_truncated() {
        let init = InitPayload::with("A-VERY-LONG-MODE-NAME", 0.0, 0.0, 0);
        assert_eq!(init.mode_name(), "A-VERY-LONG-MODE");
    }

    #[test]
    fn bridge_payload_carries_declared_length() {
        let data: std::vec::Vec<u8> = (0..40).collect();
        let bridge = BridgeData::with(0, -70.0, 8.0, &data).unwrap();
        let mut payload = PayloadBuffer::new();
        LinkMessage::BridgeTx(bridge.clone()).encode_payload(&mut payload).unwrap();
        assert_eq!(payload.len(), 11 + 40);
        assert_eq!(u16::from_le_bytes([payload[9], payload[10]]), 40);
        assert_eq!(round_trip(LinkMessage::BridgeTx(bridge.clone())), LinkMessage::BridgeTx(bridge));
    }

    #[test]
    fn bridge_payload_with_wrong_data_len_is_rejected() {
        let bridge = BridgeData::with(3, -60.0, 5.0, &[1, 2, 3, 4]).unwrap();
        let mut payload = PayloadBuffer::new();
        LinkMessage::BridgeRx(bridge).encode_payload(&mut payload).unwrap();
        payload[9] = 5;
        assert_eq!(
            LinkMessage::decode(CommandCode::BridgeRx, &payload),
            Err(LinkError::DataLengthMismatch { declared: 5, actual: 4 })
        );
    }

    #[test]
    fn bridge_data_limit_fits_link_payload() {
        let data = [0u8; MAX_BRIDGE_DATA];
        let bridge = BridgeData::with(1, 0.0, 0.0, &data).unwrap();
        let mut payload = PayloadBuffer::new();
        assert!(LinkMessage::BridgeTx(bridge).encode_payload(&mut payload).is_ok());
        assert_eq!(payload.len(), MAX_PAYLOAD_SIZE);
        assert!(BridgeData::with(1, 0.0, 0.0, &[0u8; MAX_BRIDGE_DATA + 1]).is_err());
    }

    #[test]
    fn fixed_size_commands_reject_other_lengths() {
        assert!(LinkMessage::decode(CommandCode::Ack, &[0]).is_err());
        assert!(LinkMessage::decode(CommandCode::RelayEstablished, &[]).is_err());
        assert!(LinkMessage::decode(CommandCode::BroadcastRelayReq, &[0; 11]).is_err());
        assert!(LinkMessage::decode(CommandCode::RelayTx, &[0; 7]).is_err());
    }

    #[test]
    fn relay_lost_rejects_unknown_reason() {
        assert_eq!(LinkMessage::decode(CommandCode::RelayLost, &[7, 9]), Err(LinkError::InvalidField(9)));
        assert_eq!(
            LinkMessage::decode(CommandCode::RelayLost, &[7, 3]).unwrap(),
            LinkMessage::RelayLost {
                relay_id: 7,
                reason: RelayLostReason::GcsRestored
            }
        );
    }

    #[test]
    fn status_report_survives_encoding() {
        let status = StatusReport {
            relay_active: true,
            discovery_state: 3,
            own_system_id: 12,
            connected_relay: 7,
            client_count: 2,
            relay_table_count: 4,
            mesh_rx_packets: 1000,
            mesh_tx_packets: 900,
            cad_deferrals: 5,
            tx_failures: 1,
            link_errors: 2,
            last_rssi: -81.5,
            last_snr: 6.25,
        };
        assert_eq!(round_trip(LinkMessage::StatusReport(status)), LinkMessage::StatusReport(status));
    }

    #[test]
    fn only_relay_activate_requires_ack() {
        assert!(LinkMessage::RelayActivate { activate: true }.requires_ack());
        assert!(!LinkMessage::StatusRequest.requires_ack());
        assert!(!LinkMessage::Init(InitPayload::with("DIRECT", 0.0, 0.0, 0)).requires_ack());
    }
}
