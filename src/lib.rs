#![cfg_attr(not(feature = "std"), no_std)]
#![allow(async_fn_in_trait)] // Radio and runtime traits are only used with static dispatch

//! # UAV Dual-Radio Relay Core
//!
//! Coordination core for a vehicle carrying two cooperating controllers:
//!
//! - the **Primary**, holding the radio that faces the ground control station (F1)
//! - the **Secondary**, holding a mesh radio shared with other vehicles (F2)
//!
//! The two controllers talk over a point-to-point serial link using the framed
//! protocol in [`link`]. The Primary runs the mode machine ([`primary`]) that keeps
//! the frequency bridge up, detects a jammed GCS link and moves traffic onto a peer
//! relay. The Secondary runs relay discovery and client management over the mesh
//! ([`secondary`]).
//!
//! ## Architecture
//!
//! Node state machines never touch hardware. They consume events (serial messages,
//! received radio frames, timer polls) and emit [`intent::Intent`] values into an
//! outbox. The runtimes in [`runtime`] own the radios and the serial port, drain
//! interrupt flags and execute the intents.

pub mod clock;
pub mod frame_inspector;
pub mod intent;
pub mod link;
pub mod link_quality;
pub mod messages;
pub mod position;
pub mod primary;
pub mod radio;
pub mod radio_devices;
pub mod runtime;
pub mod secondary;
pub mod serial;

pub use clock::{Clock, ManualClock, SystemClock};
pub use frame_inspector::{FrameInspector, MavlinkInspector, PriorityTier};
pub use intent::{Intent, Outbox};
pub use link::{LinkCodec, LinkError, LinkMessage, NodeRole};
pub use link_quality::{LinkQualitySample, LinkQualityThresholds};
pub use position::Position;
pub use primary::{Mode, OperatingMode, PrimaryNode};
pub use radio::{CadResult, RadioDevice, RadioDeviceError, RadioFrame, RadioIrqFlags, RadioTransmitter, ReceivedFrame};
pub use runtime::{PrimaryRuntime, SecondaryRuntime};
pub use secondary::SecondaryNode;
pub use serial::{ChannelSerial, SerialError, SerialPort};

/// Largest frame carried by either radio
pub const RADIO_FRAME_SIZE: usize = 255;

/// Peer-relay slots tracked by the Primary
pub const PEER_RELAY_SLOTS: usize = 4;

/// Candidate relays tracked by the Secondary
pub const RELAY_TABLE_SIZE: usize = 10;

/// Clients a Secondary will relay for at once
pub const MAX_CLIENTS: usize = 3;

/// ACK-requiring commands in flight on the Primary
pub const PENDING_COMMANDS: usize = 8;

/// Intents buffered between a node and its runtime
pub const OUTBOX_SIZE: usize = 16;

/// Frames held for the local flight controller by a runtime
pub const LOCAL_DELIVERY_SIZE: usize = 8;

/// Weights of the relay scoring function
///
/// `score = rssi · f(mesh_rssi) + snr · f(mesh_snr) + gcs · g(gcs_rssi, gcs_loss) − distance · km`
///
/// Every term is monotonic in its metric, so any non-negative set of weights
/// keeps "better link, higher score".
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct ScoringWeights {
    pub rssi: f32,
    pub snr: f32,
    pub gcs: f32,
    /// Penalty per kilometre between the own position and the candidate
    pub distance: f32,
}

impl ScoringWeights {
    pub const fn new(rssi: f32, snr: f32, gcs: f32, distance: f32) -> Self {
        Self { rssi, snr, gcs, distance }
    }

    /// Builds weights from their compact form
    ///
    /// Each byte holds one weight in hundredths, in the order
    /// `[rssi, snr, gcs, distance]`. `[40, 20, 30, 50]` is the default set.
    pub fn new_from_encoded(encoded: &[u8; 4]) -> Self {
        Self::new(
            encoded[0] as f32 / 100.0,
            encoded[1] as f32 / 100.0,
            encoded[2] as f32 / 100.0,
            encoded[3] as f32 / 100.0,
        )
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self::new_from_encoded(&[40, 20, 30, 50])
    }
}

/// Timing and threshold configuration shared by both nodes
///
/// Each node destructures the fields it needs at construction; durations are in
/// milliseconds, signal levels in dBm / dB.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RelayConfiguration {
    /// Primary heartbeat cadence on F1
    pub heartbeat_interval_ms: u64,
    /// Pending-command retransmit trigger (doubles with every retry)
    pub ack_timeout_ms: u64,
    /// Retransmissions before a pending command is abandoned
    pub max_retries: u8,
    /// Mode-change ACK deadline
    pub transition_timeout_ms: u64,
    /// Forced revert if a transition is still unresolved
    pub watchdog_timeout_ms: u64,
    /// Consecutive poor samples before the jamming detector fires
    pub jamming_count: u8,
    /// Inactivity after which a peer-relay slot is reclaimed
    pub peer_relay_timeout_ms: u64,
    /// Secondary relay announcement cadence
    pub announcement_interval_ms: u64,
    /// Maximum random delay added to each announcement
    pub announcement_jitter_ms: u64,
    /// Relay-table entries not refreshed within this window are evicted
    pub stale_relay_ms: u64,
    /// CAD attempts before a mesh transmission is dropped
    pub cad_backoffs: u8,
    pub cad_backoff_min_ms: u64,
    pub cad_backoff_jitter_ms: u64,
    /// Upper bound on a single CAD operation
    pub cad_timeout_ms: u64,
    /// Upper bound on a single transmission
    pub tx_timeout_ms: u64,
    /// Wait before re-running selection when no relay is available
    pub discovery_retry_ms: u64,
    /// Selection rounds before discovery gives up and returns to idle
    pub max_discovery_attempts: u8,
    /// Wait for an Acceptance/Rejection before resending a Request
    pub request_timeout_ms: u64,
    pub max_request_retries: u8,
    /// Mesh heartbeat cadence between a relay and its clients
    pub relay_heartbeat_interval_ms: u64,
    /// Client (or relay) silence after which the connection is dropped
    pub client_timeout_ms: u64,
    /// First mesh frame above this RSSI sets the own system id
    pub own_id_rssi_threshold: f32,
    /// RSSI required for a packet to count towards recovery from Relay
    pub recovery_rssi: f32,
    /// Consecutive good packets required to leave Relay
    pub recovery_good_packets: u8,
    /// Primary polls the Secondary's status this often in Bridge and Relay
    pub status_request_interval_ms: u64,
    /// A partially received serial frame is abandoned after this long
    pub link_frame_timeout_ms: u64,
    /// Reported to the Secondary in `INIT`
    pub primary_freq_mhz: f32,
    pub secondary_freq_mhz: f32,
    pub quality_thresholds: LinkQualityThresholds,
    pub scoring_weights: ScoringWeights,
}

impl Default for RelayConfiguration {
    fn default() -> Self {
        RelayConfiguration {
            heartbeat_interval_ms: 1_000,
            ack_timeout_ms: 500,
            max_retries: 3,
            transition_timeout_ms: 1_000,
            watchdog_timeout_ms: 2_000,
            jamming_count: 5,
            peer_relay_timeout_ms: 30_000,
            announcement_interval_ms: 2_000,
            announcement_jitter_ms: 100,
            stale_relay_ms: 10_000,
            cad_backoffs: 3,
            cad_backoff_min_ms: 2,
            cad_backoff_jitter_ms: 6,
            cad_timeout_ms: 100,
            tx_timeout_ms: 1_000,
            discovery_retry_ms: 5_000,
            max_discovery_attempts: 5,
            request_timeout_ms: 1_500,
            max_request_retries: 3,
            relay_heartbeat_interval_ms: 1_000,
            client_timeout_ms: 5_000,
            own_id_rssi_threshold: -50.0,
            recovery_rssi: -90.0,
            recovery_good_packets: 5,
            status_request_interval_ms: 5_000,
            link_frame_timeout_ms: 100,
            primary_freq_mhz: 868.0,
            secondary_freq_mhz: 915.0,
            quality_thresholds: LinkQualityThresholds::default(),
            scoring_weights: ScoringWeights::default(),
        }
    }
}
