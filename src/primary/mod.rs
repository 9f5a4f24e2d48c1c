//! # Primary Node - GCS Link Owner and Mode Controller
//!
//! The Primary holds the radio facing the ground control station (F1) and decides
//! how the vehicle's traffic reaches it. It never drives hardware itself: every
//! effect is an [`Intent`] queued in its outbox and executed by
//! [`crate::runtime::PrimaryRuntime`].
//!
//! ## Architecture
//!
//! The node is a composition of small state machines:
//! - **Mode machine** (`mode`): `Direct` / `Bridge` / `Relay` with an ACK-confirmed
//!   `Switching` state, transition timeout and watchdog
//! - **Pending tracker** (`pending`): retransmits unacknowledged commands with
//!   exponential backoff
//! - **Jamming detector** (`jamming`): streak of poor link samples, plus the recovery
//!   streak used to leave `Relay`
//! - **Peer-relay table** (`peer_relay`): recently heard mesh vehicles
//!
//! ## Traffic Flow
//!
//! | Source | Direct | Bridge | Relay |
//! |---|---|---|---|
//! | GCS frame on F1 | local | `BRIDGE_TX` + local | local |
//! | `BRIDGE_RX` from Secondary | F1 | F1 | local |
//! | `RELAY_RX` from Secondary | F1 | F1 | F1 |
//! | Vehicle frame | F1 | F1 | `RELAY_TX` |
//!
//! While `Switching`, the rules of the mode being left stay in force.
//!
//! ## Heartbeats
//!
//! A control frame `[0xB5, 0x01, seq_lo, seq_hi, mode]` goes out on F1 every
//! `heartbeat_interval_ms`. Any frame received from the GCS answers the latest
//! heartbeat; GCS frames starting with `0xB5` are control replies and are never
//! bridged. Each heartbeat also feeds the current link sample to the jamming detector.

pub mod jamming;
pub mod mode;
pub mod peer_relay;
pub mod pending;

use embassy_time::{Duration, Instant};
use log::log;

use crate::frame_inspector::{FrameInspector, PriorityTier};
use crate::intent::{Intent, Outbox};
use crate::link::{
    BridgeData, CommandCode, DiscoveryStart, InitPayload, LinkMessage, NodeRole, RadioData, RelayLostReason, RelayRequestMetrics,
    RelaySelected, StatusReport, MAX_BRIDGE_DATA, MAX_RELAY_DATA,
};
use crate::link_quality::LinkQualitySample;
use crate::position::Position;
use crate::radio::RadioFrame;
use crate::RelayConfiguration;

use jamming::JammingDetector;
use peer_relay::PeerRelayTable;
use pending::{PendingEvent, PendingTracker};

pub use mode::{Mode, ModeEvent, ModeMachine, ModeState, OperatingMode, RevertReason, TransitionError};
pub use peer_relay::{PeerHandle, PeerRelaySlot};

/// First byte of Primary control frames on F1
pub const CONTROL_MAGIC: u8 = 0xB5;

/// Control frame type of the F1 heartbeat
pub const HEARTBEAT_TYPE: u8 = 0x01;

const HEARTBEAT_FRAME_SIZE: usize = 5;

/// Traffic and fault counters of the Primary
#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct PrimaryCounters {
    pub transition_failures: u32,
    pub watchdog_reverts: u32,
    /// Commands abandoned after exhausting their retries
    pub uart_timeouts: u32,
    pub gcs_to_mesh_packets: u32,
    pub gcs_to_mesh_bytes: u32,
    pub mesh_to_gcs_packets: u32,
    pub mesh_to_gcs_bytes: u32,
    /// Client traffic relayed to the GCS while acting as a relay
    pub relayed_packets: u32,
    pub relayed_bytes: u32,
    /// Vehicle frames sent through a peer relay
    pub via_relay_packets: u32,
    pub control_replies: u32,
    /// Link commands received in a direction the Primary does not accept
    pub wrong_direction: u32,
    pub peer_slot_exhaustion: u32,
    /// Frames too large for the link payload they would travel in
    pub oversized_drops: u32,
}

/// The Primary's view of its relay connection while in `Relay`
#[derive(Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RelayLinkState {
    pub selected: Option<RelaySelected>,
    pub established: Option<u8>,
}

pub struct PrimaryNode<I: FrameInspector> {
    inspector: I,
    mode: ModeMachine,
    pending: PendingTracker,
    jamming: JammingDetector,
    peers: PeerRelayTable,
    link_quality: LinkQualitySample,
    outbox: Outbox,

    heartbeat_interval: Duration,
    next_heartbeat: Instant,
    heartbeat_sequence: u16,
    awaiting_response: bool,

    status_request_interval: Duration,
    next_status_request: Instant,
    last_status: Option<StatusReport>,

    relay_link: RelayLinkState,
    own_position: Option<Position>,
    primary_freq_mhz: f32,
    secondary_freq_mhz: f32,
    counters: PrimaryCounters,
}

impl<I: FrameInspector> PrimaryNode<I> {
    /// Creates a Primary in `Bridge` mode
    ///
    /// # Arguments
    /// * `config` - Timings and thresholds; only the Primary's fields are used
    /// * `inspector` - Parser for the vehicle message format carried in frames
    /// * `now` - Current time; the first heartbeat is due one interval later
    pub fn new(config: &RelayConfiguration, inspector: I, now: Instant) -> Self {
        let RelayConfiguration {
            heartbeat_interval_ms,
            ack_timeout_ms,
            max_retries,
            transition_timeout_ms,
            watchdog_timeout_ms,
            jamming_count,
            peer_relay_timeout_ms,
            recovery_rssi,
            recovery_good_packets,
            status_request_interval_ms,
            primary_freq_mhz,
            secondary_freq_mhz,
            quality_thresholds,
            ..
        } = *config;

        let heartbeat_interval = Duration::from_millis(heartbeat_interval_ms);
        let status_request_interval = Duration::from_millis(status_request_interval_ms);
        PrimaryNode {
            inspector,
            mode: ModeMachine::new(
                Mode::Bridge,
                Duration::from_millis(transition_timeout_ms),
                Duration::from_millis(watchdog_timeout_ms),
            ),
            pending: PendingTracker::new(Duration::from_millis(ack_timeout_ms), max_retries),
            jamming: JammingDetector::new(quality_thresholds, jamming_count, recovery_rssi, recovery_good_packets),
            peers: PeerRelayTable::new(Duration::from_millis(peer_relay_timeout_ms)),
            link_quality: LinkQualitySample::new(),
            outbox: Outbox::new(),
            heartbeat_interval,
            next_heartbeat: now + heartbeat_interval,
            heartbeat_sequence: 0,
            awaiting_response: false,
            status_request_interval,
            next_status_request: now + status_request_interval,
            last_status: None,
            relay_link: RelayLinkState::default(),
            own_position: None,
            primary_freq_mhz,
            secondary_freq_mhz,
            counters: PrimaryCounters::default(),
        }
    }

    /// Announces the Primary to the Secondary with `INIT`
    pub fn start(&mut self, now: Instant) {
        let init = InitPayload::with(
            self.mode.operating_mode().as_str(),
            self.primary_freq_mhz,
            self.secondary_freq_mhz,
            now.as_millis() as u32,
        );
        log!(
            log::Level::Info,
            "[P] Starting in {} mode (F1 {} MHz, F2 {} MHz)",
            self.mode.operating_mode().as_str(),
            self.primary_freq_mhz,
            self.secondary_freq_mhz
        );
        self.outbox.push(Intent::SendSerial(LinkMessage::Init(init)));
    }

    /// Starts a mode transition
    ///
    /// Sends `RELAY_ACTIVATE` and waits for the Secondary's ACK; the current mode's
    /// forwarding rules stay in force until then.
    ///
    /// # Arguments
    /// * `target` - Mode to switch to
    /// * `reason` - Short cause recorded in the transition log
    /// * `now` - Current time, starting the transition timer
    pub fn request_mode(&mut self, target: Mode, reason: &'static str, now: Instant) -> Result<(), TransitionError> {
        let previous = self.mode.begin(target, now)?;
        let command = LinkMessage::RelayActivate {
            activate: target.relay_active(),
        };
        self.pending.cancel(CommandCode::RelayActivate);
        self.pending.track(command.clone(), now);
        self.outbox.push(Intent::SendSerial(command));
        self.log_transition(previous.as_str(), OperatingMode::Switching.as_str(), reason);
        log!(
            log::Level::Info,
            "[P] Switching {} -> {} ({})",
            previous.as_str(),
            target.as_str(),
            reason
        );
        Ok(())
    }

    /// Handles one decoded command from the Secondary
    pub fn process_link_message(&mut self, message: LinkMessage, now: Instant) {
        let code = message.code();
        if !code.direction().accepted_by(NodeRole::Primary) {
            self.counters.wrong_direction = self.counters.wrong_direction.wrapping_add(1);
            log!(log::Level::Warn, "[P] Dropping {} received in the wrong direction", code.name());
            return;
        }
        log::trace!("[P] Link message {}", code.name());

        match message {
            LinkMessage::Ack => self.process_ack(now),
            LinkMessage::BridgeRx(bridge) => self.process_mesh_frame(bridge, now),
            LinkMessage::RelayRx(radio) => self.process_relayed_frame(radio, now),
            LinkMessage::StatusReport(status) => {
                log::debug!(
                    "[P] Secondary status: relay_active={}, clients={}, relays known={}",
                    status.relay_active,
                    status.client_count,
                    status.relay_table_count
                );
                self.last_status = Some(status);
            }
            LinkMessage::RelaySelected(selected) => {
                log!(
                    log::Level::Info,
                    "[P] Secondary selected relay {} (score {})",
                    selected.relay_id,
                    selected.score
                );
                self.relay_link.selected = Some(selected);
            }
            LinkMessage::RelayEstablished { relay_id } => {
                log!(log::Level::Info, "[P] Relay {} established", relay_id);
                self.relay_link.established = Some(relay_id);
            }
            LinkMessage::RelayLost { relay_id, reason } => self.process_relay_lost(relay_id, reason),
            LinkMessage::Init(init) => {
                log!(log::Level::Info, "[P] Secondary reports mode {}", init.mode_name());
            }
            LinkMessage::StatusRequest => {
                log::debug!("[P] Ignoring status request from Secondary");
            }
            other => {
                log::debug!("[P] No handler for {}", other.code().name());
            }
        }
    }

    /// Handles one frame received from the GCS on F1
    ///
    /// # Arguments
    /// * `data` - The frame as received
    /// * `rssi` / `snr` - Reception metrics of the frame
    /// * `now` - Reception time
    pub fn process_gcs_frame(&mut self, data: &[u8], rssi: f32, snr: f32, now: Instant) {
        if self.awaiting_response {
            self.awaiting_response = false;
            self.link_quality.response_received();
        }
        self.link_quality.update_signal(rssi, snr);

        if self.mode.state() == ModeState::Stable(Mode::Relay) && self.jamming.record_gcs_packet(rssi) {
            if let Err(error) = self.request_mode(Mode::Direct, "gcs link restored", now) {
                log::debug!("[P] Recovery to DIRECT not started: {:?}", error);
            }
        }

        if data.first() == Some(&CONTROL_MAGIC) {
            self.counters.control_replies = self.counters.control_replies.wrapping_add(1);
            log::trace!("[P] Control reply from GCS");
            return;
        }

        if self.mode.effective() == Mode::Bridge {
            if data.len() > MAX_BRIDGE_DATA {
                self.count_oversized(data.len());
            } else if let Ok(bridge) = BridgeData::with(0, rssi, snr, data) {
                self.counters.gcs_to_mesh_packets = self.counters.gcs_to_mesh_packets.wrapping_add(1);
                self.counters.gcs_to_mesh_bytes = self.counters.gcs_to_mesh_bytes.wrapping_add(data.len() as u32);
                log::debug!("[P] GCS -> mesh {} bytes", data.len());
                self.outbox.push(Intent::SendSerial(LinkMessage::BridgeTx(bridge)));
            }
        }

        if let Ok(frame) = RadioFrame::from_slice(data) {
            self.outbox.push(Intent::DeliverLocal(frame));
        }
    }

    /// Routes a frame produced by the local flight controller
    pub fn process_vehicle_frame(&mut self, data: &[u8], _now: Instant) {
        if self.mode.effective() == Mode::Relay {
            if data.len() > MAX_RELAY_DATA {
                self.count_oversized(data.len());
                return;
            }
            if let Ok(radio) = RadioData::with(self.link_quality.rssi, self.link_quality.snr, data) {
                self.counters.via_relay_packets = self.counters.via_relay_packets.wrapping_add(1);
                self.outbox.push(Intent::SendSerial(LinkMessage::RelayTx(radio)));
            }
            return;
        }
        self.queue_for_gcs(data);
    }

    /// Replaces the current link sample with an externally measured one and
    /// evaluates it
    pub fn process_link_sample(&mut self, sample: LinkQualitySample, now: Instant) {
        self.link_quality = sample;
        self.evaluate_link(now);
    }

    pub fn update_own_position(&mut self, position: Position) {
        self.own_position = Some(position);
    }

    /// Runs every timer-driven task that is due
    ///
    /// # Tasks Processed
    /// 1. Transition timeout and watchdog
    /// 2. Pending-command retransmissions and give-ups
    /// 3. F1 heartbeat and link evaluation
    /// 4. Periodic `STATUS_REQUEST` in `Bridge` and `Relay`
    /// 5. Peer-relay slot aging
    pub fn process_timed_tasks(&mut self, now: Instant) {
        if let Some(event) = self.mode.poll(now) {
            self.apply_mode_event(event, now);
        }

        for event in self.pending.poll(now) {
            match event {
                PendingEvent::Resend(message) => self.outbox.push(Intent::SendSerial(message)),
                PendingEvent::GaveUp(code) => {
                    if code == CommandCode::RelayActivate {
                        if let Some(event) = self.mode.abort(RevertReason::RetriesExhausted) {
                            self.apply_mode_event(event, now);
                        }
                    }
                }
            }
        }

        if now >= self.next_heartbeat {
            self.send_heartbeat(now);
            self.next_heartbeat = if self.next_heartbeat + self.heartbeat_interval > now {
                self.next_heartbeat + self.heartbeat_interval
            } else {
                now + self.heartbeat_interval
            };
        }

        if now >= self.next_status_request {
            if matches!(self.mode.effective(), Mode::Bridge | Mode::Relay) {
                self.outbox.push(Intent::SendSerial(LinkMessage::StatusRequest));
            }
            self.next_status_request = now + self.status_request_interval;
        }

        self.peers.expire(now);
    }

    /// Next queued effect, in emission order
    pub fn next_intent(&mut self) -> Option<Intent> {
        self.outbox.pop()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode.operating_mode()
    }

    pub fn mode_state(&self) -> ModeState {
        self.mode.state()
    }

    pub fn link_quality(&self) -> &LinkQualitySample {
        &self.link_quality
    }

    pub fn last_status(&self) -> Option<&StatusReport> {
        self.last_status.as_ref()
    }

    pub fn relay_link(&self) -> &RelayLinkState {
        &self.relay_link
    }

    pub fn peers(&self) -> &PeerRelayTable {
        &self.peers
    }

    pub fn pending_commands(&self) -> usize {
        self.pending.len()
    }

    pub fn own_position(&self) -> Option<Position> {
        self.own_position
    }

    pub fn counters(&self) -> PrimaryCounters {
        PrimaryCounters {
            transition_failures: self.mode.transition_failures(),
            watchdog_reverts: self.mode.watchdog_reverts(),
            uart_timeouts: self.pending.uart_timeouts(),
            peer_slot_exhaustion: self.peers.exhaustion(),
            ..self.counters
        }
    }

    fn process_ack(&mut self, now: Instant) {
        let Some(entry) = self.pending.on_ack() else {
            log::debug!("[P] ACK with nothing pending");
            return;
        };
        if entry.message.code() != CommandCode::RelayActivate {
            return;
        }
        match self.mode.on_ack() {
            Some(event) => self.apply_mode_event(event, now),
            None => log::debug!("[P] Late RELAY_ACTIVATE ACK ignored"),
        }
    }

    fn apply_mode_event(&mut self, event: ModeEvent, now: Instant) {
        match event {
            ModeEvent::Committed { from, to } => {
                log!(log::Level::Info, "[P] Mode {} -> {} committed", from.as_str(), to.as_str());
                self.log_transition(OperatingMode::Switching.as_str(), to.as_str(), "acknowledged");
                self.jamming.reset();
                if from == Mode::Relay {
                    self.relay_link = RelayLinkState::default();
                }
                if to == Mode::Relay {
                    self.send_discovery_start();
                }
                self.next_status_request = now + self.status_request_interval;
            }
            ModeEvent::Reverted {
                abandoned,
                restored,
                reason,
            } => {
                self.pending.cancel(CommandCode::RelayActivate);
                log!(
                    log::Level::Warn,
                    "[P] Transition to {} failed ({}), back to {}",
                    abandoned.as_str(),
                    reason.as_str(),
                    restored.as_str()
                );
                self.log_transition(OperatingMode::Switching.as_str(), restored.as_str(), reason.as_str());
            }
        }
    }

    fn process_mesh_frame(&mut self, bridge: BridgeData, now: Instant) {
        self.link_quality.update_signal(bridge.rssi, bridge.snr);

        let system_id = match bridge.system_id {
            0 => self.inspector.extract_system_id(&bridge.data),
            id => Some(id),
        };
        if let Some(system_id) = system_id {
            self.peers.record_activity(system_id, now);
        }

        self.counters.mesh_to_gcs_packets = self.counters.mesh_to_gcs_packets.wrapping_add(1);
        self.counters.mesh_to_gcs_bytes = self.counters.mesh_to_gcs_bytes.wrapping_add(bridge.data.len() as u32);
        log::debug!("[P] Mesh -> GCS {} bytes from {:?}", bridge.data.len(), system_id);

        if self.mode.effective() == Mode::Relay {
            if let Ok(frame) = RadioFrame::from_slice(&bridge.data) {
                self.outbox.push(Intent::DeliverLocal(frame));
            }
        } else {
            self.queue_for_gcs(&bridge.data);
        }
    }

    fn process_relayed_frame(&mut self, radio: RadioData, now: Instant) {
        if let Some(system_id) = self.inspector.extract_system_id(&radio.data) {
            self.peers.record_activity(system_id, now);
        }
        self.counters.relayed_packets = self.counters.relayed_packets.wrapping_add(1);
        self.counters.relayed_bytes = self.counters.relayed_bytes.wrapping_add(radio.data.len() as u32);
        self.queue_for_gcs(&radio.data);
    }

    /// A rejected or unanswered request is handled by the Secondary's own
    /// reselection; only a connection that was up and dropped needs a new session.
    fn process_relay_lost(&mut self, relay_id: u8, reason: RelayLostReason) {
        log!(log::Level::Warn, "[P] Relay {} lost ({:?})", relay_id, reason);
        let was_connected = self.relay_link.established == Some(relay_id);
        if was_connected || self.relay_link.selected.map(|s| s.relay_id) == Some(relay_id) {
            self.relay_link = RelayLinkState::default();
        }
        if was_connected && reason != RelayLostReason::GcsRestored && self.mode.state() == ModeState::Stable(Mode::Relay) {
            self.send_discovery_start();
        }
    }

    fn queue_for_gcs(&mut self, data: &[u8]) {
        match RadioFrame::from_slice(data) {
            Ok(frame) => {
                let tier = self.inspector.priority_tier(data);
                self.outbox.push(Intent::SendGcs { frame, tier });
            }
            Err(_) => self.count_oversized(data.len()),
        }
    }

    fn send_heartbeat(&mut self, now: Instant) {
        self.link_quality.heartbeat_sent(!self.awaiting_response);
        self.awaiting_response = true;
        self.heartbeat_sequence = self.heartbeat_sequence.wrapping_add(1);

        let [seq_lo, seq_hi] = self.heartbeat_sequence.to_le_bytes();
        let bytes: [u8; HEARTBEAT_FRAME_SIZE] = [CONTROL_MAGIC, HEARTBEAT_TYPE, seq_lo, seq_hi, self.mode.operating_mode().wire_code()];
        if let Ok(frame) = RadioFrame::from_slice(&bytes) {
            self.outbox.push(Intent::SendGcs {
                frame,
                tier: PriorityTier::Telemetry,
            });
        }
        log::trace!("[P] Heartbeat {}", self.heartbeat_sequence);
        self.evaluate_link(now);
    }

    fn evaluate_link(&mut self, now: Instant) {
        if !self.jamming.evaluate(&self.link_quality) {
            return;
        }
        match self.mode.state() {
            ModeState::Stable(Mode::Direct) => {
                log!(log::Level::Warn, "[P] GCS link jammed in DIRECT, moving to RELAY");
                if let Err(error) = self.request_mode(Mode::Relay, "jamming", now) {
                    log::debug!("[P] RELAY transition not started: {:?}", error);
                }
            }
            ModeState::Stable(Mode::Bridge) => {
                let metrics = RelayRequestMetrics {
                    rssi: self.link_quality.rssi,
                    snr: self.link_quality.snr,
                    packet_loss: self.link_quality.loss_percent(),
                };
                log!(
                    log::Level::Warn,
                    "[P] GCS link jammed in BRIDGE (rssi {}, snr {}, loss {}%), requesting relay",
                    metrics.rssi,
                    metrics.snr,
                    metrics.packet_loss
                );
                self.outbox.push(Intent::SendSerial(LinkMessage::BroadcastRelayReq(metrics)));
            }
            _ => log::debug!("[P] Poor link while {}", self.mode.operating_mode().as_str()),
        }
    }

    fn send_discovery_start(&mut self) {
        let position = self.own_position.unwrap_or_default();
        let start = DiscoveryStart {
            own_lat: position.lat,
            own_lon: position.lon,
            own_alt: position.alt,
            gcs_rssi: self.link_quality.rssi,
            gcs_snr: self.link_quality.snr,
            gcs_loss: self.link_quality.loss_percent(),
        };
        log::debug!("[P] Starting relay discovery");
        self.outbox.push(Intent::SendSerial(LinkMessage::StartRelayDiscovery(start)));
    }

    fn count_oversized(&mut self, len: usize) {
        self.counters.oversized_drops = self.counters.oversized_drops.wrapping_add(1);
        log!(log::Level::Warn, "[P] Dropping {} byte frame, too large to forward", len);
    }

    fn log_transition(&mut self, from: &'static str, to: &'static str, reason: &'static str) {
        self.outbox.push(Intent::LogTransition {
            node: NodeRole::Primary,
            from,
            to,
            reason,
        });
    }
}
