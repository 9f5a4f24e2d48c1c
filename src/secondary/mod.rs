//! # Secondary Node - Mesh Side of the Vehicle
//!
//! The Secondary holds the mesh radio (F2) shared with other vehicles. It bridges
//! frames between the mesh and the Primary, and runs both halves of relaying:
//!
//! - as a **client**, it discovers and connects to a peer relay when the Primary asks
//!   for one (`discovery`, `selector`, `relay_table`)
//! - as a **relay**, it announces itself while its own GCS link is usable and accepts
//!   up to [`crate::MAX_CLIENTS`] clients (`connection_manager`)
//!
//! ## Mesh Ingress
//!
//! 1. Discovery packets are recognised by `(magic, length)` and consumed here
//! 2. The first vehicle frame above `own_id_rssi_threshold` fixes the own system id;
//!    frames carrying the own id are not bridged back
//! 3. Frames from rostered clients go to the Primary as `RELAY_RX`, everything else
//!    as `BRIDGE_RX`
//!
//! ## GCS Link View
//!
//! The Secondary has no GCS radio. It learns the GCS link figures from the Primary:
//! signal levels from every `BRIDGE_TX`, plus loss from `BROADCAST_RELAY_REQ` and
//! `START_RELAY_DISCOVERY`. Each `BRIDGE_TX` is a packet the GCS got through, so it
//! also decays the reported loss by [`GCS_LOSS_DECAY`]; `RELAY_ACTIVATE(false)`
//! clears it. Announcements and request handling use this view.

pub mod connection_manager;
pub mod discovery;
pub mod relay_table;
pub mod selector;

use embassy_time::{Duration, Instant};
use log::log;
use rand_core::{RngCore, SeedableRng};
use rand_wyrand::WyRand;

use crate::frame_inspector::FrameInspector;
use crate::intent::{Intent, Outbox};
use crate::link::{
    BridgeData, InitPayload, LinkMessage, NodeRole, RadioData, RelayLostReason, RelaySelected, StatusReport, MAX_BRIDGE_DATA,
    MAX_RELAY_DATA,
};
use crate::link_quality::LinkQualityThresholds;
use crate::messages::{Announcement, DiscoveryPacket, DiscoveryPacketError, RejectionReason, HEARTBEAT_FROM_RELAY};
use crate::position::Position;
use crate::radio::RadioFrame;
use crate::{RelayConfiguration, ScoringWeights};

use connection_manager::ConnectionManager;
use discovery::{DiscoveryAction, DiscoveryActions, RelayDiscovery};
use relay_table::{RelayEntry, RelayTable};
use selector::SelectionContext;

pub use discovery::DiscoveryState;
pub use selector::Selection;

/// Share of the reported GCS loss kept after each bridged GCS packet
pub const GCS_LOSS_DECAY: f32 = 0.875;

/// GCS link figures as last reported by the Primary
#[derive(Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct GcsLinkView {
    pub rssi: f32,
    pub snr: f32,
    pub loss_percent: f32,
    /// False until the Primary has reported anything
    pub known: bool,
}

/// Mesh transmit figures kept by the runtime, reported in `STATUS_REPORT`
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct TransportStats {
    pub mesh_tx_packets: u32,
    pub cad_deferrals: u32,
    pub tx_failures: u32,
    pub link_errors: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct SecondaryCounters {
    pub mesh_rx_packets: u32,
    pub discovery_packets: u32,
    pub bridged_to_primary: u32,
    pub relayed_to_primary: u32,
    pub mesh_egress_frames: u32,
    pub own_echo_drops: u32,
    pub oversized_drops: u32,
    pub acceptances_sent: u32,
    pub rejections_sent: u32,
    pub wrong_direction: u32,
    pub announcements_sent: u32,
}

pub struct SecondaryNode<I: FrameInspector> {
    inspector: I,
    own_id: Option<u8>,
    own_id_rssi_threshold: f32,
    own_position: Option<Position>,
    gcs: GcsLinkView,
    thresholds: LinkQualityThresholds,
    weights: ScoringWeights,

    table: RelayTable,
    /// Table revision the stored scores were computed for
    scored_revision: Option<u32>,
    stale_relay: Duration,
    clients: ConnectionManager,
    client_timeout: Duration,
    discovery: RelayDiscovery,
    relay_active: bool,
    primary_init: Option<InitPayload>,

    announcement_interval_ms: u64,
    announcement_jitter_ms: u64,
    next_announcement: Instant,
    heartbeat_interval: Duration,
    next_heartbeat: Instant,
    rng: WyRand,

    last_rssi: f32,
    last_snr: f32,
    transport: TransportStats,
    counters: SecondaryCounters,
    outbox: Outbox,
}

impl<I: FrameInspector> SecondaryNode<I> {
    /// Creates an idle Secondary
    ///
    /// # Arguments
    /// * `config` - Timings and thresholds; only the Secondary's fields are used
    /// * `inspector` - Parser for the vehicle message format carried in frames
    /// * `rng_seed` - Seed for announcement jitter
    /// * `now` - Current time
    pub fn new(config: &RelayConfiguration, inspector: I, rng_seed: u64, now: Instant) -> Self {
        let RelayConfiguration {
            announcement_interval_ms,
            announcement_jitter_ms,
            stale_relay_ms,
            relay_heartbeat_interval_ms,
            client_timeout_ms,
            own_id_rssi_threshold,
            quality_thresholds,
            scoring_weights,
            ..
        } = *config;

        let heartbeat_interval = Duration::from_millis(relay_heartbeat_interval_ms);
        SecondaryNode {
            inspector,
            own_id: None,
            own_id_rssi_threshold,
            own_position: None,
            gcs: GcsLinkView::default(),
            thresholds: quality_thresholds,
            weights: scoring_weights,
            table: RelayTable::new(),
            scored_revision: None,
            stale_relay: Duration::from_millis(stale_relay_ms),
            clients: ConnectionManager::new(),
            client_timeout: Duration::from_millis(client_timeout_ms),
            discovery: RelayDiscovery::new(config),
            relay_active: false,
            primary_init: None,
            announcement_interval_ms,
            announcement_jitter_ms,
            next_announcement: now + Duration::from_millis(announcement_interval_ms),
            heartbeat_interval,
            next_heartbeat: now + heartbeat_interval,
            rng: WyRand::seed_from_u64(rng_seed),
            last_rssi: 0.0,
            last_snr: 0.0,
            transport: TransportStats::default(),
            counters: SecondaryCounters::default(),
            outbox: Outbox::new(),
        }
    }

    /// Fixes the own system id instead of waiting for auto-detection
    pub fn set_own_system_id(&mut self, system_id: u8) {
        self.own_id = Some(system_id);
    }

    pub fn update_own_position(&mut self, position: Position) {
        self.own_position = Some(position);
        self.scored_revision = None;
    }

    /// Handles one frame received on the mesh radio
    pub fn process_mesh_frame(&mut self, data: &[u8], rssi: f32, snr: f32, now: Instant) {
        self.counters.mesh_rx_packets = self.counters.mesh_rx_packets.wrapping_add(1);
        self.last_rssi = rssi;
        self.last_snr = snr;

        match DiscoveryPacket::parse(data) {
            Ok(packet) => {
                self.counters.discovery_packets = self.counters.discovery_packets.wrapping_add(1);
                self.process_discovery_packet(packet, rssi, snr, now);
                return;
            }
            Err(DiscoveryPacketError::InvalidReason(code)) => {
                log!(log::Level::Warn, "[S] Dropping rejection with unknown reason {}", code);
                return;
            }
            Err(DiscoveryPacketError::NotDiscovery) => {}
        }

        let system_id = self.inspector.extract_system_id(data);
        if self.own_id.is_none() && rssi > self.own_id_rssi_threshold {
            if let Some(id) = system_id {
                log!(log::Level::Info, "[S] Own system id detected: {} (rssi {})", id, rssi);
                self.own_id = Some(id);
            }
        }
        if system_id.is_some() && system_id == self.own_id {
            self.counters.own_echo_drops = self.counters.own_echo_drops.wrapping_add(1);
            log::trace!("[S] Dropping own frame heard on the mesh");
            return;
        }

        match system_id {
            Some(id) if self.clients.touch(id, now) => {
                if data.len() > MAX_RELAY_DATA {
                    self.count_oversized(data.len());
                    return;
                }
                if let Ok(radio) = RadioData::with(rssi, snr, data) {
                    self.counters.relayed_to_primary = self.counters.relayed_to_primary.wrapping_add(1);
                    log::debug!("[S:{}] Client {} -> Primary {} bytes", self.id_label(), id, data.len());
                    self.outbox.push(Intent::SendSerial(LinkMessage::RelayRx(radio)));
                }
            }
            _ => {
                if data.len() > MAX_BRIDGE_DATA {
                    self.count_oversized(data.len());
                    return;
                }
                if let Ok(bridge) = BridgeData::with(system_id.unwrap_or(0), rssi, snr, data) {
                    self.counters.bridged_to_primary = self.counters.bridged_to_primary.wrapping_add(1);
                    log::debug!("[S:{}] Mesh -> Primary {} bytes from {:?}", self.id_label(), data.len(), system_id);
                    self.outbox.push(Intent::SendSerial(LinkMessage::BridgeRx(bridge)));
                }
            }
        }
    }

    /// Handles one decoded command from the Primary
    pub fn process_link_message(&mut self, message: LinkMessage, now: Instant) {
        let code = message.code();
        if !code.direction().accepted_by(NodeRole::Secondary) {
            self.counters.wrong_direction = self.counters.wrong_direction.wrapping_add(1);
            log!(log::Level::Warn, "[S] Dropping {} received in the wrong direction", code.name());
            return;
        }
        log::trace!("[S] Link message {}", code.name());

        match message {
            LinkMessage::Init(init) => {
                log!(
                    log::Level::Info,
                    "[S] Primary up in {} mode (F1 {} MHz, F2 {} MHz)",
                    init.mode_name(),
                    init.primary_freq,
                    init.secondary_freq
                );
                self.primary_init = Some(init);
            }
            LinkMessage::RelayActivate { activate } => {
                self.outbox.push(Intent::SendSerial(LinkMessage::Ack));
                self.relay_active = activate;
                log!(log::Level::Info, "[S] Relay mode {}", if activate { "on" } else { "off" });
                if !activate {
                    self.gcs.loss_percent = 0.0;
                    if let Some(action) = self.discovery.teardown(RelayLostReason::GcsRestored) {
                        self.apply_discovery_action(action);
                    }
                }
            }
            LinkMessage::BridgeTx(bridge) => {
                self.gcs.rssi = bridge.rssi;
                self.gcs.snr = bridge.snr;
                self.gcs.loss_percent *= GCS_LOSS_DECAY;
                self.gcs.known = true;
                self.send_mesh(&bridge.data);
            }
            LinkMessage::RelayTx(radio) => {
                if self.discovery.connected_relay().is_none() {
                    log::debug!("[S] RELAY_TX without a connected relay, sending anyway");
                }
                self.send_mesh(&radio.data);
            }
            LinkMessage::StatusRequest => {
                let status = self.status_report();
                self.outbox.push(Intent::SendSerial(LinkMessage::StatusReport(status)));
            }
            LinkMessage::BroadcastRelayReq(metrics) => {
                self.gcs = GcsLinkView {
                    rssi: metrics.rssi,
                    snr: metrics.snr,
                    loss_percent: metrics.packet_loss,
                    known: true,
                };
                self.start_discovery(now);
            }
            LinkMessage::StartRelayDiscovery(start) => {
                self.gcs = GcsLinkView {
                    rssi: start.gcs_rssi,
                    snr: start.gcs_snr,
                    loss_percent: start.gcs_loss,
                    known: true,
                };
                self.update_own_position(Position::new(start.own_lat, start.own_lon, start.own_alt));
                self.start_discovery(now);
            }
            LinkMessage::Ack => log::debug!("[S] Unexpected ACK"),
            LinkMessage::StatusReport(_) => log::debug!("[S] Ignoring status report from Primary"),
            other => log::debug!("[S] No handler for {}", other.code().name()),
        }
    }

    /// Runs every timer-driven task that is due
    ///
    /// # Tasks Processed
    /// 1. Relay announcement (jittered)
    /// 2. Mesh heartbeats to clients and to the connected relay
    /// 3. Client expiry
    /// 4. Stale relay-table eviction
    /// 5. Discovery retries and timeouts
    pub fn process_timed_tasks(&mut self, now: Instant) {
        if now >= self.next_announcement {
            self.announce();
            let jitter = if self.announcement_jitter_ms == 0 {
                0
            } else {
                self.rng.next_u64() % (self.announcement_jitter_ms + 1)
            };
            self.next_announcement = now + Duration::from_millis(self.announcement_interval_ms + jitter);
        }

        if now >= self.next_heartbeat {
            self.send_heartbeats();
            self.next_heartbeat = now + self.heartbeat_interval;
        }

        for client in self.clients.expire(now, self.client_timeout) {
            log!(log::Level::Warn, "[S] Client {} timed out", client);
            self.outbox.push(Intent::SendSerial(LinkMessage::RelayLost {
                relay_id: client,
                reason: RelayLostReason::HeartbeatTimeout,
            }));
        }

        self.table.evict_stale(now, self.stale_relay);
        if self.scored_revision != Some(self.table.revision()) {
            self.refresh_scores();
        }

        let actions = {
            let context = SelectionContext {
                table: &self.table,
                own_id: self.own_id,
                own_position: self.own_position,
                weights: &self.weights,
            };
            self.discovery.poll(&context, now)
        };
        self.apply_discovery_actions(actions);
    }

    /// Updates the transmit figures reported in `STATUS_REPORT`
    pub fn set_transport_stats(&mut self, stats: TransportStats) {
        self.transport = stats;
    }

    pub fn status_report(&self) -> StatusReport {
        StatusReport {
            relay_active: self.relay_active,
            discovery_state: self.discovery.state().code(),
            own_system_id: self.own_id.unwrap_or(0),
            connected_relay: self.discovery.connected_relay().unwrap_or(0),
            client_count: self.clients.size() as u8,
            relay_table_count: self.table.len() as u8,
            mesh_rx_packets: self.counters.mesh_rx_packets,
            mesh_tx_packets: self.transport.mesh_tx_packets,
            cad_deferrals: self.transport.cad_deferrals,
            tx_failures: self.transport.tx_failures,
            link_errors: self.transport.link_errors,
            last_rssi: self.last_rssi,
            last_snr: self.last_snr,
        }
    }

    /// Next queued effect, in emission order
    pub fn next_intent(&mut self) -> Option<Intent> {
        self.outbox.pop()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn own_system_id(&self) -> Option<u8> {
        self.own_id
    }

    pub fn gcs_link(&self) -> &GcsLinkView {
        &self.gcs
    }

    pub fn relay_table(&self) -> &RelayTable {
        &self.table
    }

    pub fn clients(&self) -> &ConnectionManager {
        &self.clients
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery.state()
    }

    pub fn relay_active(&self) -> bool {
        self.relay_active
    }

    pub fn primary_init(&self) -> Option<&InitPayload> {
        self.primary_init.as_ref()
    }

    pub fn counters(&self) -> SecondaryCounters {
        self.counters
    }

    /// Whether this node's GCS link can carry traffic for clients
    pub fn gcs_usable(&self) -> bool {
        self.gcs.known && self.thresholds.gcs_usable(self.gcs.rssi, self.gcs.loss_percent)
    }

    /// Recomputes the stored score of every relay-table entry
    pub fn refresh_scores(&mut self) {
        let own_position = self.own_position;
        let weights = self.weights;
        self.table
            .refresh_scores(|entry| selector::score_entry(entry, own_position, &weights));
        self.scored_revision = Some(self.table.revision());
    }

    fn process_discovery_packet(&mut self, packet: DiscoveryPacket, rssi: f32, snr: f32, now: Instant) {
        log::trace!("[S] Discovery {} (rssi {})", packet.name(), rssi);
        match packet {
            DiscoveryPacket::Announcement(announcement) => {
                if Some(announcement.system_id) == self.own_id {
                    return;
                }
                self.table
                    .upsert(RelayEntry::from_announcement(&announcement, rssi, snr, now));
                if self.discovery.connected_relay() == Some(announcement.system_id) {
                    self.discovery.on_relay_heartbeat(announcement.system_id, now);
                }
            }
            DiscoveryPacket::Request {
                client_id,
                target_relay_id,
                sequence,
            } => {
                if self.own_id == Some(target_relay_id) {
                    self.process_relay_request(client_id, sequence, now);
                }
            }
            DiscoveryPacket::Acceptance {
                relay_id,
                client_id,
                sequence,
            } => {
                if self.own_id == Some(client_id) {
                    let actions = self.discovery.on_acceptance(relay_id, sequence, now);
                    self.apply_discovery_actions(actions);
                }
            }
            DiscoveryPacket::Rejection {
                relay_id,
                client_id,
                sequence,
                reason,
            } => {
                if self.own_id != Some(client_id) {
                    return;
                }
                log::debug!("[S] Rejected by {}: {:?}", relay_id, reason);
                let actions = {
                    let context = SelectionContext {
                        table: &self.table,
                        own_id: self.own_id,
                        own_position: self.own_position,
                        weights: &self.weights,
                    };
                    self.discovery.on_rejection(relay_id, sequence, &context, now)
                };
                self.apply_discovery_actions(actions);
            }
            DiscoveryPacket::Heartbeat { sender_id, peer_id, flags } => {
                if self.own_id != Some(peer_id) {
                    return;
                }
                if flags & HEARTBEAT_FROM_RELAY != 0 {
                    self.discovery.on_relay_heartbeat(sender_id, now);
                } else {
                    self.clients.touch(sender_id, now);
                }
            }
        }
    }

    fn process_relay_request(&mut self, client_id: u8, sequence: u16, now: Instant) {
        let Some(own_id) = self.own_id else {
            return;
        };

        let rejection = if self.clients.contains(client_id) {
            self.clients.touch(client_id, now);
            None
        } else if !self.clients.has_capacity() {
            Some(RejectionReason::CapacityFull)
        } else if !self.gcs_usable() {
            Some(RejectionReason::LinkQuality)
        } else if self.discovery.is_active() || client_id == own_id {
            Some(RejectionReason::Policy)
        } else if self.clients.add(client_id, now) {
            None
        } else {
            Some(RejectionReason::CapacityFull)
        };

        let reply = match rejection {
            None => {
                self.counters.acceptances_sent = self.counters.acceptances_sent.wrapping_add(1);
                log!(
                    log::Level::Info,
                    "[S:{}] Accepted client {} ({}/{})",
                    own_id,
                    client_id,
                    self.clients.size(),
                    crate::MAX_CLIENTS
                );
                DiscoveryPacket::Acceptance {
                    relay_id: own_id,
                    client_id,
                    sequence,
                }
            }
            Some(reason) => {
                self.counters.rejections_sent = self.counters.rejections_sent.wrapping_add(1);
                log!(log::Level::Info, "[S:{}] Rejecting client {}: {:?}", own_id, client_id, reason);
                DiscoveryPacket::Rejection {
                    relay_id: own_id,
                    client_id,
                    sequence,
                    reason,
                }
            }
        };
        self.outbox.push(Intent::SendMesh(reply.encode()));
    }

    fn start_discovery(&mut self, now: Instant) {
        if self.own_id.is_none() {
            log!(log::Level::Warn, "[S] Cannot discover relays before the own system id is known");
            self.apply_discovery_action(DiscoveryAction::GaveUp);
            return;
        }
        let actions = {
            let context = SelectionContext {
                table: &self.table,
                own_id: self.own_id,
                own_position: self.own_position,
                weights: &self.weights,
            };
            self.discovery.start(&context, now)
        };
        self.apply_discovery_actions(actions);
    }

    fn apply_discovery_actions(&mut self, actions: DiscoveryActions) {
        for action in actions {
            self.apply_discovery_action(action);
        }
    }

    fn apply_discovery_action(&mut self, action: DiscoveryAction) {
        let message = match action {
            DiscoveryAction::Selected(selection) => LinkMessage::RelaySelected(RelaySelected {
                relay_id: selection.relay_id,
                rssi: selection.rssi,
                snr: selection.snr,
                score: selection.score,
            }),
            DiscoveryAction::SendRequest { target, sequence } => {
                let Some(client_id) = self.own_id else {
                    return;
                };
                let request = DiscoveryPacket::Request {
                    client_id,
                    target_relay_id: target,
                    sequence,
                };
                self.outbox.push(Intent::SendMesh(request.encode()));
                return;
            }
            DiscoveryAction::Established { relay_id } => LinkMessage::RelayEstablished { relay_id },
            DiscoveryAction::Lost { relay_id, reason } => LinkMessage::RelayLost { relay_id, reason },
            DiscoveryAction::GaveUp => LinkMessage::RelayLost {
                relay_id: 0,
                reason: RelayLostReason::LinkQuality,
            },
        };
        self.outbox.push(Intent::SendSerial(message));
    }

    fn announce(&mut self) {
        let Some(system_id) = self.own_id else {
            return;
        };
        if !self.gcs_usable() {
            return;
        }
        let announcement = Announcement {
            system_id,
            available: self.clients.has_capacity() && !self.discovery.is_active(),
            gcs_rssi: self.gcs.rssi as i16,
            gcs_snr: self.gcs.snr as i8,
            gcs_loss: self.gcs.loss_percent.max(0.0).min(100.0) as u8,
            position: self.own_position.unwrap_or_default(),
        };
        self.counters.announcements_sent = self.counters.announcements_sent.wrapping_add(1);
        log::trace!("[S:{}] Announcing (available: {})", system_id, announcement.available);
        self.outbox
            .push(Intent::SendMesh(DiscoveryPacket::Announcement(announcement).encode()));
    }

    fn send_heartbeats(&mut self) {
        let Some(sender_id) = self.own_id else {
            return;
        };
        let mut peers: heapless::Vec<(u8, u8), { crate::MAX_CLIENTS + 1 }> = heapless::Vec::new();
        for client in self.clients.iter() {
            let _ = peers.push((client.system_id, HEARTBEAT_FROM_RELAY));
        }
        if let Some(relay_id) = self.discovery.connected_relay() {
            let _ = peers.push((relay_id, 0));
        }
        for (peer_id, flags) in peers {
            let heartbeat = DiscoveryPacket::Heartbeat {
                sender_id,
                peer_id,
                flags,
            };
            self.outbox.push(Intent::SendMesh(heartbeat.encode()));
        }
    }

    fn send_mesh(&mut self, data: &[u8]) {
        match RadioFrame::from_slice(data) {
            Ok(frame) => {
                self.counters.mesh_egress_frames = self.counters.mesh_egress_frames.wrapping_add(1);
                self.outbox.push(Intent::SendMesh(frame));
            }
            Err(_) => self.count_oversized(data.len()),
        }
    }

    fn count_oversized(&mut self, len: usize) {
        self.counters.oversized_drops = self.counters.oversized_drops.wrapping_add(1);
        log!(log::Level::Warn, "[S] Dropping {} byte frame, too large to forward", len);
    }

    fn id_label(&self) -> u8 {
        self.own_id.unwrap_or(0)
    }
}
