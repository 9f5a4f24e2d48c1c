//! End-to-end behaviour of the Primary/Secondary pair over a simulated serial link
//! and simulated radios.

use futures::executor::block_on;

use uav_dual_relay::link::{BridgeData, DiscoveryStart, LinkCodec, LinkMessage, RelayLostReason, RelaySelected};
use uav_dual_relay::messages::{Announcement, DiscoveryPacket, RejectionReason};
use uav_dual_relay::radio_devices::SimulatedRadio;
use uav_dual_relay::serial::SerialLink;
use uav_dual_relay::secondary::DiscoveryState;
use uav_dual_relay::{
    Intent, LinkQualitySample, ManualClock, MavlinkInspector, Mode, OperatingMode, Position, PrimaryNode,
    PrimaryRuntime, RelayConfiguration, SecondaryNode, SecondaryRuntime, SerialPort,
};

use embassy_time::Instant;

fn at(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

fn mavlink_v2(system_id: u8, payload_len: u8) -> Vec<u8> {
    let mut frame = vec![0xFD, payload_len, 0, 0, 0, system_id, 1, 0, 0, 0];
    frame.extend(std::iter::repeat(0x33).take(payload_len as usize));
    frame.extend_from_slice(&[0x12, 0x34]);
    frame
}

/// Traffic seen while passing serial messages between a Primary and a Secondary
#[derive(Default)]
struct Exchange {
    to_secondary: Vec<LinkMessage>,
    to_primary: Vec<LinkMessage>,
    mesh: Vec<DiscoveryPacket>,
}

impl Exchange {
    fn discovery_starts(&self) -> usize {
        self.to_secondary
            .iter()
            .filter(|m| matches!(m, LinkMessage::StartRelayDiscovery(_)))
            .count()
    }

    fn requested(&self) -> Vec<u8> {
        self.mesh
            .iter()
            .filter_map(|packet| match packet {
                DiscoveryPacket::Request { target_relay_id, .. } => Some(*target_relay_id),
                _ => None,
            })
            .collect()
    }
}

/// Delivers queued serial messages both ways until neither node has more to say
fn exchange(
    primary: &mut PrimaryNode<MavlinkInspector>,
    secondary: &mut SecondaryNode<MavlinkInspector>,
    now: Instant,
) -> Exchange {
    let mut seen = Exchange::default();
    loop {
        let mut delivered = false;
        while let Some(intent) = primary.next_intent() {
            if let Intent::SendSerial(message) = intent {
                seen.to_secondary.push(message.clone());
                secondary.process_link_message(message, now);
                delivered = true;
            }
        }
        while let Some(intent) = secondary.next_intent() {
            match intent {
                Intent::SendSerial(message) => {
                    seen.to_primary.push(message.clone());
                    primary.process_link_message(message, now);
                    delivered = true;
                }
                Intent::SendMesh(frame) => {
                    if let Ok(packet) = DiscoveryPacket::parse(&frame) {
                        seen.mesh.push(packet);
                    }
                }
                _ => {}
            }
        }
        if !delivered {
            return seen;
        }
    }
}

fn announcement(system_id: u8) -> Vec<u8> {
    DiscoveryPacket::Announcement(Announcement {
        system_id,
        available: true,
        gcs_rssi: -60,
        gcs_snr: 8,
        gcs_loss: 2,
        position: Position::default(),
    })
    .encode()
    .to_vec()
}

/// A Primary switched to `Relay` and its Secondary (system id 5) hearing `relays`
fn pair_in_relay(
    relays: &[(u8, f32)],
) -> (PrimaryNode<MavlinkInspector>, SecondaryNode<MavlinkInspector>, Exchange) {
    let config = RelayConfiguration::default();
    let mut primary = PrimaryNode::new(&config, MavlinkInspector::new(), at(0));
    let mut secondary = SecondaryNode::new(&config, MavlinkInspector::new(), 3, at(0));
    secondary.set_own_system_id(5);
    for &(relay_id, rssi) in relays {
        secondary.process_mesh_frame(&announcement(relay_id), rssi, 6.0, at(0));
    }
    primary.request_mode(Mode::Relay, "jamming", at(0)).unwrap();
    let seen = exchange(&mut primary, &mut secondary, at(0));
    assert_eq!(primary.mode(), OperatingMode::Relay);
    assert_eq!(seen.discovery_starts(), 1);
    (primary, secondary, seen)
}

fn rejection(relay_id: u8, sequence: u16) -> Vec<u8> {
    DiscoveryPacket::Rejection {
        relay_id,
        client_id: 5,
        sequence,
        reason: RejectionReason::CapacityFull,
    }
    .encode()
    .to_vec()
}

fn serial_messages(intents: &[Intent]) -> Vec<LinkMessage> {
    intents
        .iter()
        .filter_map(|intent| match intent {
            Intent::SendSerial(message) => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn gcs_frame_is_bridged_onto_the_mesh() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = RelayConfiguration::default();
    let link = SerialLink::new();
    let clock = ManualClock::new(0);
    let (gcs_radio, gcs) = SimulatedRadio::new();
    let gcs_irq = gcs_radio.irq_flags();
    let (mesh_radio, mesh) = SimulatedRadio::new();
    let mesh_irq = mesh_radio.irq_flags();

    let mut primary = PrimaryRuntime::new(
        &config,
        MavlinkInspector::new(),
        gcs_radio,
        &gcs_irq,
        link.primary_end(),
        &clock,
        11,
    );
    let mut secondary = SecondaryRuntime::new(
        &config,
        MavlinkInspector::new(),
        mesh_radio,
        &mesh_irq,
        link.secondary_end(),
        &clock,
        22,
    );

    gcs.inject(&[0x42; 40], -65.0, 7.0);
    block_on(primary.run_once());
    block_on(secondary.run_once());

    assert_eq!(mesh.transmitted(), vec![vec![0x42; 40]]);
    let counters = primary.node().counters();
    assert_eq!(counters.gcs_to_mesh_packets, 1);
    assert_eq!(counters.gcs_to_mesh_bytes, 40);
    assert!(secondary.node().primary_init().is_some());
    assert_eq!(primary.take_local_frame().map(|f| f.len()), Some(40));
}

#[test]
fn mesh_frame_reaches_the_gcs_radio() {
    let config = RelayConfiguration::default();
    let link = SerialLink::new();
    let clock = ManualClock::new(0);
    let (gcs_radio, gcs) = SimulatedRadio::new();
    let gcs_irq = gcs_radio.irq_flags();
    let (mesh_radio, mesh) = SimulatedRadio::new();
    let mesh_irq = mesh_radio.irq_flags();

    let mut primary = PrimaryRuntime::new(
        &config,
        MavlinkInspector::new(),
        gcs_radio,
        &gcs_irq,
        link.primary_end(),
        &clock,
        11,
    );
    let mut secondary = SecondaryRuntime::new(
        &config,
        MavlinkInspector::new(),
        mesh_radio,
        &mesh_irq,
        link.secondary_end(),
        &clock,
        22,
    );

    let frame = mavlink_v2(1, 48);
    assert_eq!(frame.len(), 60);
    mesh.inject(&frame, -70.0, 8.0);
    block_on(secondary.run_once());
    block_on(primary.run_once());

    let node = primary.node();
    assert_eq!(node.link_quality().rssi, -70.0);
    assert_eq!(node.counters().mesh_to_gcs_packets, 1);
    assert!(node.peers().find(1).is_some());
    assert_eq!(gcs.transmitted(), vec![frame]);
}

#[test]
fn reverse_bridge_reports_system_id_and_metrics() {
    let mut secondary = SecondaryNode::new(&RelayConfiguration::default(), MavlinkInspector::new(), 3, at(0));
    secondary.process_mesh_frame(&mavlink_v2(1, 48), -70.0, 8.0, at(0));
    match secondary.next_intent() {
        Some(Intent::SendSerial(LinkMessage::BridgeRx(bridge))) => {
            assert_eq!(bridge.system_id, 1);
            assert_eq!(bridge.rssi, -70.0);
            assert_eq!(bridge.snr, 8.0);
            assert_eq!(bridge.data_len(), 60);
        }
        other => panic!("expected BRIDGE_RX, got {:?}", other),
    }
}

#[test]
fn jammed_bridge_requests_a_relay_once() {
    let mut primary = PrimaryNode::new(&RelayConfiguration::default(), MavlinkInspector::new(), at(0));
    for i in 0..5 {
        primary.process_link_sample(LinkQualitySample::with_figures(-110.0, 2.0, 20, 10, 0), at(i * 1_000));
    }
    let intents: Vec<Intent> = std::iter::from_fn(|| primary.next_intent()).collect();
    let requests: Vec<LinkMessage> = serial_messages(&intents)
        .into_iter()
        .filter(|m| matches!(m, LinkMessage::BroadcastRelayReq(_)))
        .collect();
    assert_eq!(requests.len(), 1);
    match &requests[0] {
        LinkMessage::BroadcastRelayReq(metrics) => {
            assert_eq!(metrics.rssi, -110.0);
            assert_eq!(metrics.snr, 2.0);
            assert_eq!(metrics.packet_loss, 50.0);
        }
        _ => unreachable!(),
    }
    assert_eq!(primary.mode(), OperatingMode::Bridge);
}

#[test]
fn unacknowledged_relay_activation_reverts() {
    let mut primary = PrimaryNode::new(&RelayConfiguration::default(), MavlinkInspector::new(), at(0));
    primary.request_mode(Mode::Direct, "operator", at(0)).unwrap();
    primary.process_link_message(LinkMessage::Ack, at(50));
    assert_eq!(primary.mode(), OperatingMode::Direct);

    primary.request_mode(Mode::Relay, "jamming", at(100)).unwrap();
    assert_eq!(primary.mode(), OperatingMode::Switching);
    primary.process_timed_tasks(at(1_099));
    assert_eq!(primary.mode(), OperatingMode::Switching);
    primary.process_timed_tasks(at(1_100));
    assert_eq!(primary.mode(), OperatingMode::Direct);
    assert_eq!(primary.counters().transition_failures, 1);
}

#[test]
fn discovery_prefers_the_closer_mesh_neighbour() {
    let mut secondary = SecondaryNode::new(&RelayConfiguration::default(), MavlinkInspector::new(), 3, at(0));
    secondary.set_own_system_id(2);

    let near = Announcement {
        system_id: 7,
        available: true,
        gcs_rssi: -60,
        gcs_snr: 8,
        gcs_loss: 2,
        position: Position::new(0, 0, 0),
    };
    let far = Announcement {
        system_id: 9,
        gcs_rssi: -55,
        gcs_loss: 1,
        position: Position::from_degrees(0.5, 0.5, 0),
        ..near
    };
    secondary.process_mesh_frame(&DiscoveryPacket::Announcement(near).encode(), -80.0, 6.0, at(0));
    secondary.process_mesh_frame(&DiscoveryPacket::Announcement(far).encode(), -95.0, 6.0, at(10));
    assert_eq!(secondary.relay_table().len(), 2);

    secondary.process_link_message(
        LinkMessage::StartRelayDiscovery(DiscoveryStart {
            own_lat: 0,
            own_lon: 0,
            own_alt: 0,
            gcs_rssi: -110.0,
            gcs_snr: 2.0,
            gcs_loss: 50.0,
        }),
        at(20),
    );
    assert!(matches!(
        secondary.next_intent(),
        Some(Intent::SendSerial(LinkMessage::RelaySelected(RelaySelected { relay_id: 7, .. })))
    ));
}

#[test]
fn full_relay_rejects_further_clients() {
    let config = RelayConfiguration::default();
    let link = SerialLink::new();
    let clock = ManualClock::new(0);
    let (mesh_radio, mesh) = SimulatedRadio::new();
    let mesh_irq = mesh_radio.irq_flags();
    let mut secondary = SecondaryRuntime::new(
        &config,
        MavlinkInspector::new(),
        mesh_radio,
        &mesh_irq,
        link.secondary_end(),
        &clock,
        22,
    );
    secondary.node_mut().set_own_system_id(5);

    let mut codec = LinkCodec::new();
    let bridge = BridgeData::with(0, -60.0, 9.0, &[0x01, 0x02]).unwrap();
    let frame = codec.encode_message(&LinkMessage::BridgeTx(bridge)).unwrap();
    link.primary_end().write_all(&frame).unwrap();
    block_on(secondary.run_once());
    mesh.take_transmitted();

    for (sequence, client_id) in [11u8, 12, 13].into_iter().enumerate() {
        let request = DiscoveryPacket::Request {
            client_id,
            target_relay_id: 5,
            sequence: sequence as u16,
        };
        mesh.inject(&request.encode(), -75.0, 7.0);
    }
    block_on(secondary.run_once());
    assert_eq!(secondary.node().clients().size(), 3);
    mesh.take_transmitted();

    let request = DiscoveryPacket::Request {
        client_id: 42,
        target_relay_id: 5,
        sequence: 9,
    };
    mesh.inject(&request.encode(), -75.0, 7.0);
    block_on(secondary.run_once());

    let replies: Vec<DiscoveryPacket> = mesh
        .take_transmitted()
        .iter()
        .filter_map(|frame| DiscoveryPacket::parse(frame).ok())
        .collect();
    assert_eq!(
        replies,
        vec![DiscoveryPacket::Rejection {
            relay_id: 5,
            client_id: 42,
            sequence: 9,
            reason: RejectionReason::CapacityFull,
        }]
    );
    assert_eq!(secondary.node().clients().size(), 3);
}

#[test]
fn rejected_relay_is_not_requested_again() {
    let (mut primary, mut secondary, seen) = pair_in_relay(&[(8, -80.0), (9, -95.0)]);
    assert_eq!(seen.requested(), vec![8]);
    assert_eq!(primary.relay_link().selected.map(|s| s.relay_id), Some(8));

    secondary.process_mesh_frame(&rejection(8, 0), -80.0, 6.0, at(30));
    let seen = exchange(&mut primary, &mut secondary, at(30));
    assert!(seen.to_primary.contains(&LinkMessage::RelayLost {
        relay_id: 8,
        reason: RelayLostReason::Rejection
    }));
    assert_eq!(seen.requested(), vec![9]);
    assert_eq!(seen.discovery_starts(), 0);
    assert_eq!(primary.relay_link().selected.map(|s| s.relay_id), Some(9));

    secondary.process_mesh_frame(&rejection(9, 1), -95.0, 6.0, at(60));
    let seen = exchange(&mut primary, &mut secondary, at(60));
    assert!(seen.requested().is_empty());
    assert_eq!(seen.discovery_starts(), 0);
    assert!(matches!(secondary.discovery_state(), DiscoveryState::Discovering { .. }));
}

#[test]
fn fruitless_discovery_reports_link_quality_loss() {
    let config = RelayConfiguration::default();
    let (mut primary, mut secondary, seen) = pair_in_relay(&[]);
    assert!(seen.requested().is_empty());

    let mut to_primary = Vec::new();
    let mut restarts = 0;
    for round in 1..config.max_discovery_attempts as u64 {
        let now = at(round * config.discovery_retry_ms);
        secondary.process_timed_tasks(now);
        let seen = exchange(&mut primary, &mut secondary, now);
        restarts += seen.discovery_starts();
        to_primary.extend(seen.to_primary);
    }

    assert!(to_primary.contains(&LinkMessage::RelayLost {
        relay_id: 0,
        reason: RelayLostReason::LinkQuality
    }));
    assert_eq!(restarts, 0);
    assert_eq!(secondary.discovery_state(), DiscoveryState::Idle);
    assert_eq!(primary.mode(), OperatingMode::Relay);
    assert_eq!(primary.relay_link().selected, None);
}

#[test]
fn silent_client_is_reported_to_the_primary() {
    let config = RelayConfiguration::default();
    let link = SerialLink::new();
    let clock = ManualClock::new(0);
    let (mesh_radio, mesh) = SimulatedRadio::new();
    let mesh_irq = mesh_radio.irq_flags();
    let mut secondary = SecondaryRuntime::new(
        &config,
        MavlinkInspector::new(),
        mesh_radio,
        &mesh_irq,
        link.secondary_end(),
        &clock,
        22,
    );
    secondary.node_mut().set_own_system_id(5);

    let mut codec = LinkCodec::new();
    let bridge = BridgeData::with(0, -60.0, 9.0, &[0x01, 0x02]).unwrap();
    let frame = codec.encode_message(&LinkMessage::BridgeTx(bridge)).unwrap();
    link.primary_end().write_all(&frame).unwrap();
    block_on(secondary.run_once());

    let request = DiscoveryPacket::Request {
        client_id: 42,
        target_relay_id: 5,
        sequence: 1,
    };
    mesh.inject(&request.encode(), -75.0, 7.0);
    block_on(secondary.run_once());
    assert!(secondary.node().clients().contains(42));

    clock.set_ms(config.client_timeout_ms);
    block_on(secondary.run_once());

    let mut primary_end = link.primary_end();
    let mut decoder = LinkCodec::new();
    let mut received = Vec::new();
    while let Some(byte) = primary_end.read_byte() {
        if let Some(message) = decoder.feed_message(byte, at(0)) {
            received.push(message);
        }
    }
    assert!(received.contains(&LinkMessage::RelayLost {
        relay_id: 42,
        reason: RelayLostReason::HeartbeatTimeout
    }));
    assert_eq!(secondary.node().clients().size(), 0);
}

#[test]
fn strong_gcs_traffic_returns_the_pair_to_direct() {
    let (mut primary, mut secondary, _) = pair_in_relay(&[(8, -80.0)]);
    let acceptance = DiscoveryPacket::Acceptance {
        relay_id: 8,
        client_id: 5,
        sequence: 0,
    };
    secondary.process_mesh_frame(&acceptance.encode(), -80.0, 6.0, at(50));
    exchange(&mut primary, &mut secondary, at(50));
    assert_eq!(primary.relay_link().established, Some(8));

    for i in 0..4 {
        primary.process_gcs_frame(&[0x01, 0x02, 0x03], -80.0, 8.0, at(100 + i * 10));
    }
    assert_eq!(primary.mode(), OperatingMode::Relay);
    primary.process_gcs_frame(&[0x01, 0x02, 0x03], -80.0, 8.0, at(150));
    assert_eq!(primary.mode(), OperatingMode::Switching);

    let seen = exchange(&mut primary, &mut secondary, at(160));
    assert!(seen.to_secondary.contains(&LinkMessage::RelayActivate { activate: false }));
    assert!(seen.to_primary.contains(&LinkMessage::RelayLost {
        relay_id: 8,
        reason: RelayLostReason::GcsRestored
    }));
    assert_eq!(seen.discovery_starts(), 0);
    assert_eq!(primary.mode(), OperatingMode::Direct);
    assert_eq!(primary.relay_link().established, None);
    assert!(!secondary.relay_active());
    assert_eq!(secondary.discovery_state(), DiscoveryState::Idle);
}

#[test]
fn watchdog_reverts_a_transition_left_unpolled() {
    let config = RelayConfiguration::default();

    let mut timed_out = PrimaryNode::new(&config, MavlinkInspector::new(), at(0));
    timed_out.request_mode(Mode::Relay, "jamming", at(0)).unwrap();
    timed_out.process_timed_tasks(at(config.transition_timeout_ms));
    assert_eq!(timed_out.mode(), OperatingMode::Bridge);
    assert_eq!(timed_out.counters().transition_failures, 1);
    assert_eq!(timed_out.counters().watchdog_reverts, 0);

    let mut stalled = PrimaryNode::new(&config, MavlinkInspector::new(), at(0));
    stalled.request_mode(Mode::Relay, "jamming", at(0)).unwrap();
    stalled.process_timed_tasks(at(config.watchdog_timeout_ms + 500));
    assert_eq!(stalled.mode(), OperatingMode::Bridge);
    assert_eq!(stalled.counters().transition_failures, 1);
    assert_eq!(stalled.counters().watchdog_reverts, 1);
    assert_eq!(stalled.pending_commands(), 0);
}
