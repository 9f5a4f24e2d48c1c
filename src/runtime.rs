//! # Node Runtimes
//!
//! A runtime owns one node state machine together with the hardware it needs:
//! the serial port to the other controller, the radio(s), their interrupt flags
//! and a clock.
//!
//! ## Loop Turn
//!
//! Each call to `run_once` performs, in order:
//!
//! 1. Drain the radio RX-done flag and hand every waiting frame to the node
//! 2. Take the TX-done and CAD-done flags
//! 3. Drain the serial port byte by byte through the [`LinkCodec`]
//! 4. Abandon a partial serial frame that has stalled
//! 5. Run the node's timed tasks
//!
//! Queued intents are executed after every received frame, every decoded link
//! message and the timed tasks, so a burst of input never overflows the outbox.
//!
//! `run` repeats this forever with a 1 ms pause between turns. Radio transmits
//! are the only awaited operations; they are bounded by the transmitter's CAD
//! and TX timeouts.

use embassy_time::{Duration, Timer};
use heapless::Deque;
use log::log;

use crate::clock::Clock;
use crate::frame_inspector::FrameInspector;
use crate::intent::Intent;
use crate::link::{LinkCodec, LinkMessage, NodeRole};
use crate::primary::PrimaryNode;
use crate::radio::{RadioDevice, RadioFrame, RadioIrqFlags, RadioTransmitter, TransmitStats};
use crate::secondary::{SecondaryNode, TransportStats};
use crate::serial::SerialPort;
use crate::{RelayConfiguration, LOCAL_DELIVERY_SIZE};

const LOOP_POLL: Duration = Duration::from_millis(1);

fn write_link_message<S: SerialPort>(codec: &mut LinkCodec, serial: &mut S, role: NodeRole, message: &LinkMessage) {
    let frame = match codec.encode_message(message) {
        Ok(frame) => frame,
        Err(error) => {
            log!(log::Level::Error, "[{:?}] Cannot encode {}: {:?}", role, message.code().name(), error);
            return;
        }
    };
    if let Err(error) = serial.write_all(&frame) {
        log!(log::Level::Error, "[{:?}] Serial write of {} failed: {:?}", role, message.code().name(), error);
    }
}

fn log_transition(node: NodeRole, from: &str, to: &str, reason: &str) {
    log!(log::Level::Info, "[{:?}] {} -> {} ({})", node, from, to, reason);
}

/// Takes the completion flags the transmitter does not wait on
fn take_completion_flags(irq: &RadioIrqFlags, band: &str) {
    if irq.take_tx_done() {
        log::trace!("{} TX done", band);
    }
    if irq.take_cad_done() {
        log::trace!("{} CAD done", band);
    }
}

/// Runtime of the GCS-facing controller
pub struct PrimaryRuntime<'a, I: FrameInspector, G: RadioDevice, S: SerialPort, C: Clock> {
    node: PrimaryNode<I>,
    codec: LinkCodec,
    serial: S,
    gcs_radio: G,
    gcs_irq: &'a RadioIrqFlags,
    gcs_transmitter: RadioTransmitter,
    clock: C,
    link_frame_timeout: Duration,
    local: Deque<RadioFrame, LOCAL_DELIVERY_SIZE>,
    local_drops: u32,
}

impl<'a, I: FrameInspector, G: RadioDevice, S: SerialPort, C: Clock> PrimaryRuntime<'a, I, G, S, C> {
    /// Creates the runtime and queues the start-up `INIT` command
    ///
    /// # Arguments
    /// * `config` - Shared timing configuration
    /// * `inspector` - Vehicle message parser
    /// * `gcs_radio` - The F1 modem
    /// * `gcs_irq` - Interrupt flags raised by the F1 modem
    /// * `serial` - Port to the Secondary
    /// * `clock` - Time source
    /// * `rng_seed` - Seed for the transmitter's backoff jitter
    pub fn new(
        config: &RelayConfiguration,
        inspector: I,
        gcs_radio: G,
        gcs_irq: &'a RadioIrqFlags,
        serial: S,
        clock: C,
        rng_seed: u64,
    ) -> Self {
        let now = clock.now();
        let mut node = PrimaryNode::new(config, inspector, now);
        node.start(now);
        PrimaryRuntime {
            node,
            codec: LinkCodec::new(),
            serial,
            gcs_radio,
            gcs_irq,
            gcs_transmitter: RadioTransmitter::new("F1", config, rng_seed),
            clock,
            link_frame_timeout: Duration::from_millis(config.link_frame_timeout_ms),
            local: Deque::new(),
            local_drops: 0,
        }
    }

    /// Performs one loop turn
    pub async fn run_once(&mut self) {
        if self.gcs_irq.take_rx_done() {
            while let Some(frame) = self.gcs_radio.receive() {
                let now = self.clock.now();
                self.node.process_gcs_frame(&frame.data, frame.rssi, frame.snr, now);
                self.execute_intents().await;
            }
        }
        take_completion_flags(self.gcs_irq, "F1");

        while let Some(byte) = self.serial.read_byte() {
            let now = self.clock.now();
            if let Some(message) = self.codec.feed_message(byte, now) {
                self.node.process_link_message(message, now);
                self.execute_intents().await;
            }
        }
        self.codec.poll_timeout(self.clock.now(), self.link_frame_timeout);

        self.node.process_timed_tasks(self.clock.now());
        self.execute_intents().await;
    }

    /// Runs the node forever
    pub async fn run(&mut self) -> ! {
        loop {
            self.run_once().await;
            Timer::after(LOOP_POLL).await;
        }
    }

    /// Hands a frame from the local flight controller to the node
    pub async fn send_vehicle_frame(&mut self, data: &[u8]) {
        self.node.process_vehicle_frame(data, self.clock.now());
        self.execute_intents().await;
    }

    /// Next frame addressed to the local flight controller
    pub fn take_local_frame(&mut self) -> Option<RadioFrame> {
        self.local.pop_front()
    }

    pub fn local_drops(&self) -> u32 {
        self.local_drops
    }

    pub fn node(&self) -> &PrimaryNode<I> {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut PrimaryNode<I> {
        &mut self.node
    }

    pub fn codec(&self) -> &LinkCodec {
        &self.codec
    }

    pub fn gcs_stats(&self) -> TransmitStats {
        self.gcs_transmitter.stats()
    }

    async fn execute_intents(&mut self) {
        while let Some(intent) = self.node.next_intent() {
            match intent {
                Intent::SendSerial(message) => {
                    write_link_message(&mut self.codec, &mut self.serial, NodeRole::Primary, &message);
                }
                Intent::SendGcs { frame, tier } => {
                    log::trace!("[P] F1 transmit {} bytes ({:?})", frame.len(), tier);
                    self.gcs_transmitter.transmit(&mut self.gcs_radio, &frame).await;
                }
                Intent::DeliverLocal(frame) => {
                    if self.local.push_back(frame).is_err() {
                        self.local_drops = self.local_drops.wrapping_add(1);
                        log!(log::Level::Warn, "[P] Local delivery queue full, dropping frame");
                    }
                }
                Intent::SendMesh(frame) => {
                    log!(log::Level::Warn, "[P] No mesh radio, dropping {} byte frame", frame.len());
                }
                Intent::LogTransition { node, from, to, reason } => log_transition(node, from, to, reason),
            }
        }
    }
}

/// Runtime of the mesh-side controller
pub struct SecondaryRuntime<'a, I: FrameInspector, M: RadioDevice, S: SerialPort, C: Clock> {
    node: SecondaryNode<I>,
    codec: LinkCodec,
    serial: S,
    mesh_radio: M,
    mesh_irq: &'a RadioIrqFlags,
    mesh_transmitter: RadioTransmitter,
    clock: C,
    link_frame_timeout: Duration,
}

impl<'a, I: FrameInspector, M: RadioDevice, S: SerialPort, C: Clock> SecondaryRuntime<'a, I, M, S, C> {
    /// Creates the runtime
    ///
    /// # Arguments
    /// * `config` - Shared timing configuration
    /// * `inspector` - Vehicle message parser
    /// * `mesh_radio` - The F2 modem
    /// * `mesh_irq` - Interrupt flags raised by the F2 modem
    /// * `serial` - Port to the Primary
    /// * `clock` - Time source
    /// * `rng_seed` - Seed for announcement and backoff jitter
    pub fn new(
        config: &RelayConfiguration,
        inspector: I,
        mesh_radio: M,
        mesh_irq: &'a RadioIrqFlags,
        serial: S,
        clock: C,
        rng_seed: u64,
    ) -> Self {
        let now = clock.now();
        SecondaryRuntime {
            node: SecondaryNode::new(config, inspector, rng_seed, now),
            codec: LinkCodec::new(),
            serial,
            mesh_radio,
            mesh_irq,
            mesh_transmitter: RadioTransmitter::new("F2", config, rng_seed.rotate_left(17)),
            clock,
            link_frame_timeout: Duration::from_millis(config.link_frame_timeout_ms),
        }
    }

    /// Performs one loop turn
    pub async fn run_once(&mut self) {
        if self.mesh_irq.take_rx_done() {
            while let Some(frame) = self.mesh_radio.receive() {
                let now = self.clock.now();
                self.node.process_mesh_frame(&frame.data, frame.rssi, frame.snr, now);
                self.execute_intents().await;
            }
        }
        take_completion_flags(self.mesh_irq, "F2");

        while let Some(byte) = self.serial.read_byte() {
            let now = self.clock.now();
            if let Some(message) = self.codec.feed_message(byte, now) {
                self.publish_transport_stats();
                self.node.process_link_message(message, now);
                self.execute_intents().await;
            }
        }
        self.codec.poll_timeout(self.clock.now(), self.link_frame_timeout);

        self.node.process_timed_tasks(self.clock.now());
        self.execute_intents().await;
    }

    /// Runs the node forever
    pub async fn run(&mut self) -> ! {
        loop {
            self.run_once().await;
            Timer::after(LOOP_POLL).await;
        }
    }

    pub fn node(&self) -> &SecondaryNode<I> {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut SecondaryNode<I> {
        &mut self.node
    }

    pub fn codec(&self) -> &LinkCodec {
        &self.codec
    }

    pub fn mesh_stats(&self) -> TransmitStats {
        self.mesh_transmitter.stats()
    }

    fn publish_transport_stats(&mut self) {
        let tx = self.mesh_transmitter.stats();
        self.node.set_transport_stats(TransportStats {
            mesh_tx_packets: tx.frames_sent,
            cad_deferrals: tx.cad_deferrals,
            tx_failures: tx.tx_failures.wrapping_add(tx.tx_timeouts),
            link_errors: self.codec.statistics().errors(),
        });
    }

    async fn execute_intents(&mut self) {
        while let Some(intent) = self.node.next_intent() {
            match intent {
                Intent::SendSerial(message) => {
                    write_link_message(&mut self.codec, &mut self.serial, NodeRole::Secondary, &message);
                }
                Intent::SendMesh(frame) => {
                    self.mesh_transmitter.transmit(&mut self.mesh_radio, &frame).await;
                }
                Intent::SendGcs { frame, .. } | Intent::DeliverLocal(frame) => {
                    log!(log::Level::Warn, "[S] No GCS radio or vehicle port, dropping {} byte frame", frame.len());
                }
                Intent::LogTransition { node, from, to, reason } => log_transition(node, from, to, reason),
            }
        }
    }
}
