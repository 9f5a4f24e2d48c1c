//! # Intents
//!
//! Node state machines do not drive hardware. Every externally visible effect is an
//! [`Intent`] pushed into the node's [`Outbox`]; the runtime pops intents in order
//! and executes them against the serial port and the radios. Tests inspect the same
//! outbox directly.

use heapless::Deque;

use crate::frame_inspector::PriorityTier;
use crate::link::{LinkMessage, NodeRole};
use crate::radio::RadioFrame;
use crate::OUTBOX_SIZE;

/// One effect requested by a node state machine
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub enum Intent {
    /// Send a command to the other controller over the serial link
    SendSerial(LinkMessage),
    /// Transmit a frame on the mesh radio (F2), CAD-gated
    SendMesh(RadioFrame),
    /// Hand a frame to the GCS-facing radio (F1) scheduler
    SendGcs { frame: RadioFrame, tier: PriorityTier },
    /// Deliver a frame to the local flight controller
    DeliverLocal(RadioFrame),
    /// Record a state-machine transition
    LogTransition {
        node: NodeRole,
        from: &'static str,
        to: &'static str,
        reason: &'static str,
    },
}

/// Bounded FIFO of intents between a node and its runtime
pub struct Outbox {
    queue: Deque<Intent, OUTBOX_SIZE>,
    dropped: u32,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    pub const fn new() -> Self {
        Outbox {
            queue: Deque::new(),
            dropped: 0,
        }
    }

    /// Queues an intent, dropping it if the runtime has fallen behind
    pub fn push(&mut self, intent: Intent) {
        if self.queue.push_back(intent).is_err() {
            self.dropped = self.dropped.wrapping_add(1);
            log::warn!("Outbox full, dropping intent");
        }
    }

    pub fn pop(&mut self) -> Option<Intent> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Intents lost to a full outbox
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}
