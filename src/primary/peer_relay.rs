//! Peer-relay slots
//!
//! The Primary remembers which mesh vehicles it has recently heard from, up to
//! [`PEER_RELAY_SLOTS`]. Slots live in a fixed array; every reuse of a slot bumps its
//! generation so a [`PeerHandle`] taken earlier can no longer reach the new occupant.

use embassy_time::{Duration, Instant};
use log::log;

use crate::PEER_RELAY_SLOTS;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PeerRelaySlot {
    pub system_id: u8,
    pub active: bool,
    pub last_activity: Instant,
    pub packets_relayed: u32,
}

/// Stable reference to one slot occupancy
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PeerHandle {
    index: usize,
    generation: u32,
}

pub struct PeerRelayTable {
    slots: [Option<PeerRelaySlot>; PEER_RELAY_SLOTS],
    generations: [u32; PEER_RELAY_SLOTS],
    timeout: Duration,
    exhaustion: u32,
}

impl PeerRelayTable {
    pub fn new(timeout: Duration) -> Self {
        PeerRelayTable {
            slots: [None; PEER_RELAY_SLOTS],
            generations: [0; PEER_RELAY_SLOTS],
            timeout,
            exhaustion: 0,
        }
    }

    /// Marks activity from `system_id`, allocating a slot if needed
    ///
    /// # Returns
    /// * `Some(handle)` - The slot now holding `system_id`
    /// * `None` - Every slot is taken by a live peer
    pub fn record_activity(&mut self, system_id: u8, now: Instant) -> Option<PeerHandle> {
        self.expire(now);

        if let Some(index) = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|s| s.system_id == system_id))
        {
            if let Some(slot) = self.slots[index].as_mut() {
                slot.active = true;
                slot.last_activity = now;
                slot.packets_relayed = slot.packets_relayed.wrapping_add(1);
            }
            return Some(PeerHandle {
                index,
                generation: self.generations[index],
            });
        }

        let Some(index) = self.slots.iter().position(Option::is_none) else {
            self.exhaustion = self.exhaustion.wrapping_add(1);
            log!(log::Level::Warn, "[P] Peer relay slots exhausted, not tracking system {}", system_id);
            return None;
        };

        self.generations[index] = self.generations[index].wrapping_add(1);
        self.slots[index] = Some(PeerRelaySlot {
            system_id,
            active: true,
            last_activity: now,
            packets_relayed: 1,
        });
        log::debug!("[P] Tracking peer relay {} in slot {}", system_id, index);
        Some(PeerHandle {
            index,
            generation: self.generations[index],
        })
    }

    /// Reclaims slots idle for longer than the peer timeout
    pub fn expire(&mut self, now: Instant) {
        for slot in self.slots.iter_mut() {
            if let Some(s) = slot {
                if now.saturating_duration_since(s.last_activity) >= self.timeout {
                    log::debug!("[P] Peer relay {} timed out", s.system_id);
                    *slot = None;
                }
            }
        }
    }

    /// The slot behind `handle`, if it still holds the same occupant
    pub fn get(&self, handle: PeerHandle) -> Option<&PeerRelaySlot> {
        if self.generations.get(handle.index) != Some(&handle.generation) {
            return None;
        }
        self.slots[handle.index].as_ref()
    }

    pub fn find(&self, system_id: u8) -> Option<&PeerRelaySlot> {
        self.slots.iter().flatten().find(|s| s.system_id == system_id)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().flatten().filter(|s| s.active).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRelaySlot> {
        self.slots.iter().flatten()
    }

    /// Times a new peer could not be tracked
    pub fn exhaustion(&self) -> u32 {
        self.exhaustion
    }
}
