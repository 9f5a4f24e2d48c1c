//! Client roster of a Secondary acting as a relay
//!
//! Bounded at [`MAX_CLIENTS`]. A client stays on the roster while its mesh
//! heartbeats (or any of its frames) keep arriving within the client timeout.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::MAX_CLIENTS;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ClientEntry {
    pub system_id: u8,
    pub connected_at: Instant,
    pub last_heartbeat: Instant,
}

#[derive(Default)]
pub struct ConnectionManager {
    clients: Vec<ClientEntry, MAX_CLIENTS>,
}

impl ConnectionManager {
    pub const fn new() -> Self {
        ConnectionManager { clients: Vec::new() }
    }

    pub fn has_capacity(&self) -> bool {
        !self.clients.is_full()
    }

    pub fn contains(&self, system_id: u8) -> bool {
        self.clients.iter().any(|c| c.system_id == system_id)
    }

    pub fn size(&self) -> usize {
        self.clients.len()
    }

    /// Adds a client to the roster
    ///
    /// # Returns
    /// * `true` - The client is on the roster (newly added or already present)
    /// * `false` - The roster is full
    pub fn add(&mut self, system_id: u8, now: Instant) -> bool {
        if self.touch(system_id, now) {
            return true;
        }
        self.clients
            .push(ClientEntry {
                system_id,
                connected_at: now,
                last_heartbeat: now,
            })
            .is_ok()
    }

    /// Records a sign of life from a client
    ///
    /// # Returns
    /// `true` if `system_id` is a client
    pub fn touch(&mut self, system_id: u8, now: Instant) -> bool {
        match self.clients.iter_mut().find(|c| c.system_id == system_id) {
            Some(client) => {
                client.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    /// Drops clients silent for at least `timeout`
    ///
    /// # Returns
    /// The system ids of the evicted clients
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<u8, MAX_CLIENTS> {
        let mut evicted = Vec::new();
        self.clients.retain(|c| {
            let alive = now.saturating_duration_since(c.last_heartbeat) < timeout;
            if !alive {
                let _ = evicted.push(c.system_id);
            }
            alive
        });
        evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientEntry> {
        self.clients.iter()
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn roster_is_bounded() {
        let mut manager = ConnectionManager::new();
        for id in 1..=MAX_CLIENTS as u8 {
            assert!(manager.add(id, at(0)));
        }
        assert!(!manager.has_capacity());
        assert!(!manager.add(42, at(0)));
        assert_eq!(manager.size(), MAX_CLIENTS);
    }

    #[test]
    fn re_adding_a_client_does_not_take_a_slot() {
        let mut manager = ConnectionManager::new();
        manager.add(5, at(0));
        manager.add(5, at(100));
        assert_eq!(manager.size(), 1);
        assert_eq!(manager.iter().next().unwrap().last_heartbeat, at(100));
    }

    #[test]
    fn silent_clients_expire() {
        let mut manager = ConnectionManager::new();
        manager.add(5, at(0));
        manager.add(6, at(0));
        manager.touch(6, at(4_000));
        let evicted = manager.expire(at(5_000), Duration::from_millis(5_000));
        assert_eq!(evicted.as_slice(), &[5]);
        assert!(manager.contains(6));
        assert!(!manager.contains(5));
    }
}
