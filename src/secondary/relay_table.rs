//! Relay table
//!
//! Candidate relays learned from mesh announcements, at most [`RELAY_TABLE_SIZE`].
//! Each entry combines what the candidate reports about its own GCS link with how
//! well this node hears it on the mesh. A full table replaces its stalest entry.
//!
//! The `revision` counter moves on every change of selection inputs; the node
//! rescores the table only when it has moved.

use embassy_time::{Duration, Instant};
use log::log;

use crate::messages::Announcement;
use crate::position::Position;
use crate::RELAY_TABLE_SIZE;

#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RelayEntry {
    pub system_id: u8,
    pub available: bool,
    pub gcs_rssi: f32,
    pub gcs_snr: f32,
    pub gcs_packet_loss: f32,
    /// How this node hears the candidate on the mesh
    pub mesh_rssi: f32,
    pub mesh_snr: f32,
    pub last_seen: Instant,
    pub position: Position,
    /// Last computed selection score
    pub score: f32,
}

impl RelayEntry {
    pub fn from_announcement(announcement: &Announcement, mesh_rssi: f32, mesh_snr: f32, now: Instant) -> Self {
        RelayEntry {
            system_id: announcement.system_id,
            available: announcement.available,
            gcs_rssi: announcement.gcs_rssi as f32,
            gcs_snr: announcement.gcs_snr as f32,
            gcs_packet_loss: announcement.gcs_loss as f32,
            mesh_rssi,
            mesh_snr,
            last_seen: now,
            position: announcement.position,
            score: 0.0,
        }
    }
}

pub struct RelayTable {
    entries: [Option<RelayEntry>; RELAY_TABLE_SIZE],
    revision: u32,
}

impl Default for RelayTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayTable {
    pub const fn new() -> Self {
        RelayTable {
            entries: [None; RELAY_TABLE_SIZE],
            revision: 0,
        }
    }

    /// Inserts or refreshes an entry
    pub fn upsert(&mut self, entry: RelayEntry) {
        self.revision = self.revision.wrapping_add(1);

        if let Some(slot) = self
            .entries
            .iter_mut()
            .flatten()
            .find(|e| e.system_id == entry.system_id)
        {
            *slot = RelayEntry { score: slot.score, ..entry };
            return;
        }

        if let Some(slot) = self.entries.iter_mut().find(|e| e.is_none()) {
            log::debug!("[S] New relay candidate {}", entry.system_id);
            *slot = Some(entry);
            return;
        }

        let mut stalest = 0;
        for (i, slot) in self.entries.iter().enumerate() {
            if let (Some(candidate), Some(current)) = (slot, &self.entries[stalest]) {
                if candidate.last_seen < current.last_seen {
                    stalest = i;
                }
            }
        }
        log!(
            log::Level::Debug,
            "[S] Relay table full, replacing candidate {:?} with {}",
            self.entries[stalest].map(|e| e.system_id),
            entry.system_id
        );
        self.entries[stalest] = Some(entry);
    }

    /// Removes entries not refreshed within `stale_after`
    ///
    /// # Returns
    /// The number of evicted entries
    pub fn evict_stale(&mut self, now: Instant, stale_after: Duration) -> usize {
        let mut evicted = 0;
        for slot in self.entries.iter_mut() {
            if slot.is_some_and(|e| now.saturating_duration_since(e.last_seen) >= stale_after) {
                *slot = None;
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.revision = self.revision.wrapping_add(1);
            log::debug!("[S] Evicted {} stale relay candidates", evicted);
        }
        evicted
    }

    pub fn get(&self, system_id: u8) -> Option<&RelayEntry> {
        self.iter().find(|e| e.system_id == system_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelayEntry> {
        self.entries.iter().flatten()
    }

    /// Stores freshly computed scores; does not count as a table change
    pub fn refresh_scores(&mut self, mut score: impl FnMut(&RelayEntry) -> f32) {
        for entry in self.entries.iter_mut().flatten() {
            entry.score = score(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn entry(system_id: u8, seen_ms: u64) -> RelayEntry {
        RelayEntry {
            system_id,
            available: true,
            gcs_rssi: -60.0,
            gcs_snr: 8.0,
            gcs_packet_loss: 2.0,
            mesh_rssi: -80.0,
            mesh_snr: 7.0,
            last_seen: Instant::from_millis(seen_ms),
            position: Position::default(),
            score: 0.0,
        }
    }

    #[test]
    fn upsert_refreshes_existing_entry() {
        let mut table = RelayTable::new();
        table.upsert(entry(7, 0));
        table.upsert(RelayEntry {
            mesh_rssi: -70.0,
            ..entry(7, 500)
        });
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(7).unwrap().mesh_rssi, -70.0);
        assert_eq!(table.revision(), 2);
    }

    #[test]
    fn full_table_replaces_stalest() {
        let mut table = RelayTable::new();
        for id in 0..RELAY_TABLE_SIZE as u8 {
            table.upsert(entry(id + 1, 1_000 + id as u64));
        }
        table.upsert(entry(99, 5_000));
        assert_eq!(table.len(), RELAY_TABLE_SIZE);
        assert!(table.get(1).is_none());
        assert!(table.get(99).is_some());
    }

    #[test]
    fn stale_entries_are_evicted() {
        let mut table = RelayTable::new();
        table.upsert(entry(1, 0));
        table.upsert(entry(2, 6_000));
        let evicted = table.evict_stale(Instant::from_millis(10_000), Duration::from_millis(10_000));
        assert_eq!(evicted, 1);
        assert!(table.get(1).is_none());
        assert!(table.get(2).is_some());
    }

    #[test]
    fn score_refresh_keeps_revision() {
        let mut table = RelayTable::new();
        table.upsert(entry(1, 0));
        let revision = table.revision();
        table.refresh_scores(|_| 42.0);
        assert_eq!(table.revision(), revision);
        assert_eq!(table.get(1).unwrap().score, 42.0);
    }
}
