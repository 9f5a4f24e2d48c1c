//! Relay selection
//!
//! Ranks relay-table entries with [`ScoringWeights`]:
//!
//! ```text
//! score = w.rssi · rssi_score(mesh_rssi)
//!       + w.snr · snr_score(mesh_snr)
//!       + w.gcs · gcs_link_score(gcs_rssi, gcs_loss)
//!       − w.distance · km(own, candidate)
//! ```
//!
//! The distance term is skipped while the own position is unknown. Only entries
//! announcing themselves as available take part; ties go to the lowest system id.
//! Selection is a pure function of the table and its inputs.

use crate::position::Position;
use crate::radio_devices::link_quality_calculations::{gcs_link_score, rssi_score, snr_score};
use crate::ScoringWeights;

use super::relay_table::{RelayEntry, RelayTable};

/// The relay chosen by a selection round
#[derive(Clone, Copy, PartialEq)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct Selection {
    pub relay_id: u8,
    /// Mesh metrics of the chosen relay
    pub rssi: f32,
    pub snr: f32,
    pub score: f32,
}

/// Everything a selection round reads besides the exclusion list
#[derive(Clone, Copy)]
pub struct SelectionContext<'a> {
    pub table: &'a RelayTable,
    pub own_id: Option<u8>,
    pub own_position: Option<Position>,
    pub weights: &'a ScoringWeights,
}

pub fn score_entry(entry: &RelayEntry, own_position: Option<Position>, weights: &ScoringWeights) -> f32 {
    let mut score = weights.rssi * rssi_score(entry.mesh_rssi)
        + weights.snr * snr_score(entry.mesh_snr)
        + weights.gcs * gcs_link_score(entry.gcs_rssi, entry.gcs_packet_loss);
    if let Some(own) = own_position {
        score -= weights.distance * own.distance_km(&entry.position);
    }
    score
}

/// Picks the best available relay that is neither this node nor excluded
pub fn select_best(context: &SelectionContext<'_>, excluded: &[u8]) -> Option<Selection> {
    let mut best: Option<Selection> = None;
    for entry in context.table.iter() {
        if !entry.available || Some(entry.system_id) == context.own_id || excluded.contains(&entry.system_id) {
            continue;
        }
        let score = score_entry(entry, context.own_position, context.weights);
        let better = match &best {
            None => true,
            Some(current) => score > current.score || (score == current.score && entry.system_id < current.relay_id),
        };
        if better {
            best = Some(Selection {
                relay_id: entry.system_id,
                rssi: entry.mesh_rssi,
                snr: entry.mesh_snr,
                score,
            });
        }
    }
    best
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use embassy_time::Instant;

    fn entry(system_id: u8, mesh_rssi: f32, gcs_rssi: f32, loss: f32, position: Position) -> RelayEntry {
        RelayEntry {
            system_id,
            available: true,
            gcs_rssi,
            gcs_snr: 8.0,
            gcs_packet_loss: loss,
            mesh_rssi,
            mesh_snr: 6.0,
            last_seen: Instant::from_millis(0),
            position,
            score: 0.0,
        }
    }

    fn context<'a>(table: &'a RelayTable, weights: &'a ScoringWeights) -> SelectionContext<'a> {
        SelectionContext {
            table,
            own_id: Some(1),
            own_position: Some(Position::new(0, 0, 0)),
            weights,
        }
    }

    #[test]
    fn mesh_proximity_beats_slightly_better_gcs_link() {
        let weights = ScoringWeights::default();
        let mut table = RelayTable::new();
        table.upsert(entry(7, -80.0, -60.0, 2.0, Position::new(0, 0, 0)));
        table.upsert(entry(9, -95.0, -55.0, 1.0, Position::from_degrees(0.5, 0.5, 0)));
        let selection = select_best(&context(&table, &weights), &[]).unwrap();
        assert_eq!(selection.relay_id, 7);
        assert_eq!(selection.rssi, -80.0);
    }

    #[test]
    fn ties_go_to_lowest_id() {
        let weights = ScoringWeights::default();
        let mut table = RelayTable::new();
        table.upsert(entry(12, -80.0, -60.0, 2.0, Position::default()));
        table.upsert(entry(4, -80.0, -60.0, 2.0, Position::default()));
        assert_eq!(select_best(&context(&table, &weights), &[]).unwrap().relay_id, 4);
    }

    #[test]
    fn unavailable_own_and_excluded_entries_are_skipped() {
        let weights = ScoringWeights::default();
        let mut table = RelayTable::new();
        table.upsert(entry(1, -40.0, -40.0, 0.0, Position::default()));
        table.upsert(RelayEntry {
            available: false,
            ..entry(2, -45.0, -45.0, 0.0, Position::default())
        });
        table.upsert(entry(3, -50.0, -50.0, 0.0, Position::default()));
        table.upsert(entry(5, -90.0, -90.0, 0.0, Position::default()));
        let ctx = context(&table, &weights);
        assert_eq!(select_best(&ctx, &[]).unwrap().relay_id, 3);
        assert_eq!(select_best(&ctx, &[3]).unwrap().relay_id, 5);
        assert_eq!(select_best(&ctx, &[3, 5]), None);
    }

    #[test]
    fn every_metric_is_monotonic() {
        let weights = ScoringWeights::default();
        let base = entry(1, -80.0, -60.0, 10.0, Position::from_degrees(0.1, 0.1, 0));
        let own = Some(Position::default());
        let s = |e: RelayEntry| score_entry(&e, own, &weights);
        assert!(s(RelayEntry { mesh_rssi: -70.0, ..base }) > s(base));
        assert!(s(RelayEntry { mesh_snr: 8.0, ..base }) > s(base));
        assert!(s(RelayEntry { gcs_rssi: -50.0, ..base }) > s(base));
        assert!(s(RelayEntry { gcs_packet_loss: 5.0, ..base }) > s(base));
        assert!(s(RelayEntry { position: Position::default(), ..base }) > s(base));
    }

    #[test]
    fn unknown_own_position_ignores_distance() {
        let weights = ScoringWeights::default();
        let near = entry(1, -80.0, -60.0, 2.0, Position::default());
        let far = entry(2, -80.0, -60.0, 2.0, Position::from_degrees(1.0, 1.0, 0));
        assert_eq!(score_entry(&near, None, &weights), score_entry(&far, None, &weights));
    }

    #[test]
    fn same_inputs_same_choice() {
        let weights = ScoringWeights::default();
        let mut table = RelayTable::new();
        table.upsert(entry(7, -80.0, -60.0, 2.0, Position::default()));
        table.upsert(entry(9, -82.0, -58.0, 2.0, Position::default()));
        let ctx = context(&table, &weights);
        let first = select_best(&ctx, &[]);
        for _ in 0..10 {
            assert_eq!(select_best(&ctx, &[]), first);
        }
    }
}
