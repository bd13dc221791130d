//! Per-lap immutable snapshots of a driver's state.
//!
//! A snapshot is committed once at the boundary of each completed lap (lap 0
//! is the pre-race grid capture) and answers time-travel queries like "what
//! were this driver's tyres at lap 12". Entries are immutable until a
//! flashback explicitly invalidates them.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::packets::{CarDamageFragment, CarStatusFragment, SafetyCarStatus, TyreSetsFragment};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LapSnapshot {
    pub car_damage: Option<CarDamageFragment>,
    pub car_status: Option<CarStatusFragment>,
    pub tyre_sets: Option<TyreSetsFragment>,
    pub track_position: Option<u8>,
    pub top_speed_kph: f32,
    /// Highest neutralization level observed at any point during the lap
    pub max_safety_car_status: SafetyCarStatus,
}

/// Snapshots keyed by lap number. BTreeMap keeps queries and rendering in
/// lap order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LapSnapshotArchive {
    snapshots: BTreeMap<u32, LapSnapshot>,
}

impl LapSnapshotArchive {
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn contains(&self, lap_number: u32) -> bool {
        self.snapshots.contains_key(&lap_number)
    }

    pub fn get(&self, lap_number: u32) -> Option<&LapSnapshot> {
        self.snapshots.get(&lap_number)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &LapSnapshot)> {
        self.snapshots.iter().map(|(lap, snapshot)| (*lap, snapshot))
    }

    /// Commit the snapshot for one lap. Committing a lap twice is an
    /// upstream logic bug; the caller guards with `contains()` and the
    /// original entry always wins here.
    pub fn commit(&mut self, lap_number: u32, snapshot: LapSnapshot) {
        if self.snapshots.contains_key(&lap_number) {
            debug_assert!(false, "lap {} snapshot committed twice", lap_number);
            warn!("ignoring duplicate snapshot commit for lap {}", lap_number);
            return;
        }
        debug!("committing snapshot for lap {}", lap_number);
        self.snapshots.insert(lap_number, snapshot);
    }

    /// Remove the grid capture so it can be retaken, used when it arrived
    /// without the damage fragment a stint bootstrap needs.
    pub fn discard(&mut self, lap_number: u32) {
        self.snapshots.remove(&lap_number);
    }

    /// Invalidate everything at or after the lap a flashback rewound to.
    /// Returns the lap numbers that were removed.
    pub fn invalidate_from(&mut self, first_invalid_lap: u32) -> Vec<u32> {
        let removed: Vec<u32> = self
            .snapshots
            .range(first_invalid_lap..)
            .map(|(lap, _)| *lap)
            .collect();
        for lap in &removed {
            self.snapshots.remove(lap);
        }
        if !removed.is_empty() {
            debug!("flashback invalidated lap snapshots {:?}", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_and_query() {
        let mut archive = LapSnapshotArchive::default();
        archive.commit(
            1,
            LapSnapshot {
                top_speed_kph: 312.0,
                ..Default::default()
            },
        );

        assert!(archive.contains(1));
        assert_eq!(archive.get(1).unwrap().top_speed_kph, 312.0);
        assert_eq!(archive.get(2), None);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_duplicate_commit_keeps_original() {
        let mut archive = LapSnapshotArchive::default();
        archive.commit(
            3,
            LapSnapshot {
                top_speed_kph: 300.0,
                ..Default::default()
            },
        );
        archive.commit(
            3,
            LapSnapshot {
                top_speed_kph: 1.0,
                ..Default::default()
            },
        );
        assert_eq!(archive.get(3).unwrap().top_speed_kph, 300.0);
    }

    #[test]
    fn test_invalidate_from_removes_tail() {
        let mut archive = LapSnapshotArchive::default();
        for lap in 1..=4 {
            archive.commit(lap, LapSnapshot::default());
        }

        let removed = archive.invalidate_from(3);
        assert_eq!(removed, vec![3, 4]);
        assert_eq!(archive.len(), 2);
        assert!(archive.contains(1));
        assert!(archive.contains(2));
    }

    #[test]
    fn test_discard_grid_capture() {
        let mut archive = LapSnapshotArchive::default();
        archive.commit(0, LapSnapshot::default());
        archive.discard(0);
        assert!(!archive.contains(0));
        // the lap can now be committed again
        archive.commit(0, LapSnapshot::default());
        assert!(archive.contains(0));
    }
}
