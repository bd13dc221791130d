//! Ordered history of tyre-set usage intervals for one driver.
//!
//! Each stint is a continuous run of laps on one physical tyre set, with the
//! per-lap wear samples recorded while it was fitted. End laps are derived
//! lazily: a stint ends where the next one starts, or at the session length
//! for the last one. Derivation happens in `finalize()` on the write path so
//! rendering stays side-effect free.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::packets::{TyreCompound, WheelSet};

/// One wear observation: the four corner percentages at the end of a lap.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TyreWearPerLap {
    pub lap_number: u32,
    pub wear: WheelSet<f32>,
    /// False for laps driven under a full or virtual safety car
    pub is_racing_lap: bool,
    /// Free-text note on where the sample came from
    pub provenance: String,
}

impl TyreWearPerLap {
    pub fn average(&self) -> f32 {
        self.wear.average()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TyreStint {
    pub start_lap: u32,
    /// None while the stint is still running; filled in by `finalize()`
    pub end_lap: Option<u32>,
    /// Index into the car's tyre-set allocation
    pub fitted_index: u8,
    pub compound: TyreCompound,
    pub wear_history: Vec<TyreWearPerLap>,
}

impl TyreStint {
    /// The sample with the highest average wear. With packet-arrival skew
    /// the true end-of-stint wear can land on any sample, but it is always
    /// the largest one since wear only grows within a stint.
    pub fn max_average_sample(&self) -> Option<&TyreWearPerLap> {
        self.wear_history.iter().max_by(|a, b| {
            a.average()
                .partial_cmp(&b.average())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

/// Strictly ordered stint history. At most the last entry is open.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TyreStintLedger {
    stints: Vec<TyreStint>,
}

impl TyreStintLedger {
    pub fn is_empty(&self) -> bool {
        self.stints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stints.len()
    }

    pub fn stints(&self) -> &[TyreStint] {
        &self.stints
    }

    /// Tyre-set index of the currently open stint.
    pub fn current_fitted_index(&self) -> Option<u8> {
        self.stints.last().map(|stint| stint.fitted_index)
    }

    pub fn current_stint(&self) -> Option<&TyreStint> {
        self.stints.last()
    }

    /// Open a new stint seeded with its initial wear sample. Ordering is an
    /// invariant: a start lap at or before the previous one indicates a
    /// logic bug upstream and the entry is refused. The one exception is a
    /// lone first entry, which may carry a garbage start lap from a pre-race
    /// strategy edit; the new entry is accepted and `finalize()` discards
    /// the garbage one.
    pub fn open_stint(
        &mut self,
        start_lap: u32,
        fitted_index: u8,
        compound: TyreCompound,
        initial_sample: TyreWearPerLap,
    ) {
        if let Some(last) = self.stints.last() {
            if start_lap <= last.start_lap && self.stints.len() > 1 {
                debug_assert!(
                    false,
                    "stint start lap {} not after previous {}",
                    start_lap, last.start_lap
                );
                warn!(
                    "refusing stint at lap {}: previous stint starts at lap {}",
                    start_lap, last.start_lap
                );
                return;
            }
        }
        debug!(
            "opening stint: lap {} set #{} compound {:?}",
            start_lap, fitted_index, compound
        );
        self.stints.push(TyreStint {
            start_lap,
            end_lap: None,
            fitted_index,
            compound,
            wear_history: vec![initial_sample],
        });
    }

    /// Append a wear sample to the open stint. Appending with no stint open
    /// is an upstream logic bug: loud in debug builds, logged no-op in
    /// release.
    pub fn append_wear_sample(&mut self, sample: TyreWearPerLap) {
        match self.stints.last_mut() {
            Some(stint) => stint.wear_history.push(sample),
            None => {
                debug_assert!(false, "wear sample appended to empty stint ledger");
                warn!(
                    "dropping wear sample for lap {}: no stint open",
                    sample.lap_number
                );
            }
        }
    }

    /// Replace the open stint's most recent wear sample. Used by the
    /// pit-exit-before-line commit path, where the true end-of-stint wear
    /// for the old set is only known after the lap change.
    pub fn overwrite_last_sample(&mut self, sample: TyreWearPerLap) {
        match self.stints.last_mut() {
            Some(stint) if !stint.wear_history.is_empty() => {
                let last = stint
                    .wear_history
                    .last_mut()
                    .expect("wear history checked non-empty");
                debug!(
                    "overwriting wear sample at lap {} with lap {} (avg {:.2})",
                    last.lap_number,
                    sample.lap_number,
                    sample.average()
                );
                *last = sample;
            }
            _ => {
                debug_assert!(false, "no wear sample available to overwrite");
                warn!("cannot overwrite wear sample: ledger has no samples");
            }
        }
    }

    /// Drop history invalidated by a rewind to `first_invalid_lap`: the
    /// whole open stint if its start lap was rewound past, then any trailing
    /// wear samples on the surviving stint, which becomes open again.
    pub fn drop_invalidated(&mut self, first_invalid_lap: u32) {
        while let Some(last) = self.stints.last() {
            if last.start_lap >= first_invalid_lap {
                debug!(
                    "flashback dropped stint starting at lap {}",
                    last.start_lap
                );
                self.stints.pop();
            } else {
                break;
            }
        }
        if let Some(last) = self.stints.last_mut() {
            while last
                .wear_history
                .last()
                .is_some_and(|sample| sample.lap_number >= first_invalid_lap)
            {
                last.wear_history.pop();
            }
            last.end_lap = None;
        }
    }

    /// Compute derived end laps. Requires exclusive access; rendering reads
    /// the result without mutating. The first entry is discarded when its
    /// derived end precedes its start, which happens when a pre-race
    /// strategy edit leaks a garbage tyre-set notification.
    pub fn finalize(&mut self, total_laps: Option<u32>) {
        let count = self.stints.len();
        for index in 0..count {
            let end = if index + 1 < count {
                Some(self.stints[index + 1].start_lap.saturating_sub(1))
            } else {
                total_laps
            };
            self.stints[index].end_lap = end;
        }

        if let Some(first) = self.stints.first() {
            if let Some(end) = first.end_lap {
                if end < first.start_lap {
                    warn!(
                        "discarding first stint (start {} > end {}): pre-race strategy garbage",
                        first.start_lap, end
                    );
                    self.stints.remove(0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lap: u32, wear: f32) -> TyreWearPerLap {
        TyreWearPerLap {
            lap_number: lap,
            wear: WheelSet::uniform(wear),
            is_racing_lap: true,
            provenance: "test".to_string(),
        }
    }

    #[test]
    fn test_start_laps_strictly_increasing() {
        let mut ledger = TyreStintLedger::default();
        ledger.open_stint(1, 0, TyreCompound::Soft, sample(0, 0.0));
        ledger.open_stint(10, 1, TyreCompound::Hard, sample(9, 1.0));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.current_fitted_index(), Some(1));
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_out_of_order_stint_refused() {
        let mut ledger = TyreStintLedger::default();
        ledger.open_stint(1, 0, TyreCompound::Soft, sample(0, 0.0));
        ledger.open_stint(10, 1, TyreCompound::Hard, sample(9, 0.0));
        ledger.open_stint(5, 2, TyreCompound::Soft, sample(4, 1.0));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_finalize_derives_end_laps() {
        let mut ledger = TyreStintLedger::default();
        ledger.open_stint(1, 0, TyreCompound::Soft, sample(0, 0.0));
        ledger.open_stint(14, 1, TyreCompound::Hard, sample(13, 2.0));
        ledger.finalize(Some(40));

        assert_eq!(ledger.stints()[0].end_lap, Some(13));
        assert_eq!(ledger.stints()[1].end_lap, Some(40));
    }

    #[test]
    fn test_finalize_leaves_open_stint_without_total_laps() {
        let mut ledger = TyreStintLedger::default();
        ledger.open_stint(1, 0, TyreCompound::Soft, sample(0, 0.0));
        ledger.finalize(None);
        assert_eq!(ledger.stints()[0].end_lap, None);
    }

    #[test]
    fn test_finalize_discards_pre_race_garbage_entry() {
        let mut ledger = TyreStintLedger::default();
        // garbage notification from a strategy edit before the start
        ledger.open_stint(5, 0, TyreCompound::Soft, sample(4, 0.0));
        // the real first stint opens at lap 1 once the race starts
        ledger.open_stint(1, 1, TyreCompound::Medium, sample(0, 0.0));
        assert_eq!(ledger.len(), 2);

        // derived end of the garbage entry is 0 < 5, so it is discarded
        ledger.finalize(Some(20));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.stints()[0].start_lap, 1);
        assert_eq!(ledger.stints()[0].end_lap, Some(20));
    }

    #[test]
    fn test_max_average_sample() {
        let mut ledger = TyreStintLedger::default();
        ledger.open_stint(1, 0, TyreCompound::Soft, sample(0, 1.0));
        ledger.append_wear_sample(sample(1, 7.5));
        ledger.append_wear_sample(sample(2, 4.0));

        let peak = ledger.current_stint().unwrap().max_average_sample().unwrap();
        assert_eq!(peak.lap_number, 1);
        assert_eq!(peak.average(), 7.5);
    }

    #[test]
    fn test_overwrite_last_sample() {
        let mut ledger = TyreStintLedger::default();
        ledger.open_stint(1, 0, TyreCompound::Soft, sample(0, 1.0));
        ledger.append_wear_sample(sample(1, 3.0));
        ledger.overwrite_last_sample(sample(5, 9.0));

        let history = &ledger.current_stint().unwrap().wear_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].lap_number, 5);
        assert_eq!(history[1].average(), 9.0);
    }

    #[test]
    fn test_flashback_drops_trailing_samples() {
        let mut ledger = TyreStintLedger::default();
        ledger.open_stint(1, 0, TyreCompound::Soft, sample(0, 0.0));
        for lap in 1..=4 {
            ledger.append_wear_sample(sample(lap, lap as f32));
        }

        ledger.drop_invalidated(3);
        let history = &ledger.current_stint().unwrap().wear_history;
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|s| s.lap_number < 3));
    }

    #[test]
    fn test_flashback_drops_whole_stint_when_start_invalidated() {
        let mut ledger = TyreStintLedger::default();
        ledger.open_stint(1, 0, TyreCompound::Soft, sample(0, 0.0));
        ledger.append_wear_sample(sample(1, 1.0));
        ledger.open_stint(5, 1, TyreCompound::Hard, sample(4, 0.0));
        ledger.finalize(Some(20));

        ledger.drop_invalidated(5);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.current_fitted_index(), Some(0));
        // surviving stint is open again
        assert_eq!(ledger.current_stint().unwrap().end_lap, None);
    }
}
