//! Tyre wear extrapolation from per-lap wear samples.
//!
//! Wear grows roughly linearly with laps driven at racing pace, but laps
//! behind a safety car wear the tyre far less and would flatten the fitted
//! slope. The predictor therefore partitions its samples into maximal runs
//! sharing the racing/non-racing flag and fits only over the racing runs,
//! one closed-form ordinary-least-squares line per wheel corner.

use itertools::Itertools;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::packets::WheelSet;
use crate::session::stints::TyreWearPerLap;

const PREDICTION_PROVENANCE: &str = "extrapolated";

/// One fitted line: wear percentage as a function of lap number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
struct LinearFit {
    slope: f64,
    intercept: f64,
}

impl LinearFit {
    /// Closed-form OLS over (lap, wear) points. A single point degenerates
    /// to a flat line through it.
    fn fit(points: &[(f64, f64)]) -> Self {
        let n = points.len() as f64;
        if points.is_empty() {
            return Self::default();
        }

        let sum_x: f64 = points.iter().map(|(x, _)| x).sum();
        let sum_y: f64 = points.iter().map(|(_, y)| y).sum();
        let sum_xy: f64 = points.iter().map(|(x, y)| x * y).sum();
        let sum_xx: f64 = points.iter().map(|(x, _)| x * x).sum();

        let denominator = n * sum_xx - sum_x * sum_x;
        if points.len() < 2 || denominator.abs() < f64::EPSILON {
            return Self {
                slope: 0.0,
                intercept: sum_y / n,
            };
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denominator;
        let intercept = (sum_y - slope * sum_x) / n;
        Self { slope, intercept }
    }

    fn evaluate(&self, lap: u32) -> f32 {
        (self.slope * lap as f64 + self.intercept) as f32
    }
}

/// Segment-aware per-corner wear regression with a precomputed prediction
/// table covering the remaining race laps.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TyreWearPredictor {
    samples: Vec<TyreWearPerLap>,
    total_laps: Option<u32>,
    predictions: Vec<TyreWearPerLap>,
    /// Length of the longest all-racing run, the basis for sufficiency
    longest_racing_run: usize,
}

impl TyreWearPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[TyreWearPerLap] {
        &self.samples
    }

    /// The precomputed table, one entry per remaining race lap.
    pub fn predictions(&self) -> &[TyreWearPerLap] {
        &self.predictions
    }

    pub fn total_laps(&self) -> Option<u32> {
        self.total_laps
    }

    pub fn add_sample(&mut self, sample: TyreWearPerLap) {
        self.samples.push(sample);
        self.refit();
    }

    /// Clear all history and seed with the first sample of a fresh tyre set.
    /// The wear trend resets completely at a tyre change, so nothing from
    /// the previous set is worth keeping.
    pub fn reset_and_seed(&mut self, seed: TyreWearPerLap) {
        debug!(
            "predictor reset, seeded at lap {} (avg {:.2})",
            seed.lap_number,
            seed.average()
        );
        self.samples.clear();
        self.samples.push(seed);
        self.refit();
    }

    pub fn set_total_laps(&mut self, total_laps: u32) {
        self.total_laps = Some(total_laps);
        self.refit();
    }

    /// Drop samples invalidated by a rewind and refit from scratch.
    pub fn remove_invalidated(&mut self, first_invalid_lap: u32) {
        let before = self.samples.len();
        self.samples
            .retain(|sample| sample.lap_number < first_invalid_lap);
        if self.samples.len() != before {
            debug!(
                "flashback removed {} predictor samples",
                before - self.samples.len()
            );
        }
        self.refit();
    }

    /// Predicted wear for one lap, or None when the lap is outside the
    /// computed table. Never extrapolates past the table on demand.
    pub fn predict(&self, lap_number: u32) -> Option<WheelSet<f32>> {
        self.predictions
            .iter()
            .find(|prediction| prediction.lap_number == lap_number)
            .map(|prediction| prediction.wear)
    }

    /// Predicted wear at the final race lap.
    pub fn final_lap_prediction(&self) -> Option<&TyreWearPerLap> {
        let total = self.total_laps?;
        self.predictions
            .iter()
            .find(|prediction| prediction.lap_number == total)
    }

    /// First lap where any corner's predicted wear crosses the threshold.
    pub fn first_lap_above(&self, wear_threshold_pct: f32) -> Option<u32> {
        self.predictions
            .iter()
            .find(|prediction| {
                prediction
                    .wear
                    .as_array()
                    .iter()
                    .any(|corner| **corner >= wear_threshold_pct)
            })
            .map(|prediction| prediction.lap_number)
    }

    /// Sufficiency requires at least two racing samples in the same segment;
    /// when laps remain, an empty prediction table means the fit could not
    /// be produced and the data is likewise insufficient.
    pub fn is_data_sufficient(&self) -> bool {
        if self.longest_racing_run < 2 {
            return false;
        }
        match self.remaining_laps() {
            Some(remaining) if remaining > 0 => !self.predictions.is_empty(),
            _ => true,
        }
    }

    fn remaining_laps(&self) -> Option<u32> {
        let total = self.total_laps?;
        let newest = self.samples.last()?.lap_number;
        Some(total.saturating_sub(newest))
    }

    /// Samples eligible for the regression: the concatenation of every
    /// maximal run whose samples are all racing laps. Also reports the
    /// longest single run, the basis for sufficiency.
    fn racing_segments(&self) -> (Vec<TyreWearPerLap>, usize) {
        let mut selected = Vec::new();
        let mut longest = 0usize;
        let chunks = self.samples.iter().chunk_by(|sample| sample.is_racing_lap);
        for (is_racing, run) in &chunks {
            if is_racing {
                let run: Vec<TyreWearPerLap> = run.cloned().collect();
                longest = longest.max(run.len());
                selected.extend(run);
            }
        }
        (selected, longest)
    }

    fn refit(&mut self) {
        let (input, longest_racing_run) = self.racing_segments();
        self.longest_racing_run = longest_racing_run;
        if input.is_empty() {
            self.predictions.clear();
            return;
        }

        let corner_points = |corner: fn(&WheelSet<f32>) -> f32| -> Vec<(f64, f64)> {
            input
                .iter()
                .map(|sample| (sample.lap_number as f64, corner(&sample.wear) as f64))
                .collect()
        };

        let fits = WheelSet {
            front_left: LinearFit::fit(&corner_points(|w| w.front_left)),
            front_right: LinearFit::fit(&corner_points(|w| w.front_right)),
            rear_left: LinearFit::fit(&corner_points(|w| w.rear_left)),
            rear_right: LinearFit::fit(&corner_points(|w| w.rear_right)),
        };

        self.predictions.clear();
        if let (Some(total), Some(remaining)) = (self.total_laps, self.remaining_laps()) {
            let first = total.saturating_sub(remaining) + 1;
            for lap in first..=total {
                self.predictions.push(TyreWearPerLap {
                    lap_number: lap,
                    wear: fits.map(|fit| fit.evaluate(lap)),
                    is_racing_lap: true,
                    provenance: PREDICTION_PROVENANCE.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn racing_sample(lap: u32, wear: f32) -> TyreWearPerLap {
        TyreWearPerLap {
            lap_number: lap,
            wear: WheelSet::uniform(wear),
            is_racing_lap: true,
            provenance: "test".to_string(),
        }
    }

    fn safety_car_sample(lap: u32, wear: f32) -> TyreWearPerLap {
        TyreWearPerLap {
            is_racing_lap: false,
            ..racing_sample(lap, wear)
        }
    }

    #[test]
    fn test_linear_samples_extrapolate_exactly() {
        let mut predictor = TyreWearPredictor::new();
        predictor.set_total_laps(10);
        predictor.add_sample(racing_sample(1, 80.0));
        predictor.add_sample(racing_sample(2, 77.0));
        predictor.add_sample(racing_sample(3, 74.0));

        // 80 + (10 - 1) * -3 = 53 on every corner
        let predicted = predictor.predict(10).unwrap();
        for corner in predicted.as_array() {
            assert!((corner - 53.0).abs() < 1e-4);
        }
        assert!(predictor.is_data_sufficient());
    }

    #[test]
    fn test_single_sample_degenerates_to_flat_line() {
        let mut predictor = TyreWearPredictor::new();
        predictor.set_total_laps(8);
        predictor.add_sample(racing_sample(5, 62.0));

        for lap in 6..=8 {
            let predicted = predictor.predict(lap).unwrap();
            for corner in predicted.as_array() {
                assert_eq!(*corner, 62.0);
            }
        }
        // one sample is never sufficient
        assert!(!predictor.is_data_sufficient());
    }

    #[test]
    fn test_prediction_outside_table_is_absent() {
        let mut predictor = TyreWearPredictor::new();
        predictor.set_total_laps(10);
        predictor.add_sample(racing_sample(1, 80.0));
        predictor.add_sample(racing_sample(2, 78.0));

        // table covers laps 3..=10 only
        assert!(predictor.predict(2).is_none());
        assert!(predictor.predict(11).is_none());
        assert!(predictor.predict(10).is_some());
    }

    #[test]
    fn test_safety_car_sample_splits_segments() {
        let mut predictor = TyreWearPredictor::new();
        predictor.set_total_laps(10);
        predictor.add_sample(racing_sample(1, 80.0));
        predictor.add_sample(safety_car_sample(2, 79.5));
        predictor.add_sample(racing_sample(3, 77.0));

        // two racing runs of one sample each: never two same-segment points
        assert!(!predictor.is_data_sufficient());
    }

    #[test]
    fn test_safety_car_samples_excluded_from_fit() {
        let mut predictor = TyreWearPredictor::new();
        predictor.set_total_laps(10);
        // a clean -2/lap racing trend around a neutralized middle lap
        predictor.add_sample(racing_sample(1, 80.0));
        predictor.add_sample(racing_sample(2, 78.0));
        predictor.add_sample(safety_car_sample(3, 77.9));
        predictor.add_sample(racing_sample(4, 74.0));
        predictor.add_sample(racing_sample(5, 72.0));

        // fit input is laps {1,2,4,5} with exact slope -2, intercept 82
        let predicted = predictor.predict(10).unwrap();
        for corner in predicted.as_array() {
            assert!((corner - 62.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_flashback_removal_refits() {
        let mut predictor = TyreWearPredictor::new();
        predictor.set_total_laps(10);
        for lap in 1..=4 {
            predictor.add_sample(racing_sample(lap, 80.0 - lap as f32));
        }

        predictor.remove_invalidated(3);
        assert_eq!(predictor.samples().len(), 2);
        assert!(predictor.samples().iter().all(|s| s.lap_number < 3));
        // table now starts after the newest surviving sample
        assert!(predictor.predict(3).is_some());
    }

    #[test]
    fn test_reset_and_seed_clears_history() {
        let mut predictor = TyreWearPredictor::new();
        predictor.set_total_laps(10);
        predictor.add_sample(racing_sample(1, 50.0));
        predictor.add_sample(racing_sample(2, 55.0));

        predictor.reset_and_seed(racing_sample(5, 1.0));
        assert_eq!(predictor.samples().len(), 1);
        for corner in predictor.predict(10).unwrap().as_array() {
            assert_eq!(*corner, 1.0);
        }
    }

    #[test]
    fn test_first_lap_above_threshold() {
        let mut predictor = TyreWearPredictor::new();
        predictor.set_total_laps(10);
        predictor.add_sample(racing_sample(1, 10.0));
        predictor.add_sample(racing_sample(2, 20.0));

        // +10/lap: crosses 65% at lap 7 (70%)
        assert_eq!(predictor.first_lap_above(65.0), Some(7));
        assert_eq!(predictor.first_lap_above(150.0), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_exact_linear_data_is_recovered(
            intercept in 20.0f64..90.0f64,
            slope in -4.0f64..-0.1f64,
            total_laps in 6u32..40u32,
        ) {
            let mut predictor = TyreWearPredictor::new();
            predictor.set_total_laps(total_laps);
            for lap in 1..=5u32 {
                let wear = (intercept + slope * lap as f64) as f32;
                predictor.add_sample(racing_sample(lap, wear));
            }

            let expected = (intercept + slope * total_laps as f64) as f32;
            let predicted = predictor.predict(total_laps).unwrap();
            for corner in predicted.as_array() {
                prop_assert!((corner - expected).abs() < 1e-2);
            }
        }
    }
}
