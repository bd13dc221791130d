//! Per-lap fuel consumption tracking for one driver.
//!
//! Fed the fuel-in-tank reading at every lap boundary. Per-lap consumption
//! is smoothed over a short moving window so one slow in-lap does not skew
//! the laps-remaining estimate.

use serde::{Deserialize, Serialize};
use simple_moving_average::{SMA, SumTreeSMA};

const FUEL_WINDOW_LAPS: usize = 5;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FuelStats {
    pub fuel_in_tank_kg: Option<f32>,
    pub last_lap_consumption_kg: Option<f32>,
    pub avg_consumption_kg_per_lap: Option<f32>,
    pub estimated_laps_remaining: Option<f32>,
}

pub struct FuelModel {
    fuel_at_lap_start: Option<f32>,
    last_reading: Option<f32>,
    last_lap_consumption: Option<f32>,
    window: SumTreeSMA<f32, f32, FUEL_WINDOW_LAPS>,
    samples_seen: usize,
}

impl Default for FuelModel {
    fn default() -> Self {
        Self {
            fuel_at_lap_start: None,
            last_reading: None,
            last_lap_consumption: None,
            window: SumTreeSMA::new(),
            samples_seen: 0,
        }
    }
}

impl FuelModel {
    /// Track the latest in-lap reading so the stats stay live between
    /// boundaries.
    pub fn observe_reading(&mut self, fuel_in_tank_kg: f32) {
        self.last_reading = Some(fuel_in_tank_kg);
        if self.fuel_at_lap_start.is_none() {
            self.fuel_at_lap_start = Some(fuel_in_tank_kg);
        }
    }

    /// Close out a lap with the fuel level at its boundary. Refuelling (a
    /// level that went up) resets the lap baseline without recording a
    /// bogus negative consumption.
    pub fn on_lap_boundary(&mut self, fuel_in_tank_kg: f32) {
        if let Some(start) = self.fuel_at_lap_start {
            let consumed = start - fuel_in_tank_kg;
            if consumed >= 0.0 {
                self.last_lap_consumption = Some(consumed);
                self.window.add_sample(consumed);
                self.samples_seen += 1;
            }
        }
        self.fuel_at_lap_start = Some(fuel_in_tank_kg);
        self.last_reading = Some(fuel_in_tank_kg);
    }

    pub fn stats(&self) -> FuelStats {
        let avg = (self.samples_seen > 0).then(|| self.window.get_average());
        let estimated = match (self.last_reading, avg) {
            (Some(fuel), Some(rate)) if rate > f32::EPSILON => Some(fuel / rate),
            _ => None,
        };
        FuelStats {
            fuel_in_tank_kg: self.last_reading,
            last_lap_consumption_kg: self.last_lap_consumption,
            avg_consumption_kg_per_lap: avg,
            estimated_laps_remaining: estimated,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
