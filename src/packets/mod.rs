//! Decoded telemetry fragments consumed by the session core.
//!
//! The binary wire decoder lives outside this crate; every type here is the
//! logical, already-decoded shape of one packet kind. Fragments arrive at
//! independent frequencies and the core must tolerate any interleaving of
//! them, so each one is kept small and self-contained.

use serde::{Deserialize, Serialize};

/// One value per wheel corner, in the order the dashboard renders them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WheelSet<T> {
    pub front_left: T,
    pub front_right: T,
    pub rear_left: T,
    pub rear_right: T,
}

impl<T> WheelSet<T> {
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> WheelSet<U> {
        WheelSet {
            front_left: f(&self.front_left),
            front_right: f(&self.front_right),
            rear_left: f(&self.rear_left),
            rear_right: f(&self.rear_right),
        }
    }

    pub fn as_array(&self) -> [&T; 4] {
        [
            &self.front_left,
            &self.front_right,
            &self.rear_left,
            &self.rear_right,
        ]
    }
}

impl WheelSet<f32> {
    pub fn uniform(value: f32) -> Self {
        Self {
            front_left: value,
            front_right: value,
            rear_left: value,
            rear_right: value,
        }
    }

    pub fn average(&self) -> f32 {
        (self.front_left + self.front_right + self.rear_left + self.rear_right) / 4.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SafetyCarStatus {
    #[default]
    Clear,
    Virtual,
    Full,
}

impl SafetyCarStatus {
    /// True when any kind of neutralization is active. Laps driven under
    /// either flavour are excluded from the wear regression.
    pub fn is_active(&self) -> bool {
        !matches!(self, SafetyCarStatus::Clear)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    #[default]
    Unknown,
    Practice,
    Qualifying,
    Race,
    TimeTrial,
}

impl SessionType {
    /// Lap counters are only globally comparable in race-type sessions,
    /// which is why flashback recovery is restricted to them.
    pub fn is_race(&self) -> bool {
        matches!(self, SessionType::Race)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PitStatus {
    #[default]
    None,
    Pitting,
    InPitArea,
}

impl PitStatus {
    pub fn is_pitting(&self) -> bool {
        !matches!(self, PitStatus::None)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TyreCompound {
    #[default]
    Unknown,
    Soft,
    Medium,
    Hard,
    Intermediate,
    Wet,
}

impl TyreCompound {
    pub fn short_name(&self) -> &'static str {
        match self {
            TyreCompound::Unknown => "?",
            TyreCompound::Soft => "S",
            TyreCompound::Medium => "M",
            TyreCompound::Hard => "H",
            TyreCompound::Intermediate => "I",
            TyreCompound::Wet => "W",
        }
    }
}

/// Lap timing and track position for one car.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LapDataFragment {
    /// Lap the car is currently on, 1-based
    pub current_lap_num: u32,
    /// Race position, 1-based
    pub car_position: u8,
    pub last_lap_time_ms: u32,
    pub current_lap_time_ms: u32,
    pub sector1_time_ms: u32,
    pub sector2_time_ms: u32,
    /// Meters traveled from S/F this lap
    pub lap_distance: f32,
    pub pit_status: PitStatus,
    pub num_pit_stops: u8,
    /// Accumulated time penalties in seconds
    pub penalties_sec: u8,
    pub total_warnings: u8,
    pub corner_cutting_warnings: u8,
    pub num_unserved_drive_through_pens: u8,
    pub num_unserved_stop_go_pens: u8,
    pub delta_to_car_in_front_ms: u32,
    pub delta_to_race_leader_ms: u32,
}

/// Accumulated car damage, including per-corner tyre wear percentages.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CarDamageFragment {
    /// Tyre wear percentage per corner, 0..=100
    pub tyres_wear: WheelSet<f32>,
    pub tyres_damage: WheelSet<u8>,
    pub brakes_damage: WheelSet<u8>,
    pub front_left_wing_damage: u8,
    pub front_right_wing_damage: u8,
    pub rear_wing_damage: u8,
    pub floor_damage: u8,
    pub diffuser_damage: u8,
    pub sidepod_damage: u8,
    pub gearbox_damage: u8,
    pub engine_damage: u8,
    pub drs_fault: bool,
}

/// Live status of one car: fuel, compounds, flags.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CarStatusFragment {
    /// Fuel in tank in kg
    pub fuel_in_tank: f32,
    pub fuel_capacity: f32,
    /// Game-provided estimate of laps of fuel left
    pub fuel_remaining_laps: f32,
    pub actual_tyre_compound: TyreCompound,
    pub visual_tyre_compound: TyreCompound,
    pub tyres_age_laps: u8,
    pub ers_store_energy: f32,
}

/// One entry of the car's tyre-set allocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TyreSetData {
    pub actual_tyre_compound: TyreCompound,
    pub visual_tyre_compound: TyreCompound,
    /// Wear percentage of this set, 0..=100
    pub wear: u8,
    pub available: bool,
    pub life_span_laps: u8,
    pub usable_life_laps: u8,
    pub lap_delta_time_ms: i16,
    pub fitted: bool,
}

/// Full tyre-set allocation plus the index of the set currently fitted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TyreSetsFragment {
    pub tyre_sets: Vec<TyreSetData>,
    pub fitted_index: u8,
}

impl TyreSetsFragment {
    /// Compound of the fitted set, if the fitted index is in bounds.
    /// An out-of-bounds index is a data inconsistency, not an error.
    pub fn fitted_compound(&self) -> Option<TyreCompound> {
        self.tyre_sets
            .get(self.fitted_index as usize)
            .map(|set| set.visual_tyre_compound)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LapHistoryData {
    pub lap_time_ms: u32,
    pub sector1_time_ms: u32,
    pub sector2_time_ms: u32,
    pub sector3_time_ms: u32,
    pub lap_valid: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TyreStintHistoryData {
    /// Lap the stint ended on, 255 while the stint is still running
    pub end_lap: u8,
    pub actual_tyre_compound: TyreCompound,
    pub visual_tyre_compound: TyreCompound,
}

/// Session history as the simulation itself accounts for it. Used to
/// cross-reference lap times with the tyre set fitted at the time.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionHistoryFragment {
    pub num_laps: u8,
    pub best_lap_time_lap_num: u8,
    pub lap_history: Vec<LapHistoryData>,
    pub tyre_stints: Vec<TyreStintHistoryData>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CarSetupFragment {
    pub front_wing: u8,
    pub rear_wing: u8,
    pub differential_on_throttle: u8,
    pub front_camber: f32,
    pub rear_camber: f32,
    pub front_suspension: u8,
    pub rear_suspension: u8,
    pub brake_pressure: u8,
    pub front_brake_bias: u8,
    pub ballast: u8,
    pub fuel_load: f32,
}

/// Driver identity and the telemetry-sharing setting. Wear data for drivers
/// with sharing disabled is unreliable and must be ignored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantFragment {
    pub name: String,
    pub team: String,
    pub race_number: u8,
    pub is_ai: bool,
    pub telemetry_sharing: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalClassificationFragment {
    pub position: u8,
    pub num_laps: u8,
    pub grid_position: u8,
    pub points: u8,
    pub num_pit_stops: u8,
    pub best_lap_time_ms: u32,
    pub total_race_time_s: f64,
    pub penalties_time_sec: u8,
    pub num_penalties: u8,
    pub num_tyre_stints: u8,
}

/// Session-wide fields shared by every car.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFragment {
    pub session_type: SessionType,
    pub circuit: String,
    pub total_laps: u32,
    pub safety_car_status: SafetyCarStatus,
    pub session_time_left_s: u32,
    pub pit_speed_limit_kph: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedTrapFragment {
    pub speed_kph: f32,
    /// Whether this is the fastest speed of anyone in the session so far
    pub is_overall_fastest: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PenaltyFragment {
    pub penalty_kind: String,
    pub infringement: String,
    pub other_car_index: Option<u8>,
    pub time_sec: u8,
    pub lap_num: u32,
}

/// Per-car fragment kinds, routed to a driver record by car index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum DriverFragment {
    LapData(LapDataFragment),
    CarDamage(CarDamageFragment),
    CarStatus(CarStatusFragment),
    TyreSets(TyreSetsFragment),
    SessionHistory(SessionHistoryFragment),
    CarSetup(CarSetupFragment),
    Participant(ParticipantFragment),
    FinalClassification(FinalClassificationFragment),
    SpeedTrap(SpeedTrapFragment),
    Penalty(PenaltyFragment),
    Collision { other_car_index: u8 },
    Overtake { overtaken_car_index: u8 },
}

impl DriverFragment {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DriverFragment::LapData(_) => "lap-data",
            DriverFragment::CarDamage(_) => "car-damage",
            DriverFragment::CarStatus(_) => "car-status",
            DriverFragment::TyreSets(_) => "tyre-sets",
            DriverFragment::SessionHistory(_) => "session-history",
            DriverFragment::CarSetup(_) => "car-setup",
            DriverFragment::Participant(_) => "participant",
            DriverFragment::FinalClassification(_) => "final-classification",
            DriverFragment::SpeedTrap(_) => "speed-trap",
            DriverFragment::Penalty(_) => "penalty",
            DriverFragment::Collision { .. } => "collision",
            DriverFragment::Overtake { .. } => "overtake",
        }
    }
}

/// One decoded event as produced by the external wire decoder. This is the
/// only input the session core consumes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum TelemetryEvent {
    /// A new session has begun; all driver records are cleared.
    SessionStarted { session: SessionFragment },
    /// Session-wide fields changed (safety car, time left, ...).
    SessionUpdate { session: SessionFragment },
    /// The total race length became known or was corrected.
    TotalLaps { total_laps: u32 },
    /// Live telemetry speed sample for one car, used for top-speed tracking.
    CarSpeed { car_index: u8, speed_kph: f32 },
    /// A per-car fragment.
    Driver {
        car_index: u8,
        fragment: DriverFragment,
    },
}
