//! JSON-shaped output documents rendered from the store.
//!
//! Everything here is a pure read: documents are built from `&` references
//! on an already-finalized store and carry no behavior of their own. The
//! save writer and any external UI consume these shapes verbatim.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::packets::{
    CarDamageFragment, CarSetupFragment, CarStatusFragment, FinalClassificationFragment,
    TyreCompound, TyreSetsFragment, WheelSet,
};
use crate::session::SessionContext;
use crate::session::driver::DriverRecord;
use crate::session::fuel::FuelStats;
use crate::session::messages::{RaceCtrlEntry, WarningPenaltyEntry};
use crate::session::snapshots::LapSnapshot;
use crate::session::stints::TyreWearPerLap;
use crate::session::store::DriverRecordStore;

/// Why a session document was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveReason {
    Manual,
    Shutdown,
    EndOfCapture,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StintDocument {
    pub start_lap: u32,
    pub end_lap: Option<u32>,
    pub fitted_index: u8,
    pub compound: TyreCompound,
    pub last_wear: Option<WheelSet<f32>>,
    pub wear_history: Vec<TyreWearPerLap>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LapSnapshotRow {
    pub lap_number: u32,
    #[serde(flatten)]
    pub snapshot: LapSnapshot,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictedWearRow {
    pub lap_number: u32,
    pub wear: WheelSet<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WearForecastDocument {
    pub data_sufficient: bool,
    pub final_lap: Option<PredictedWearRow>,
    /// First predicted lap where any corner crosses the pit-window threshold
    pub next_pit_window_lap: Option<u32>,
    pub table: Vec<PredictedWearRow>,
}

/// One lap time joined against the tyre set fitted when it was driven.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LapTimeRow {
    pub lap_number: u32,
    pub lap_time_ms: u32,
    pub valid: bool,
    pub compound: Option<TyreCompound>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StintSummaryRow {
    pub car_index: u8,
    pub name: Option<String>,
    pub stints: Vec<StintDocument>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedTrapRanking {
    pub car_index: u8,
    pub name: Option<String>,
    pub speed_kph: f32,
    pub lap_number: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverDocument {
    pub car_index: u8,
    pub valid: bool,
    pub name: Option<String>,
    pub team: Option<String>,
    pub race_number: Option<u8>,
    pub is_ai: Option<bool>,
    pub position: Option<u8>,
    pub current_lap: Option<u32>,
    pub finished: bool,

    pub last_lap_time_ms: Option<u32>,
    pub best_lap_time_ms: Option<u32>,
    pub best_sector1_time_ms: Option<u32>,
    pub best_sector2_time_ms: Option<u32>,
    pub current_lap_time_ms: Option<u32>,
    pub delta_to_car_in_front_ms: Option<u32>,
    pub delta_to_race_leader_ms: Option<u32>,
    pub num_pit_stops: u8,

    pub top_speed_kph: f32,
    pub speed_trap_best_kph: Option<f32>,
    pub speed_trap_best_lap: Option<u32>,
    pub collisions: u32,
    pub overtakes: u32,

    pub stints: Vec<StintDocument>,
    pub snapshots: Vec<LapSnapshotRow>,
    pub wear_forecast: WearForecastDocument,
    pub fuel: FuelStats,
    pub lap_times: Vec<LapTimeRow>,
    pub position_history: Vec<Option<u8>>,
    pub warnings_penalties: Vec<WarningPenaltyEntry>,
    pub race_ctrl: Vec<RaceCtrlEntry>,
    pub car_setup: Option<CarSetupFragment>,
    pub final_classification: Option<FinalClassificationFragment>,
    pub car_damage: Option<CarDamageFragment>,
    pub car_status: Option<CarStatusFragment>,
    pub tyre_sets: Option<TyreSetsFragment>,
}

impl DriverDocument {
    pub fn render(record: &DriverRecord, total_cars: u8, pit_wear_threshold_pct: f32) -> Self {
        Self {
            car_index: record.car_index,
            valid: record.is_valid(total_cars),
            name: record.name.clone(),
            team: record.team.clone(),
            race_number: record.race_number,
            is_ai: record.is_ai,
            position: record.position,
            current_lap: record.current_lap(),
            finished: record.finished,
            last_lap_time_ms: record.last_lap_time_ms,
            best_lap_time_ms: record.best_lap_time_ms,
            best_sector1_time_ms: record.best_sector1_time_ms,
            best_sector2_time_ms: record.best_sector2_time_ms,
            current_lap_time_ms: record
                .latest_lap_data
                .as_ref()
                .map(|lap_data| lap_data.current_lap_time_ms),
            delta_to_car_in_front_ms: record.delta_to_car_in_front_ms,
            delta_to_race_leader_ms: record.delta_to_race_leader_ms,
            num_pit_stops: record.num_pit_stops,
            top_speed_kph: record.top_speed_overall_kph,
            speed_trap_best_kph: record.speed_trap_best_kph,
            speed_trap_best_lap: record.speed_trap_best_lap,
            collisions: record.collisions,
            overtakes: record.overtakes,
            stints: render_stints(record),
            snapshots: record
                .snapshots()
                .iter()
                .map(|(lap_number, snapshot)| LapSnapshotRow {
                    lap_number,
                    snapshot: snapshot.clone(),
                })
                .collect(),
            wear_forecast: render_forecast(record, pit_wear_threshold_pct),
            fuel: record.fuel.stats(),
            lap_times: render_lap_times(record),
            position_history: record.position_history.clone(),
            warnings_penalties: record.warnings.entries().to_vec(),
            race_ctrl: record.race_ctrl().entries().to_vec(),
            car_setup: record.latest_car_setup.clone(),
            final_classification: record.latest_final_classification.clone(),
            car_damage: record.latest_car_damage.clone(),
            car_status: record.latest_car_status.clone(),
            tyre_sets: record.latest_tyre_sets.clone(),
        }
    }
}

fn render_stints(record: &DriverRecord) -> Vec<StintDocument> {
    record
        .stints()
        .stints()
        .iter()
        .map(|stint| StintDocument {
            start_lap: stint.start_lap,
            end_lap: stint.end_lap,
            fitted_index: stint.fitted_index,
            compound: stint.compound,
            last_wear: stint.wear_history.last().map(|sample| sample.wear),
            wear_history: stint.wear_history.clone(),
        })
        .collect()
}

fn render_forecast(record: &DriverRecord, pit_wear_threshold_pct: f32) -> WearForecastDocument {
    let predictor = record.predictor();
    WearForecastDocument {
        data_sufficient: predictor.is_data_sufficient(),
        final_lap: predictor.final_lap_prediction().map(|sample| PredictedWearRow {
            lap_number: sample.lap_number,
            wear: sample.wear,
        }),
        next_pit_window_lap: predictor.first_lap_above(pit_wear_threshold_pct),
        table: predictor
            .predictions()
            .iter()
            .map(|sample| PredictedWearRow {
                lap_number: sample.lap_number,
                wear: sample.wear,
            })
            .collect(),
    }
}

/// Join the simulation's own lap-time accounting with the stint ledger so
/// each time is labeled with the compound it was set on.
fn render_lap_times(record: &DriverRecord) -> Vec<LapTimeRow> {
    let Some(history) = &record.latest_session_history else {
        return Vec::new();
    };
    history
        .lap_history
        .iter()
        .enumerate()
        .filter(|(_, lap)| lap.lap_time_ms > 0)
        .map(|(index, lap)| {
            let lap_number = index as u32 + 1;
            LapTimeRow {
                lap_number,
                lap_time_ms: lap.lap_time_ms,
                valid: lap.lap_valid,
                compound: compound_at_lap(record, lap_number),
            }
        })
        .collect()
}

fn compound_at_lap(record: &DriverRecord, lap_number: u32) -> Option<TyreCompound> {
    record
        .stints()
        .stints()
        .iter()
        .find(|stint| {
            lap_number >= stint.start_lap
                && stint.end_lap.is_none_or(|end_lap| lap_number <= end_lap)
        })
        .map(|stint| stint.compound)
}

/// Aggregate speed-trap leaderboard over every valid driver, fastest first.
pub fn speed_trap_leaderboard(store: &DriverRecordStore) -> Vec<SpeedTrapRanking> {
    let total_cars = store.driver_count() as u8;
    let mut rankings: Vec<SpeedTrapRanking> = store
        .drivers()
        .filter(|(_, record)| record.is_valid(total_cars))
        .filter_map(|(car_index, record)| {
            record.speed_trap_best_kph.map(|speed_kph| SpeedTrapRanking {
                car_index,
                name: record.name.clone(),
                speed_kph,
                lap_number: record.speed_trap_best_lap,
            })
        })
        .collect();
    rankings.sort_by(|a, b| {
        b.speed_kph
            .partial_cmp(&a.speed_kph)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rankings
}

/// Position of every valid driver at a given lap, ordered by position.
pub fn positions_at_lap(store: &DriverRecordStore, lap_number: u32) -> Vec<(u8, u8)> {
    let total_cars = store.driver_count() as u8;
    let mut positions: Vec<(u8, u8)> = store
        .drivers()
        .filter(|(_, record)| record.is_valid(total_cars))
        .filter_map(|(car_index, record)| {
            record
                .position_history
                .get(lap_number as usize)
                .copied()
                .flatten()
                .map(|position| (position, car_index))
        })
        .collect();
    positions.sort();
    positions
}

/// Tyre-stint histories over every valid driver, for pit-strategy views.
pub fn stint_summaries(store: &DriverRecordStore) -> Vec<StintSummaryRow> {
    let total_cars = store.driver_count() as u8;
    store
        .drivers()
        .filter(|(_, record)| record.is_valid(total_cars))
        .map(|(car_index, record)| StintSummaryRow {
            car_index,
            name: record.name.clone(),
            stints: render_stints(record),
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    pub session_id: u64,
    pub session_type: String,
    pub circuit: String,
    pub total_laps: Option<u32>,
    pub packet_count: u64,
    pub save_reason: SaveReason,
    /// Moment of capture in local time, serialized RFC 3339 with the UTC
    /// offset
    pub saved_at: DateTime<Local>,
    pub drivers: Vec<DriverDocument>,
    pub speed_trap_leaderboard: Vec<SpeedTrapRanking>,
}

impl SessionDocument {
    /// Capture the whole store into one document. The caller must have run
    /// `finalize_derived()` first so derived fields are current.
    pub fn capture(
        store: &DriverRecordStore,
        save_reason: SaveReason,
        pit_wear_threshold_pct: f32,
    ) -> Self {
        let context: &SessionContext = store.context();
        let total_cars = store.driver_count() as u8;
        Self {
            session_id: context.session_id,
            session_type: format!("{:?}", context.session_type),
            circuit: context.circuit.clone(),
            total_laps: context.total_laps,
            packet_count: context.packet_count,
            save_reason,
            saved_at: Local::now(),
            drivers: store
                .drivers()
                .map(|(_, record)| {
                    DriverDocument::render(record, total_cars, pit_wear_threshold_pct)
                })
                .collect(),
            speed_trap_leaderboard: speed_trap_leaderboard(store),
        }
    }
}
