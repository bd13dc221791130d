//! The aggregate per-driver record and its lap-boundary state machine.
//!
//! A record lives for one session and composes the stint ledger, the lap
//! snapshot archive, the wear predictor, and two pending-event sequencers
//! (one per pit-exit geometry). All packet-arrival and lap-boundary logic
//! for a single car is orchestrated here; nothing in this module performs
//! I/O or takes locks.

use log::{debug, info, warn};

use crate::packets::{
    CarDamageFragment, CarSetupFragment, CarStatusFragment, DriverFragment,
    FinalClassificationFragment, LapDataFragment, ParticipantFragment, PenaltyFragment,
    PitStatus, SafetyCarStatus, SessionHistoryFragment, SpeedTrapFragment, TyreCompound,
    TyreSetsFragment,
};
use crate::session::fuel::FuelModel;
use crate::session::messages::{RaceCtrlLog, RaceCtrlMessage, WarningPenaltyHistory};
use crate::session::pending::{PendingEventSequencer, SequencerOutcome};
use crate::session::predictor::TyreWearPredictor;
use crate::session::snapshots::{LapSnapshot, LapSnapshotArchive};
use crate::session::stints::{TyreStintLedger, TyreWearPerLap};
use crate::session::{SessionContext, TrackGeometry};

const GRID_CAPTURE_LAP: u32 = 0;
const PROVENANCE_LAP_BOUNDARY: &str = "lap boundary";
const PROVENANCE_GRID_CAPTURE: &str = "grid capture";
const PROVENANCE_TYRE_CHANGE: &str = "tyre change";
const PROVENANCE_LATE_STINT_END: &str = "late end-of-stint wear";

/// Signals a tyre-change commit can be waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StintSignal {
    LapChange,
    FreshDamage,
}

/// A detected tyre change whose commit is deferred until the sequencer
/// fires.
#[derive(Clone, Debug)]
struct PendingTyreChange {
    fitted_index: u8,
    compound: TyreCompound,
    /// The lap boundary the change straddles, fixed at detection time. The
    /// lap counter can advance again before the last awaited signal lands,
    /// so the commit must not read it.
    boundary_lap: u32,
}

#[derive(Default)]
pub struct DriverRecord {
    pub car_index: u8,

    // identity
    pub(crate) name: Option<String>,
    pub(crate) team: Option<String>,
    pub(crate) race_number: Option<u8>,
    pub(crate) is_ai: Option<bool>,
    pub(crate) telemetry_sharing: Option<bool>,

    // lap timing and position
    pub(crate) current_lap: Option<u32>,
    pub(crate) position: Option<u8>,
    pub(crate) last_lap_time_ms: Option<u32>,
    pub(crate) best_lap_time_ms: Option<u32>,
    pub(crate) best_sector1_time_ms: Option<u32>,
    pub(crate) best_sector2_time_ms: Option<u32>,
    pub(crate) delta_to_car_in_front_ms: Option<u32>,
    pub(crate) delta_to_race_leader_ms: Option<u32>,
    pub(crate) pit_status: PitStatus,
    pub(crate) num_pit_stops: u8,
    pub(crate) top_speed_this_lap_kph: f32,
    pub(crate) top_speed_overall_kph: f32,
    pub(crate) speed_trap_best_kph: Option<f32>,
    pub(crate) speed_trap_best_lap: Option<u32>,
    pub(crate) collisions: u32,
    pub(crate) overtakes: u32,
    pub(crate) position_history: Vec<Option<u8>>,
    pub(crate) finished: bool,

    // latest packet copies, each absent until first received
    pub(crate) latest_lap_data: Option<LapDataFragment>,
    pub(crate) latest_car_damage: Option<CarDamageFragment>,
    pub(crate) latest_car_status: Option<CarStatusFragment>,
    pub(crate) latest_tyre_sets: Option<TyreSetsFragment>,
    pub(crate) latest_session_history: Option<SessionHistoryFragment>,
    pub(crate) latest_car_setup: Option<CarSetupFragment>,
    pub(crate) latest_final_classification: Option<FinalClassificationFragment>,

    // per-lap transient maxima, cleared at every boundary
    pub(crate) max_safety_car_this_lap: SafetyCarStatus,

    // owned sub-records
    pub(crate) stints: TyreStintLedger,
    pub(crate) snapshots: LapSnapshotArchive,
    pub(crate) predictor: TyreWearPredictor,
    pending_pre_line: PendingEventSequencer<StintSignal>,
    pending_post_line: PendingEventSequencer<StintSignal>,
    pending_change: Option<PendingTyreChange>,
    pub(crate) warnings: WarningPenaltyHistory,
    pub(crate) race_ctrl: RaceCtrlLog,
    pub(crate) fuel: FuelModel,
}

impl DriverRecord {
    pub fn new(car_index: u8) -> Self {
        Self {
            car_index,
            ..Default::default()
        }
    }

    /// A record is only worth rendering when the car plausibly took part:
    /// a track position in range and either a known identity or historical
    /// lap data. AI slots that never joined, or drivers who disconnected
    /// after finishing, fail this without corrupting anything else.
    pub fn is_valid(&self, total_cars: u8) -> bool {
        let plausible_position = self
            .position
            .is_some_and(|position| position >= 1 && position <= total_cars);
        plausible_position && (self.name.is_some() || self.latest_session_history.is_some())
    }

    pub fn stints(&self) -> &TyreStintLedger {
        &self.stints
    }

    pub fn snapshots(&self) -> &LapSnapshotArchive {
        &self.snapshots
    }

    pub fn predictor(&self) -> &TyreWearPredictor {
        &self.predictor
    }

    pub fn race_ctrl(&self) -> &RaceCtrlLog {
        &self.race_ctrl
    }

    pub fn current_lap(&self) -> Option<u32> {
        self.current_lap
    }

    /// Route one decoded fragment into the record.
    pub fn apply_fragment(&mut self, fragment: DriverFragment, context: &SessionContext) {
        match fragment {
            DriverFragment::LapData(lap_data) => self.merge_lap_data(lap_data, context),
            DriverFragment::CarDamage(damage) => self.merge_car_damage(damage, context),
            DriverFragment::CarStatus(status) => self.merge_car_status(status),
            DriverFragment::TyreSets(tyre_sets) => self.merge_tyre_sets(tyre_sets, context),
            DriverFragment::SessionHistory(history) => self.merge_session_history(history),
            DriverFragment::CarSetup(setup) => self.latest_car_setup = Some(setup),
            DriverFragment::Participant(participant) => self.merge_participant(participant),
            DriverFragment::FinalClassification(classification) => {
                self.merge_final_classification(classification)
            }
            DriverFragment::SpeedTrap(speed_trap) => self.apply_speed_trap(speed_trap),
            DriverFragment::Penalty(penalty) => self.apply_penalty(penalty),
            DriverFragment::Collision { other_car_index } => {
                self.collisions += 1;
                self.race_ctrl
                    .push(self.current_lap, RaceCtrlMessage::Collision { other_car_index });
            }
            DriverFragment::Overtake {
                overtaken_car_index,
            } => {
                self.overtakes += 1;
                self.race_ctrl.push(
                    self.current_lap,
                    RaceCtrlMessage::Overtake {
                        overtaken_car_index,
                    },
                );
            }
        }
    }

    fn merge_lap_data(&mut self, lap_data: LapDataFragment, context: &SessionContext) {
        self.warnings.observe(&lap_data);
        self.process_pitting_status(&lap_data);

        self.position = Some(lap_data.car_position);
        if lap_data.last_lap_time_ms > 0 {
            self.last_lap_time_ms = Some(lap_data.last_lap_time_ms);
            let best = self
                .best_lap_time_ms
                .map_or(lap_data.last_lap_time_ms, |best| {
                    best.min(lap_data.last_lap_time_ms)
                });
            self.best_lap_time_ms = Some(best);
        }
        if lap_data.sector1_time_ms > 0 {
            let best = self
                .best_sector1_time_ms
                .map_or(lap_data.sector1_time_ms, |best| {
                    best.min(lap_data.sector1_time_ms)
                });
            self.best_sector1_time_ms = Some(best);
        }
        if lap_data.sector2_time_ms > 0 {
            let best = self
                .best_sector2_time_ms
                .map_or(lap_data.sector2_time_ms, |best| {
                    best.min(lap_data.sector2_time_ms)
                });
            self.best_sector2_time_ms = Some(best);
        }
        self.delta_to_car_in_front_ms = Some(lap_data.delta_to_car_in_front_ms);
        self.delta_to_race_leader_ms = Some(lap_data.delta_to_race_leader_ms);

        let new_lap = lap_data.current_lap_num;
        match self.current_lap {
            None => {
                self.current_lap = Some(new_lap);
                // grid capture before the first boundary commit
                if new_lap <= 1 && !self.snapshots.contains(GRID_CAPTURE_LAP) {
                    self.commit_snapshot(GRID_CAPTURE_LAP);
                }
            }
            Some(current) if new_lap > current => {
                self.current_lap = Some(new_lap);
                self.on_lap_change(current, context, false);
            }
            Some(current) if new_lap < current => {
                // the simulation rewound; everything from the target lap on
                // is no longer history
                if context.session_type.is_race() {
                    info!(
                        "car {}: flashback from lap {} to lap {}",
                        self.car_index, current, new_lap
                    );
                    self.recover_from_flashback(new_lap);
                } else {
                    // session-local lap counters reset freely outside races
                    debug!(
                        "car {}: lap counter moved back to {} in non-race session",
                        self.car_index, new_lap
                    );
                }
                self.current_lap = Some(new_lap);
            }
            Some(_) => {
                // same lap: retake a grid capture that was discarded for
                // missing damage data
                if new_lap <= 1 && !self.snapshots.contains(GRID_CAPTURE_LAP) {
                    self.commit_snapshot(GRID_CAPTURE_LAP);
                }
            }
        }

        self.record_position(lap_data.car_position);
        self.latest_lap_data = Some(lap_data);
    }

    /// Lap-boundary commit for `old_lap`, idempotent through the archive:
    /// duplicate delivery of the same boundary is a no-op.
    pub fn on_lap_change(&mut self, old_lap: u32, context: &SessionContext, is_flashback: bool) {
        if self.snapshots.contains(old_lap) {
            debug!(
                "car {}: lap {} already committed, skipping",
                self.car_index, old_lap
            );
            return;
        }

        // recovery always precedes any pending delayed-event commit for the
        // same lap
        if is_flashback && context.session_type.is_race() {
            self.recover_from_flashback(old_lap);
        }

        self.commit_snapshot(old_lap);

        if let Some(damage) = self.latest_car_damage.clone() {
            let sample = TyreWearPerLap {
                lap_number: old_lap,
                wear: damage.tyres_wear,
                is_racing_lap: !self.max_safety_car_this_lap.is_active(),
                provenance: PROVENANCE_LAP_BOUNDARY.to_string(),
            };
            if !self.stints.is_empty() {
                self.stints.append_wear_sample(sample.clone());
            }
            self.predictor.add_sample(sample);
        }

        if let Some(status) = &self.latest_car_status {
            self.fuel.on_lap_boundary(status.fuel_in_tank);
        }

        if self.pending_pre_line.complete(&StintSignal::LapChange) == SequencerOutcome::Fired {
            self.commit_pending_change(TrackGeometry::PitExitBeforeLine);
        }

        // reset per-lap transient maxima for the lap now starting
        self.top_speed_this_lap_kph = 0.0;
        self.max_safety_car_this_lap = SafetyCarStatus::Clear;
    }

    fn commit_snapshot(&mut self, lap_number: u32) {
        self.snapshots.commit(
            lap_number,
            LapSnapshot {
                car_damage: self.latest_car_damage.clone(),
                car_status: self.latest_car_status.clone(),
                tyre_sets: self.latest_tyre_sets.clone(),
                track_position: self.position,
                top_speed_kph: self.top_speed_this_lap_kph,
                max_safety_car_status: self.max_safety_car_this_lap,
            },
        );
    }

    /// Edge-triggered pit detection: one message per false-to-true
    /// transition. The stop count itself always comes from the packet.
    fn process_pitting_status(&mut self, lap_data: &LapDataFragment) {
        if !self.pit_status.is_pitting() && lap_data.pit_status.is_pitting() {
            self.race_ctrl.push(
                self.current_lap,
                RaceCtrlMessage::EnteringPits {
                    pit_stop_number: lap_data.num_pit_stops + 1,
                },
            );
        }
        self.pit_status = lap_data.pit_status;
        self.num_pit_stops = lap_data.num_pit_stops;
    }

    fn merge_car_damage(&mut self, damage: CarDamageFragment, _context: &SessionContext) {
        if let Some(previous) = self.latest_car_damage.clone() {
            self.diff_damage_messages(&previous, &damage);
        }
        self.latest_car_damage = Some(damage);

        // the fresh reading may be the last signal a deferred tyre-change
        // commit was waiting on
        if self.pending_pre_line.complete(&StintSignal::FreshDamage) == SequencerOutcome::Fired {
            self.commit_pending_change(TrackGeometry::PitExitBeforeLine);
        }
        if self.pending_post_line.complete(&StintSignal::FreshDamage) == SequencerOutcome::Fired {
            self.commit_pending_change(TrackGeometry::PitExitAfterLine);
        }
    }

    /// Wing-damage diff. Increases always emit; a drop to exactly zero is a
    /// wing change and emits once per call even when several wings reset
    /// together; a partial decrease is a data inconsistency and only logged.
    fn diff_damage_messages(&mut self, previous: &CarDamageFragment, current: &CarDamageFragment) {
        let components = [
            (
                "front left wing",
                previous.front_left_wing_damage,
                current.front_left_wing_damage,
            ),
            (
                "front right wing",
                previous.front_right_wing_damage,
                current.front_right_wing_damage,
            ),
            ("rear wing", previous.rear_wing_damage, current.rear_wing_damage),
        ];

        let mut wing_changed = false;
        for (component, before, after) in components {
            if after > before {
                self.race_ctrl.push(
                    self.current_lap,
                    RaceCtrlMessage::DamageIncrease {
                        component: component.to_string(),
                        previous_pct: before,
                        current_pct: after,
                    },
                );
            } else if after < before {
                if after == 0 {
                    wing_changed = true;
                } else {
                    warn!(
                        "car {}: {} damage decreased {} -> {} without reset, ignoring",
                        self.car_index, component, before, after
                    );
                }
            }
        }

        if wing_changed {
            self.race_ctrl
                .push(self.current_lap, RaceCtrlMessage::WingChange);
        }
    }

    fn merge_car_status(&mut self, status: CarStatusFragment) {
        self.fuel.observe_reading(status.fuel_in_tank);
        self.latest_car_status = Some(status);
    }

    fn merge_participant(&mut self, participant: ParticipantFragment) {
        self.name = Some(participant.name);
        self.team = Some(participant.team);
        self.race_number = Some(participant.race_number);
        self.is_ai = Some(participant.is_ai);
        self.telemetry_sharing = Some(participant.telemetry_sharing);
    }

    fn merge_session_history(&mut self, history: SessionHistoryFragment) {
        self.latest_session_history = Some(history);
    }

    fn merge_final_classification(&mut self, classification: FinalClassificationFragment) {
        self.position = Some(classification.position);
        self.num_pit_stops = classification.num_pit_stops;
        self.finished = true;
        self.latest_final_classification = Some(classification);
    }

    fn merge_tyre_sets(&mut self, tyre_sets: TyreSetsFragment, context: &SessionContext) {
        let fitted_index = tyre_sets.fitted_index;
        self.latest_tyre_sets = Some(tyre_sets);
        self.update_tyre_set_data(fitted_index, context);
    }

    /// React to a tyre-set-in-use notification. Bootstraps the first stint
    /// from the grid capture, or defers a detected change to the sequencer
    /// matching the circuit's pit-exit geometry.
    pub fn update_tyre_set_data(&mut self, fitted_index: u8, context: &SessionContext) {
        if self.telemetry_sharing == Some(false) {
            // wear for these cars is known-garbage, not worth a ledger
            debug!(
                "car {}: telemetry sharing off, ignoring tyre set data",
                self.car_index
            );
            return;
        }

        let compound = self.fitted_compound(fitted_index);

        if self.stints.is_empty() {
            let grid_damage = self
                .snapshots
                .get(GRID_CAPTURE_LAP)
                .map(|snapshot| snapshot.car_damage.clone());
            match grid_damage {
                Some(Some(damage)) => {
                    let seed = TyreWearPerLap {
                        lap_number: GRID_CAPTURE_LAP,
                        wear: damage.tyres_wear,
                        is_racing_lap: true,
                        provenance: PROVENANCE_GRID_CAPTURE.to_string(),
                    };
                    self.stints.open_stint(
                        self.current_lap.unwrap_or(1),
                        fitted_index,
                        compound,
                        seed.clone(),
                    );
                    self.predictor.reset_and_seed(seed);
                }
                Some(None) => {
                    // incomplete capture is useless for seeding; drop it so
                    // the next lap-data merge retakes it
                    debug!(
                        "car {}: grid capture lacks damage data, discarding",
                        self.car_index
                    );
                    self.snapshots.discard(GRID_CAPTURE_LAP);
                }
                None => {}
            }
            return;
        }

        if self.stints.current_fitted_index() == Some(fitted_index) {
            return;
        }

        // A tyre change. The wear attached to the current damage copy may
        // still belong to the old set, so the commit waits for the signals
        // this circuit's geometry requires.
        let geometry = context.geometry();
        let sequencer = match geometry {
            TrackGeometry::PitExitBeforeLine => &mut self.pending_pre_line,
            TrackGeometry::PitExitAfterLine => &mut self.pending_post_line,
        };
        if sequencer.has_pending_events() {
            debug!(
                "car {}: tyre change already pending, ignoring set #{}",
                self.car_index, fitted_index
            );
            return;
        }

        let registered = match geometry {
            TrackGeometry::PitExitBeforeLine => sequencer.register(
                vec![StintSignal::LapChange, StintSignal::FreshDamage],
                false,
            ),
            TrackGeometry::PitExitAfterLine => {
                sequencer.register(vec![StintSignal::FreshDamage], false)
            }
        };
        if registered {
            debug!(
                "car {}: tyre change to set #{} deferred ({:?})",
                self.car_index, fitted_index, geometry
            );
            // pre-line circuits notify during the lap the boundary ends;
            // post-line circuits notify on the lap after it
            let boundary_lap = match geometry {
                TrackGeometry::PitExitBeforeLine => self.current_lap.unwrap_or(1),
                TrackGeometry::PitExitAfterLine => {
                    self.current_lap.unwrap_or(1).saturating_sub(1)
                }
            };
            self.pending_change = Some(PendingTyreChange {
                fitted_index,
                compound,
                boundary_lap,
            });
        }
    }

    fn fitted_compound(&self, fitted_index: u8) -> TyreCompound {
        match &self.latest_tyre_sets {
            Some(tyre_sets) => match tyre_sets.tyre_sets.get(fitted_index as usize) {
                Some(set) => set.visual_tyre_compound,
                None => {
                    warn!(
                        "car {}: fitted index {} out of bounds ({} sets known)",
                        self.car_index,
                        fitted_index,
                        tyre_sets.tyre_sets.len()
                    );
                    TyreCompound::Unknown
                }
            },
            None => TyreCompound::Unknown,
        }
    }

    /// The sequencer fired: all awaited signals for the deferred tyre
    /// change have been observed.
    fn commit_pending_change(&mut self, geometry: TrackGeometry) {
        let Some(pending) = self.pending_change.take() else {
            debug_assert!(false, "sequencer fired without a pending tyre change");
            warn!("car {}: sequencer fired with nothing pending", self.car_index);
            return;
        };
        let Some(damage) = self.latest_car_damage.clone() else {
            warn!(
                "car {}: tyre change commit without any damage data, dropping",
                self.car_index
            );
            return;
        };

        let boundary_lap = pending.boundary_lap;

        if geometry == TrackGeometry::PitExitBeforeLine {
            // the true end-of-stint wear for the old set was captured late:
            // promote the stint's peak sample to its final sample
            if let Some(peak) = self
                .stints
                .current_stint()
                .and_then(|stint| stint.max_average_sample())
                .cloned()
            {
                self.stints.overwrite_last_sample(TyreWearPerLap {
                    lap_number: boundary_lap,
                    provenance: PROVENANCE_LATE_STINT_END.to_string(),
                    ..peak
                });
            }
        }

        let initial = TyreWearPerLap {
            lap_number: boundary_lap,
            wear: damage.tyres_wear,
            is_racing_lap: true,
            provenance: PROVENANCE_TYRE_CHANGE.to_string(),
        };
        self.on_tyre_set_change_commit(
            pending.fitted_index,
            pending.compound,
            boundary_lap + 1,
            initial,
        );
    }

    /// Open the new stint and reset the wear trend. Emits the compound
    /// comparison message once there is an old stint to compare against.
    pub fn on_tyre_set_change_commit(
        &mut self,
        fitted_index: u8,
        compound: TyreCompound,
        start_lap: u32,
        initial_wear: TyreWearPerLap,
    ) {
        let old_compound = self
            .stints
            .current_stint()
            .map(|stint| stint.compound);

        self.stints
            .open_stint(start_lap, fitted_index, compound, initial_wear.clone());
        self.predictor.reset_and_seed(initial_wear);

        if self.stints.len() >= 2 {
            if let Some(old_compound) = old_compound {
                info!(
                    "car {}: tyre change {} -> {} at lap {}",
                    self.car_index,
                    old_compound.short_name(),
                    compound.short_name(),
                    start_lap
                );
                self.race_ctrl.push(
                    Some(start_lap),
                    RaceCtrlMessage::TyreChange {
                        old_compound,
                        new_compound: compound,
                    },
                );
            }
        }
    }

    /// Rewind recovery: everything at or after the target lap is deleted
    /// from the archive, ledger, and predictor, and any deferred tyre
    /// change is cancelled rather than committed against rolled-back state.
    pub fn recover_from_flashback(&mut self, rewound_to_lap: u32) {
        self.snapshots.invalidate_from(rewound_to_lap);
        self.stints.drop_invalidated(rewound_to_lap);
        self.predictor.remove_invalidated(rewound_to_lap);
        self.pending_pre_line.cancel();
        self.pending_post_line.cancel();
        self.pending_change = None;
        self.position_history
            .iter_mut()
            .enumerate()
            .for_each(|(lap, position)| {
                if lap as u32 >= rewound_to_lap {
                    *position = None;
                }
            });
    }

    fn apply_speed_trap(&mut self, speed_trap: SpeedTrapFragment) {
        if self
            .speed_trap_best_kph
            .is_none_or(|best| speed_trap.speed_kph > best)
        {
            self.speed_trap_best_kph = Some(speed_trap.speed_kph);
            self.speed_trap_best_lap = self.current_lap;
        }
        self.observe_speed(speed_trap.speed_kph);
    }

    fn apply_penalty(&mut self, penalty: PenaltyFragment) {
        self.race_ctrl.push(
            Some(penalty.lap_num),
            RaceCtrlMessage::Penalty {
                penalty_kind: penalty.penalty_kind,
                infringement: penalty.infringement,
                time_sec: penalty.time_sec,
            },
        );
    }

    /// Track top speed, both the per-lap transient and the session maximum.
    pub fn observe_speed(&mut self, speed_kph: f32) {
        if speed_kph > self.top_speed_this_lap_kph {
            self.top_speed_this_lap_kph = speed_kph;
        }
        if speed_kph > self.top_speed_overall_kph {
            self.top_speed_overall_kph = speed_kph;
        }
    }

    /// Session-wide safety-car status ticked in from the store; the lap
    /// keeps its worst observed level.
    pub fn observe_safety_car(&mut self, status: SafetyCarStatus) {
        if status > self.max_safety_car_this_lap {
            self.max_safety_car_this_lap = status;
        }
    }

    pub fn set_total_laps(&mut self, total_laps: u32) {
        self.predictor.set_total_laps(total_laps);
        let slots = total_laps as usize + 1;
        if self.position_history.len() < slots {
            self.position_history.resize(slots, None);
        }
    }

    fn record_position(&mut self, position: u8) {
        if let Some(lap) = self.current_lap {
            if let Some(slot) = self.position_history.get_mut(lap as usize) {
                *slot = Some(position);
            }
        }
    }

    /// Write-path finalization of lazily derived fields so rendering stays
    /// pure.
    pub fn finalize_derived(&mut self, total_laps: Option<u32>) {
        self.stints.finalize(total_laps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{TyreSetData, WheelSet};
    use crate::session::messages::RaceCtrlMessage;
    use crate::packets::SessionType;

    fn race_context(circuit: &str) -> SessionContext {
        SessionContext {
            session_id: 1,
            session_type: SessionType::Race,
            circuit: circuit.to_string(),
            total_laps: Some(10),
            ..Default::default()
        }
    }

    fn lap_data(lap: u32) -> LapDataFragment {
        LapDataFragment {
            current_lap_num: lap,
            car_position: 1,
            ..Default::default()
        }
    }

    fn damage(wear: f32) -> CarDamageFragment {
        CarDamageFragment {
            tyres_wear: WheelSet::uniform(wear),
            ..Default::default()
        }
    }

    fn tyre_sets(fitted_index: u8, compound: TyreCompound) -> TyreSetsFragment {
        let mut sets = vec![TyreSetData::default(); 8];
        if let Some(set) = sets.get_mut(fitted_index as usize) {
            set.visual_tyre_compound = compound;
            set.fitted = true;
        }
        TyreSetsFragment {
            tyre_sets: sets,
            fitted_index,
        }
    }

    /// Drive a record to the point where the first stint is open: grid
    /// capture taken, damage known, tyre set notification processed.
    fn record_with_first_stint(context: &SessionContext) -> DriverRecord {
        let mut record = DriverRecord::new(0);
        record.apply_fragment(DriverFragment::CarDamage(damage(0.5)), context);
        record.apply_fragment(DriverFragment::LapData(lap_data(1)), context);
        record.apply_fragment(
            DriverFragment::TyreSets(tyre_sets(0, TyreCompound::Soft)),
            context,
        );
        assert_eq!(record.stints().len(), 1);
        record
    }

    #[test]
    fn test_lap_boundary_commit_is_idempotent() {
        let context = race_context("Monaco");
        let mut record = record_with_first_stint(&context);

        record.apply_fragment(DriverFragment::LapData(lap_data(2)), &context);
        let snapshots = record.snapshots().len();
        let samples = record.stints().current_stint().unwrap().wear_history.len();

        // duplicate boundary delivery
        record.on_lap_change(1, &context, false);
        assert_eq!(record.snapshots().len(), snapshots);
        assert_eq!(
            record.stints().current_stint().unwrap().wear_history.len(),
            samples
        );
    }

    #[test]
    fn test_grid_capture_discarded_without_damage_then_retaken() {
        let context = race_context("Monaco");
        let mut record = DriverRecord::new(0);

        // lap data first: grid capture committed without damage
        record.apply_fragment(DriverFragment::LapData(lap_data(1)), &context);
        assert!(record.snapshots().contains(0));

        // tyre-set notification finds the capture useless and discards it
        record.apply_fragment(
            DriverFragment::TyreSets(tyre_sets(0, TyreCompound::Soft)),
            &context,
        );
        assert!(record.stints().is_empty());
        assert!(!record.snapshots().contains(0));

        // once damage is known the capture is retaken and the stint opens
        record.apply_fragment(DriverFragment::CarDamage(damage(0.0)), &context);
        record.apply_fragment(DriverFragment::LapData(lap_data(1)), &context);
        record.apply_fragment(
            DriverFragment::TyreSets(tyre_sets(0, TyreCompound::Soft)),
            &context,
        );
        assert_eq!(record.stints().len(), 1);
    }

    #[test]
    fn test_tyre_change_geometry_b_waits_for_fresh_damage() {
        // Monaco: pit exit after the control line
        let context = race_context("Monaco");
        let mut record = record_with_first_stint(&context);

        for lap in 2..=4 {
            record.apply_fragment(DriverFragment::CarDamage(damage(lap as f32 * 3.0)), &context);
            record.apply_fragment(DriverFragment::LapData(lap_data(lap)), &context);
        }

        // pit stop: new set fitted, notification fires after the lap change
        record.apply_fragment(
            DriverFragment::TyreSets(tyre_sets(1, TyreCompound::Hard)),
            &context,
        );
        // not committed yet: the damage copy may still be the old set's
        assert_eq!(record.stints().len(), 1);

        record.apply_fragment(DriverFragment::CarDamage(damage(0.1)), &context);
        assert_eq!(record.stints().len(), 2);

        let new_stint = record.stints().current_stint().unwrap();
        assert_eq!(new_stint.fitted_index, 1);
        assert_eq!(new_stint.compound, TyreCompound::Hard);
        // initial sample attributed to the end of the just-completed lap
        assert_eq!(new_stint.wear_history[0].lap_number, 3);
        assert!(record
            .race_ctrl()
            .entries()
            .iter()
            .any(|entry| matches!(entry.message, RaceCtrlMessage::TyreChange { .. })));
    }

    #[test]
    fn test_tyre_change_geometry_a_relabels_peak_wear() {
        // Silverstone: pit exit before the control line
        let context = race_context("Silverstone");
        let mut record = record_with_first_stint(&context);

        record.apply_fragment(DriverFragment::CarDamage(damage(4.0)), &context);
        record.apply_fragment(DriverFragment::LapData(lap_data(2)), &context);
        record.apply_fragment(DriverFragment::CarDamage(damage(8.0)), &context);
        record.apply_fragment(DriverFragment::LapData(lap_data(3)), &context);

        // tyre change notification while still on lap 3, before the line
        record.apply_fragment(
            DriverFragment::TyreSets(tyre_sets(2, TyreCompound::Medium)),
            &context,
        );
        assert_eq!(record.stints().len(), 1);

        // damage for the new set arrives first, then the lap change: the
        // commit must still fire exactly once
        record.apply_fragment(DriverFragment::CarDamage(damage(0.2)), &context);
        assert_eq!(record.stints().len(), 1);
        record.apply_fragment(DriverFragment::LapData(lap_data(4)), &context);
        assert_eq!(record.stints().len(), 2);

        // the old stint's last sample was overwritten with its peak wear,
        // relabeled to the just-completed lap
        let old_stint = &record.stints().stints()[0];
        let last = old_stint.wear_history.last().unwrap();
        assert_eq!(last.lap_number, 3);
        assert_eq!(last.wear.front_left, 8.0);

        let new_stint = record.stints().current_stint().unwrap();
        assert_eq!(new_stint.wear_history[0].lap_number, 3);
        assert_eq!(new_stint.wear_history[0].wear.front_left, 0.2);
    }

    #[test]
    fn test_deferred_commit_anchors_to_detection_lap() {
        // Monaco, post-line: the fresh damage packet only lands after
        // another boundary has passed. The stint still starts on the lap
        // the notification arrived on, not wherever the counter is now.
        let context = race_context("Monaco");
        let mut record = record_with_first_stint(&context);

        for lap in 2..=4 {
            record.apply_fragment(DriverFragment::CarDamage(damage(lap as f32 * 3.0)), &context);
            record.apply_fragment(DriverFragment::LapData(lap_data(lap)), &context);
        }
        record.apply_fragment(
            DriverFragment::TyreSets(tyre_sets(1, TyreCompound::Hard)),
            &context,
        );

        // a whole lap goes by before the new set's damage reading shows up
        record.apply_fragment(DriverFragment::LapData(lap_data(5)), &context);
        assert_eq!(record.stints().len(), 1);
        record.apply_fragment(DriverFragment::CarDamage(damage(0.1)), &context);

        let new_stint = record.stints().current_stint().unwrap();
        assert_eq!(record.stints().len(), 2);
        assert_eq!(new_stint.start_lap, 4);
        assert_eq!(new_stint.wear_history[0].lap_number, 3);
    }

    #[test]
    fn test_flashback_preserves_stint_started_before_rewind() {
        // Monza, pre-line: pit during lap 5, then a rewind to lap 7. The
        // hard stint started at lap 6 and must survive the recovery with
        // only its rewound samples dropped.
        let context = race_context("Monza");
        let mut record = record_with_first_stint(&context);

        for lap in 2..=5 {
            record.apply_fragment(
                DriverFragment::CarDamage(damage((lap - 1) as f32 * 3.0)),
                &context,
            );
            record.apply_fragment(DriverFragment::LapData(lap_data(lap)), &context);
        }
        record.apply_fragment(DriverFragment::CarDamage(damage(15.0)), &context);
        record.apply_fragment(
            DriverFragment::TyreSets(tyre_sets(1, TyreCompound::Hard)),
            &context,
        );
        record.apply_fragment(DriverFragment::CarDamage(damage(0.5)), &context);
        record.apply_fragment(DriverFragment::LapData(lap_data(6)), &context);
        assert_eq!(record.stints().len(), 2);

        record.apply_fragment(DriverFragment::CarDamage(damage(2.5)), &context);
        record.apply_fragment(DriverFragment::LapData(lap_data(7)), &context);
        record.apply_fragment(DriverFragment::CarDamage(damage(4.5)), &context);
        record.apply_fragment(DriverFragment::LapData(lap_data(8)), &context);

        // rewind to lap 7
        record.apply_fragment(DriverFragment::LapData(lap_data(7)), &context);

        assert_eq!(record.stints().len(), 2);
        let hard_stint = record.stints().current_stint().unwrap();
        assert_eq!(hard_stint.start_lap, 6);
        assert_eq!(hard_stint.fitted_index, 1);
        assert!(hard_stint
            .wear_history
            .iter()
            .all(|sample| sample.lap_number < 7));
    }

    #[test]
    fn test_flashback_deletes_invalidated_history() {
        let context = race_context("Monaco");
        let mut record = record_with_first_stint(&context);

        for lap in 2..=5 {
            record.apply_fragment(DriverFragment::CarDamage(damage(lap as f32)), &context);
            record.apply_fragment(DriverFragment::LapData(lap_data(lap)), &context);
        }
        assert!(record.snapshots().contains(4));

        // rewind to lap 3
        record.apply_fragment(DriverFragment::LapData(lap_data(3)), &context);

        assert!(record.snapshots().contains(1));
        assert!(record.snapshots().contains(2));
        assert!(!record.snapshots().contains(3));
        assert!(!record.snapshots().contains(4));
        assert!(record
            .stints()
            .current_stint()
            .unwrap()
            .wear_history
            .iter()
            .all(|sample| sample.lap_number < 3));
        assert_eq!(record.current_lap(), Some(3));
    }

    #[test]
    fn test_flashback_cancels_pending_tyre_change() {
        // pins the decided ordering: recovery precedes, and therefore
        // cancels, a deferred tyre-change commit for the same lap
        let context = race_context("Monaco");
        let mut record = record_with_first_stint(&context);

        record.apply_fragment(DriverFragment::CarDamage(damage(5.0)), &context);
        record.apply_fragment(DriverFragment::LapData(lap_data(3)), &context);
        record.apply_fragment(
            DriverFragment::TyreSets(tyre_sets(1, TyreCompound::Hard)),
            &context,
        );

        // flashback lands before the fresh damage packet
        record.apply_fragment(DriverFragment::LapData(lap_data(2)), &context);
        record.apply_fragment(DriverFragment::CarDamage(damage(0.3)), &context);

        // the deferred commit must not have fired against rewound state
        assert_eq!(record.stints().len(), 1);
        assert_eq!(record.stints().current_fitted_index(), Some(0));
    }

    #[test]
    fn test_pitting_messages_are_edge_triggered() {
        let context = race_context("Monaco");
        let mut record = record_with_first_stint(&context);

        let mut pitting = lap_data(2);
        pitting.pit_status = PitStatus::Pitting;
        record.apply_fragment(DriverFragment::LapData(pitting.clone()), &context);
        record.apply_fragment(DriverFragment::LapData(pitting), &context);

        let pit_messages = record
            .race_ctrl()
            .entries()
            .iter()
            .filter(|entry| matches!(entry.message, RaceCtrlMessage::EnteringPits { .. }))
            .count();
        assert_eq!(pit_messages, 1);
    }

    #[test]
    fn test_damage_increase_and_wing_change_messages() {
        let context = race_context("Monaco");
        let mut record = DriverRecord::new(0);

        let mut first = damage(1.0);
        first.front_left_wing_damage = 10;
        first.front_right_wing_damage = 20;
        record.apply_fragment(DriverFragment::CarDamage(first), &context);

        // both front wings worsen: two increase messages
        let mut worse = damage(2.0);
        worse.front_left_wing_damage = 30;
        worse.front_right_wing_damage = 35;
        record.apply_fragment(DriverFragment::CarDamage(worse), &context);
        let increases = record
            .race_ctrl()
            .entries()
            .iter()
            .filter(|entry| matches!(entry.message, RaceCtrlMessage::DamageIncrease { .. }))
            .count();
        assert_eq!(increases, 2);

        // both wings replaced together: a single wing-change message
        let fixed = damage(2.0);
        record.apply_fragment(DriverFragment::CarDamage(fixed), &context);
        let wing_changes = record
            .race_ctrl()
            .entries()
            .iter()
            .filter(|entry| matches!(entry.message, RaceCtrlMessage::WingChange))
            .count();
        assert_eq!(wing_changes, 1);
    }

    #[test]
    fn test_partial_damage_decrease_is_ignored() {
        let context = race_context("Monaco");
        let mut record = DriverRecord::new(0);

        let mut first = damage(1.0);
        first.rear_wing_damage = 40;
        record.apply_fragment(DriverFragment::CarDamage(first), &context);

        let mut inconsistent = damage(1.0);
        inconsistent.rear_wing_damage = 25;
        record.apply_fragment(DriverFragment::CarDamage(inconsistent), &context);

        assert!(record.race_ctrl().is_empty());
    }

    #[test]
    fn test_telemetry_sharing_off_skips_tyre_data() {
        let context = race_context("Monaco");
        let mut record = DriverRecord::new(0);
        record.apply_fragment(
            DriverFragment::Participant(ParticipantFragment {
                name: "PRIVATE".to_string(),
                telemetry_sharing: false,
                ..Default::default()
            }),
            &context,
        );
        record.apply_fragment(DriverFragment::CarDamage(damage(0.0)), &context);
        record.apply_fragment(DriverFragment::LapData(lap_data(1)), &context);
        record.apply_fragment(
            DriverFragment::TyreSets(tyre_sets(0, TyreCompound::Soft)),
            &context,
        );
        assert!(record.stints().is_empty());
    }

    #[test]
    fn test_safety_car_lap_marks_sample_non_racing() {
        let context = race_context("Monaco");
        let mut record = record_with_first_stint(&context);

        record.observe_safety_car(SafetyCarStatus::Virtual);
        record.apply_fragment(DriverFragment::CarDamage(damage(2.0)), &context);
        record.apply_fragment(DriverFragment::LapData(lap_data(2)), &context);

        let history = &record.stints().current_stint().unwrap().wear_history;
        let boundary = history.last().unwrap();
        assert_eq!(boundary.lap_number, 1);
        assert!(!boundary.is_racing_lap);

        // transient maximum was cleared for the new lap
        record.apply_fragment(DriverFragment::CarDamage(damage(4.0)), &context);
        record.apply_fragment(DriverFragment::LapData(lap_data(3)), &context);
        let boundary = record
            .stints()
            .current_stint()
            .unwrap()
            .wear_history
            .last()
            .unwrap();
        assert!(boundary.is_racing_lap);
    }

    #[test]
    fn test_validity_requires_position_and_identity() {
        let context = race_context("Monaco");
        let mut record = DriverRecord::new(5);
        assert!(!record.is_valid(20));

        record.apply_fragment(DriverFragment::LapData(lap_data(1)), &context);
        // position known but no identity or history yet
        assert!(!record.is_valid(20));

        record.apply_fragment(
            DriverFragment::Participant(ParticipantFragment {
                name: "VER".to_string(),
                ..Default::default()
            }),
            &context,
        );
        assert!(record.is_valid(20));
    }
}
