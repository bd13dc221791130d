pub mod driver;
pub mod fuel;
pub mod messages;
pub mod pending;
pub mod predictor;
pub mod snapshots;
pub mod stints;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::packets::{SafetyCarStatus, SessionFragment, SessionType};

/// Circuits whose pit lane rejoins the track before the control line. On
/// these, a tyre-change notification can precede both the lap change and
/// the first damage reading for the new set.
const PIT_EXIT_BEFORE_LINE_CIRCUITS: &[&str] = &[
    "sakhir",
    "silverstone",
    "spa",
    "suzuka",
    "monza",
    "zandvoort",
];

/// The two track-layout cases that decide which telemetry fragment is
/// authoritative when a tyre change is detected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackGeometry {
    /// Pit exit before the control line: wait for both the lap change and a
    /// fresh damage packet before committing the new stint.
    PitExitBeforeLine,
    /// Pit exit after the control line: the lap change has already happened
    /// by the time the tyre-set notification fires, so only a fresh damage
    /// packet is awaited.
    #[default]
    PitExitAfterLine,
}

impl TrackGeometry {
    pub fn for_circuit(circuit: &str) -> Self {
        let lowered = circuit.to_lowercase();
        if PIT_EXIT_BEFORE_LINE_CIRCUITS
            .iter()
            .any(|known| lowered.contains(known))
        {
            TrackGeometry::PitExitBeforeLine
        } else {
            TrackGeometry::PitExitAfterLine
        }
    }
}

/// Session-wide state owned by the store and passed by reference into every
/// record mutation. Replaces what used to be ambient global state in
/// comparable tools.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: u64,
    pub session_type: SessionType,
    pub circuit: String,
    pub total_laps: Option<u32>,
    pub safety_car_status: SafetyCarStatus,
    /// Events dispatched into the store since the session started
    pub packet_count: u64,
    /// Set by the external silence watchdog via `mark_stale()`
    pub stale: bool,
}

impl SessionContext {
    pub fn from_fragment(session_id: u64, session: &SessionFragment) -> Self {
        Self {
            session_id,
            session_type: session.session_type,
            circuit: session.circuit.clone(),
            total_laps: (session.total_laps > 0).then_some(session.total_laps),
            safety_car_status: session.safety_car_status,
            packet_count: 0,
            stale: false,
        }
    }

    pub fn geometry(&self) -> TrackGeometry {
        TrackGeometry::for_circuit(&self.circuit)
    }
}
