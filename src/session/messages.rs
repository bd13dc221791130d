//! Race-control message log and warnings/penalties history for one driver.

use serde::{Deserialize, Serialize};

use crate::packets::{LapDataFragment, TyreCompound};

/// One notable event detected while reconstructing a driver's race.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", content = "details")]
pub enum RaceCtrlMessage {
    TyreChange {
        old_compound: TyreCompound,
        new_compound: TyreCompound,
    },
    EnteringPits {
        pit_stop_number: u8,
    },
    DamageIncrease {
        component: String,
        previous_pct: u8,
        current_pct: u8,
    },
    WingChange,
    Penalty {
        penalty_kind: String,
        infringement: String,
        time_sec: u8,
    },
    Collision {
        other_car_index: u8,
    },
    Overtake {
        overtaken_car_index: u8,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RaceCtrlEntry {
    /// Lap the driver was on when the message was emitted, if known
    pub lap_number: Option<u32>,
    #[serde(flatten)]
    pub message: RaceCtrlMessage,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RaceCtrlLog {
    entries: Vec<RaceCtrlEntry>,
}

impl RaceCtrlLog {
    pub fn push(&mut self, lap_number: Option<u32>, message: RaceCtrlMessage) {
        self.entries.push(RaceCtrlEntry {
            lap_number,
            message,
        });
    }

    pub fn entries(&self) -> &[RaceCtrlEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Point-in-time record of a driver's accumulated warnings and penalties.
/// A new entry is appended whenever any of the counters move.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WarningPenaltyEntry {
    pub lap_number: u32,
    pub total_warnings: u8,
    pub corner_cutting_warnings: u8,
    pub penalties_sec: u8,
    pub unserved_drive_through_pens: u8,
    pub unserved_stop_go_pens: u8,
}

impl WarningPenaltyEntry {
    pub fn from_lap_data(lap_data: &LapDataFragment) -> Self {
        Self {
            lap_number: lap_data.current_lap_num,
            total_warnings: lap_data.total_warnings,
            corner_cutting_warnings: lap_data.corner_cutting_warnings,
            penalties_sec: lap_data.penalties_sec,
            unserved_drive_through_pens: lap_data.num_unserved_drive_through_pens,
            unserved_stop_go_pens: lap_data.num_unserved_stop_go_pens,
        }
    }

    /// True when any counter differs from `other`, ignoring the lap number.
    pub fn differs_from(&self, other: &Self) -> bool {
        self.total_warnings != other.total_warnings
            || self.corner_cutting_warnings != other.corner_cutting_warnings
            || self.penalties_sec != other.penalties_sec
            || self.unserved_drive_through_pens != other.unserved_drive_through_pens
            || self.unserved_stop_go_pens != other.unserved_stop_go_pens
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WarningPenaltyHistory {
    entries: Vec<WarningPenaltyEntry>,
}

impl WarningPenaltyHistory {
    /// Record the counters from a lap-data fragment if anything moved.
    pub fn observe(&mut self, lap_data: &LapDataFragment) {
        let entry = WarningPenaltyEntry::from_lap_data(lap_data);
        match self.entries.last() {
            Some(last) if !entry.differs_from(last) => {}
            _ => self.entries.push(entry),
        }
    }

    pub fn entries(&self) -> &[WarningPenaltyEntry] {
        &self.entries
    }
}
