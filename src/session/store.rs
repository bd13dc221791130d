//! The session-wide collection of driver records and the single entry point
//! for decoded telemetry events.
//!
//! The store owns one [`SessionContext`] plus a record per referenced car
//! index. Ingest threads take a write lock and call [`DriverRecordStore::apply_event`];
//! rendering and save paths read through `&self` accessors only.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::packets::{SessionFragment, TelemetryEvent};
use crate::session::SessionContext;
use crate::session::driver::DriverRecord;

#[derive(Default)]
pub struct DriverRecordStore {
    context: SessionContext,
    drivers: BTreeMap<u8, DriverRecord>,
}

impl DriverRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn driver(&self, car_index: u8) -> Option<&DriverRecord> {
        self.drivers.get(&car_index)
    }

    pub fn drivers(&self) -> impl Iterator<Item = (u8, &DriverRecord)> {
        self.drivers.iter().map(|(index, record)| (*index, record))
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    /// Dispatch one decoded event into the matching record, creating it on
    /// first reference. Unknown car indexes are never an error: the packet
    /// stream references cars before any identity packet arrives.
    pub fn apply_event(&mut self, event: TelemetryEvent) {
        self.context.packet_count += 1;
        self.context.stale = false;

        match event {
            TelemetryEvent::SessionStarted { session } => self.start_session(&session),
            TelemetryEvent::SessionUpdate { session } => self.update_session(&session),
            TelemetryEvent::TotalLaps { total_laps } => self.set_total_laps(total_laps),
            TelemetryEvent::CarSpeed {
                car_index,
                speed_kph,
            } => {
                self.driver_mut(car_index).observe_speed(speed_kph);
            }
            TelemetryEvent::Driver {
                car_index,
                fragment,
            } => {
                debug!("car {}: {} fragment", car_index, fragment.kind_name());
                let context = self.context.clone();
                self.driver_mut(car_index).apply_fragment(fragment, &context);
            }
        }
    }

    fn driver_mut(&mut self, car_index: u8) -> &mut DriverRecord {
        let total_laps = self.context.total_laps;
        self.drivers.entry(car_index).or_insert_with(|| {
            let mut record = DriverRecord::new(car_index);
            if let Some(total_laps) = total_laps {
                record.set_total_laps(total_laps);
            }
            record
        })
    }

    /// A new session replaces everything: records from the previous session
    /// must never bleed into the next one.
    fn start_session(&mut self, session: &SessionFragment) {
        let session_id = self.context.session_id + 1;
        info!(
            "session started: {:?} at {} ({} laps)",
            session.session_type, session.circuit, session.total_laps
        );
        self.drivers.clear();
        self.context = SessionContext::from_fragment(session_id, session);
        if let Some(total_laps) = self.context.total_laps {
            self.set_total_laps(total_laps);
        }
    }

    fn update_session(&mut self, session: &SessionFragment) {
        if self.context.circuit != session.circuit
            || self.context.session_type != session.session_type
        {
            // an update for a session we never saw the start of
            warn!(
                "session update for {:?}/{} does not match known session, re-keying",
                session.session_type, session.circuit
            );
            self.start_session(session);
            return;
        }

        self.context.safety_car_status = session.safety_car_status;
        for record in self.drivers.values_mut() {
            record.observe_safety_car(session.safety_car_status);
        }
        if session.total_laps > 0 && self.context.total_laps != Some(session.total_laps) {
            self.set_total_laps(session.total_laps);
        }
    }

    /// Propagate a known or corrected race length to every record, current
    /// and future.
    fn set_total_laps(&mut self, total_laps: u32) {
        debug!("total laps set to {}", total_laps);
        self.context.total_laps = Some(total_laps);
        for record in self.drivers.values_mut() {
            record.set_total_laps(total_laps);
        }
    }

    /// Flag set by the ingest silence watchdog; any event clears it.
    pub fn mark_stale(&mut self) {
        if !self.context.stale {
            warn!("no telemetry received for a while, marking session stale");
        }
        self.context.stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.context.stale
    }

    /// Write-path finalization before a save or render handoff: derive
    /// every lazily computed field so readers stay pure.
    pub fn finalize_derived(&mut self) {
        let total_laps = self.context.total_laps;
        for record in self.drivers.values_mut() {
            record.finalize_derived(total_laps);
        }
    }
}
