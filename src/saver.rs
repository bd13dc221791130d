//! Session save writer: one pretty-printed JSON document per save.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use log::info;

use crate::documents::{SaveReason, SessionDocument};
use crate::errors::PitwallError;
use crate::session::store::DriverRecordStore;

/// Finalize derived state and write the whole session to `directory`. The
/// file name carries the session id and capture timestamp so repeated saves
/// of the same session never clobber each other.
pub fn save_session(
    store: &Arc<RwLock<DriverRecordStore>>,
    directory: &Path,
    save_reason: SaveReason,
    pit_wear_threshold_pct: f32,
) -> Result<PathBuf, PitwallError> {
    let document = {
        let mut store = store.write().expect("store lock poisoned");
        store.finalize_derived();
        SessionDocument::capture(&store, save_reason, pit_wear_threshold_pct)
    };

    let file_name = format!(
        "session-{}-{}.json",
        document.session_id,
        document.saved_at.timestamp()
    );
    let path = directory.join(file_name);
    write_document(&document, &path)?;
    info!(
        "saved session {} ({} drivers) to {:?}",
        document.session_id,
        document.drivers.len(),
        path
    );
    Ok(path)
}

fn write_document(document: &SessionDocument, path: &Path) -> Result<(), PitwallError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PitwallError::SaveIoError { source: e })?;
    }
    let file = File::create(path).map_err(|e| PitwallError::SaveIoError { source: e })?;
    serde_json::to_writer_pretty(BufWriter::new(file), document)
        .map_err(|e| PitwallError::SaveSerializeError { source: e })
}
