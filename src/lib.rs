// Library interface for pitwall
// This allows integration tests to access internal modules

pub mod config;
pub mod documents;
pub mod errors;
pub mod ingest;
pub mod packets;
pub mod saver;
pub mod session;

// Re-export commonly used types
pub use documents::{DriverDocument, SaveReason, SessionDocument};
pub use errors::PitwallError;
pub use packets::{DriverFragment, TelemetryEvent, WheelSet};
pub use session::store::DriverRecordStore;
pub use session::{SessionContext, TrackGeometry};
