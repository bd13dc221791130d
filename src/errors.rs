// Error types for pitwall

use crate::packets::TelemetryEvent;
use snafu::Snafu;
use std::{io, sync::mpsc::SendError};

#[derive(Debug, Snafu)]
pub enum PitwallError {
    // Errors for the UDP event source
    #[snafu(display("Unable to bind UDP socket on {addr}"))]
    UdpBindError { addr: String, source: io::Error },
    #[snafu(display("Error receiving telemetry datagram"))]
    UdpReceiveError { source: io::Error },
    #[snafu(display("No telemetry received for {silent_for_s} seconds"))]
    TelemetrySilence { silent_for_s: u64 },

    // Errors for the capture replay source
    #[snafu(display("Invalid capture file: {path}"))]
    InvalidCaptureFile { path: String },
    #[snafu(display("Error reading capture file"))]
    CaptureIoError { source: io::Error },
    #[snafu(display("End of capture"))]
    EndOfCapture,

    // Errors while decoding events. Individual malformed events are logged
    // and skipped inside the dispatch loop; this only surfaces when a source
    // cannot produce anything at all.
    #[snafu(display("Error decoding telemetry event"))]
    EventDecodeError { source: serde_json::Error },

    // Errors while forwarding events between the ingest threads
    #[snafu(display("Error forwarding telemetry event"))]
    EventForwardError {
        source: Box<SendError<TelemetryEvent>>,
    },

    // Errors for the session save writer
    #[snafu(display("Error writing session save file"))]
    SaveIoError { source: io::Error },
    #[snafu(display("Error serializing session document"))]
    SaveSerializeError { source: serde_json::Error },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },
}

impl From<SendError<TelemetryEvent>> for PitwallError {
    fn from(value: SendError<TelemetryEvent>) -> Self {
        PitwallError::EventForwardError {
            source: Box::new(value),
        }
    }
}
