//! Event sources and the ingest dispatch loop.
//!
//! Two sources produce the same decoded [`TelemetryEvent`] stream: a UDP
//! socket receiving one JSON event per datagram from the external wire
//! decoder, and a JSON-lines capture file for replay. [`run_ingest`] drives
//! either one into the shared store, optionally teeing the raw events to a
//! capture writer channel.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter},
    net::UdpSocket,
    path::{Path, PathBuf},
    sync::{Arc, RwLock, mpsc::Receiver, mpsc::Sender},
    time::Duration,
};

use log::{debug, info, warn};
use serde_jsonlines::{JsonLinesReader, JsonLinesWriter};

use crate::errors::PitwallError;
use crate::packets::TelemetryEvent;
use crate::session::store::DriverRecordStore;

const UDP_DATAGRAM_BUFFER_BYTES: usize = 16384;

/// One decoded event at a time, blocking. Silence and end-of-stream are
/// reported through dedicated error variants so the dispatch loop can react
/// without tearing down.
pub trait EventSource {
    fn next_event(&mut self) -> Result<TelemetryEvent, PitwallError>;
}

/// JSON datagrams from the external wire decoder. The read timeout doubles
/// as the silence watchdog: every expiry surfaces as `TelemetrySilence`.
pub struct UdpEventSource {
    socket: UdpSocket,
    silence_timeout: Duration,
    buffer: Vec<u8>,
}

impl UdpEventSource {
    pub fn bind(addr: &str, silence_timeout: Duration) -> Result<Self, PitwallError> {
        let socket = UdpSocket::bind(addr).map_err(|e| PitwallError::UdpBindError {
            addr: addr.to_string(),
            source: e,
        })?;
        socket
            .set_read_timeout(Some(silence_timeout))
            .map_err(|e| PitwallError::UdpReceiveError { source: e })?;
        info!("listening for telemetry events on {}", addr);
        Ok(Self {
            socket,
            silence_timeout,
            buffer: vec![0u8; UDP_DATAGRAM_BUFFER_BYTES],
        })
    }
}

impl EventSource for UdpEventSource {
    fn next_event(&mut self) -> Result<TelemetryEvent, PitwallError> {
        let received = match self.socket.recv(&mut self.buffer) {
            Ok(received) => received,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                return Err(PitwallError::TelemetrySilence {
                    silent_for_s: self.silence_timeout.as_secs(),
                });
            }
            Err(e) => return Err(PitwallError::UdpReceiveError { source: e }),
        };
        serde_json::from_slice(&self.buffer[..received])
            .map_err(|e| PitwallError::EventDecodeError { source: e })
    }
}

/// Replays a JSON-lines capture file, one event per line.
pub struct ReplayEventSource {
    reader: JsonLinesReader<BufReader<File>>,
}

impl ReplayEventSource {
    pub fn open(path: &Path) -> Result<Self, PitwallError> {
        if !path.exists() {
            return Err(PitwallError::InvalidCaptureFile {
                path: format!("{:?}", path),
            });
        }
        let file = File::open(path).map_err(|e| PitwallError::CaptureIoError { source: e })?;
        Ok(Self {
            reader: JsonLinesReader::new(BufReader::new(file)),
        })
    }
}

impl EventSource for ReplayEventSource {
    fn next_event(&mut self) -> Result<TelemetryEvent, PitwallError> {
        match self.reader.read::<TelemetryEvent>() {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(PitwallError::EndOfCapture),
            // JsonLinesReader reports a malformed line as InvalidData; the
            // dispatch loop skips those and keeps replaying
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                Err(PitwallError::EventDecodeError {
                    source: serde_json::Error::io(e),
                })
            }
            Err(e) => Err(PitwallError::CaptureIoError { source: e }),
        }
    }
}

/// Drive a source into the store until it ends. Malformed events are logged
/// and skipped, silence marks the store stale, anything else aborts.
pub fn run_ingest(
    mut source: impl EventSource,
    store: Arc<RwLock<DriverRecordStore>>,
    capture_tx: Option<Sender<TelemetryEvent>>,
) -> Result<(), PitwallError> {
    loop {
        match source.next_event() {
            Ok(event) => {
                if let Some(capture) = &capture_tx {
                    capture.send(event.clone())?;
                }
                store
                    .write()
                    .expect("store lock poisoned")
                    .apply_event(event);
            }
            Err(PitwallError::TelemetrySilence { silent_for_s }) => {
                debug!("no events for {}s", silent_for_s);
                store.write().expect("store lock poisoned").mark_stale();
            }
            Err(PitwallError::EventDecodeError { source }) => {
                warn!("skipping malformed event: {}", source);
            }
            Err(PitwallError::EndOfCapture) => {
                info!("capture replay finished");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

/// Capture writer thread body: drains the tee channel into a JSON-lines
/// file until every sender hangs up.
pub fn write_capture(
    file: &PathBuf,
    events_rx: Receiver<TelemetryEvent>,
) -> Result<(), PitwallError> {
    let capture_file = File::create(file).map_err(|e| PitwallError::SaveIoError { source: e })?;
    let mut writer = JsonLinesWriter::new(BufWriter::new(capture_file));
    for event in &events_rx {
        writer
            .write(&event)
            .map_err(|e| PitwallError::SaveIoError { source: e })?;
    }
    writer
        .flush()
        .map_err(|e| PitwallError::SaveIoError { source: e })?;
    Ok(())
}
