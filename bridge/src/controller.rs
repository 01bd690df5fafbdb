/*!
Controller link: answers each request line from the V5 brain with the
latest telemetry frame.
*/

use crate::link::{is_timeout, LinkProtocol, LinkSettings, LinkState, Port, SerialLink};
use crate::serial::SerialBackend;
use parking_lot::Mutex;
use shared::protocol::REQUEST_TOKEN;
use shared::{TelemetryFrame, TelemetryRecord};
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest request line kept while waiting for its newline
const MAX_REQUEST_LINE: usize = 64;

/// Request/response loop over one controller connection
pub struct ControllerProtocol {
    record: Arc<Mutex<TelemetryRecord>>,
}

impl ControllerProtocol {
    pub fn new(record: Arc<Mutex<TelemetryRecord>>) -> Self {
        Self { record }
    }

    fn reply(&self, port: &mut Port) -> io::Result<()> {
        let record = self.record.lock().clone();

        let frame = match TelemetryFrame::encode(&record) {
            Ok(frame) => frame,
            Err(e) => {
                // too many detections for a u16 length; the controller gets nothing
                warn!("Telemetry frame not sent: {}", e);
                return Ok(());
            }
        };

        let port = port.get_mut();
        port.write_all(&frame)?;
        port.flush()?;

        debug!(
            "📤 Sent telemetry frame {} ({} detections, {} bytes)",
            hex::encode_upper(&frame[..shared::protocol::FRAME_HEADER_SIZE]),
            record.detections.len(),
            frame.len()
        );
        Ok(())
    }
}

impl LinkProtocol for ControllerProtocol {
    fn run_session(&mut self, port: &mut Port, running: &AtomicBool) -> io::Result<()> {
        let mut line = Vec::new();

        while running.load(Ordering::SeqCst) {
            let limit = (MAX_REQUEST_LINE - line.len()) as u64;
            match io::Read::take(&mut *port, limit).read_until(b'\n', &mut line) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "controller port closed"));
                }
                Ok(_) => {
                    if !line.ends_with(b"\n") {
                        if line.len() >= MAX_REQUEST_LINE {
                            debug!("Dropped {} bytes without a newline", line.len());
                            line.clear();
                        }
                        continue;
                    }
                    let is_request = std::str::from_utf8(&line)
                        .map(|text| text.trim_end() == REQUEST_TOKEN)
                        .unwrap_or(false);
                    line.clear();

                    if is_request {
                        self.reply(port)?;
                    }
                }
                // partial bytes stay in `line` until the newline arrives
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Serial link to the robot controller
pub struct ControllerLink {
    link: SerialLink,
    record: Arc<Mutex<TelemetryRecord>>,
}

impl ControllerLink {
    pub fn new(settings: LinkSettings, backend: Arc<dyn SerialBackend>) -> Self {
        Self {
            link: SerialLink::new(settings, backend),
            record: Arc::new(Mutex::new(TelemetryRecord::default())),
        }
    }

    pub fn start(&mut self) -> io::Result<()> {
        let protocol = ControllerProtocol::new(Arc::clone(&self.record));
        self.link.start(protocol)
    }

    pub fn stop(&mut self) {
        self.link.stop();
    }

    /// Replace the record served to the controller
    pub fn set_telemetry(&self, record: TelemetryRecord) {
        *self.record.lock() = record;
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn state(&self) -> LinkState {
        self.link.state()
    }
}
