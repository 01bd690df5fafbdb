/*!
GPS link: streams beacon frames from the GPS sensor into the shared
[`Position`].
*/

use crate::link::{is_timeout, LinkProtocol, LinkSettings, LinkState, Port, SerialLink};
use crate::serial::SerialBackend;
use chrono::Local;
use parking_lot::Mutex;
use shared::protocol::{GPS_FRAME_SIZE, GPS_TERMINATOR};
use shared::{GpsDecoder, GpsFrame, GpsUpdate, Offset, OffsetRecord, OffsetStore, Position};
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest run of bytes kept while hunting for a terminator
const MAX_FRAME_SCAN: usize = 4 * GPS_FRAME_SIZE;

/// Read one terminator-delimited frame into `buf`.
///
/// Returns `Ok(true)` once `buf` ends with the terminator, `Ok(false)` when
/// the scan limit was hit first (caller drops the bytes). Bytes received
/// before a read timeout stay in `buf`.
fn read_frame(port: &mut Port, buf: &mut Vec<u8>) -> io::Result<bool> {
    loop {
        if buf.ends_with(&GPS_TERMINATOR) {
            return Ok(true);
        }
        if buf.len() >= MAX_FRAME_SCAN {
            return Ok(false);
        }
        let limit = (MAX_FRAME_SCAN - buf.len()) as u64;
        if io::Read::take(&mut *port, limit).read_until(GPS_TERMINATOR[1], buf)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "GPS port closed"));
        }
    }
}

/// Streaming ingest over one GPS connection
pub struct GpsProtocol {
    decoder: GpsDecoder,
    position: Arc<Mutex<Position>>,
    offset: Arc<Mutex<Offset>>,
    trace_file: Option<PathBuf>,
}

impl GpsProtocol {
    pub fn new(
        smoothing_window: usize,
        position: Arc<Mutex<Position>>,
        offset: Arc<Mutex<Offset>>,
        trace_file: Option<PathBuf>,
    ) -> Self {
        Self {
            decoder: GpsDecoder::new(smoothing_window),
            position,
            offset,
            trace_file,
        }
    }

    fn ingest(&mut self, data: &[u8]) {
        let frame = match GpsFrame::parse(data) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropped GPS frame: {}", e);
                return;
            }
        };

        let offset = *self.offset.lock();
        match self.decoder.decode(&frame, &offset) {
            GpsUpdate::Fix(position) => {
                *self.position.lock() = position;
                if let Some(path) = &self.trace_file {
                    trace_fix(path, &position);
                }
            }
            GpsUpdate::Status(status) => {
                let mut position = *self.position.lock();
                position.status = status;
                *self.position.lock() = position;
            }
        }
    }
}

impl LinkProtocol for GpsProtocol {
    fn run_session(&mut self, port: &mut Port, running: &AtomicBool) -> io::Result<()> {
        let mut buf = Vec::with_capacity(MAX_FRAME_SCAN);

        while running.load(Ordering::SeqCst) {
            match read_frame(port, &mut buf) {
                Ok(true) => {
                    self.ingest(&buf);
                    buf.clear();
                }
                Ok(false) => {
                    debug!("Dropped {} bytes without a GPS terminator", buf.len());
                    buf.clear();
                }
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn on_disconnect(&mut self) {
        self.decoder.reset();
        let mut position = *self.position.lock();
        position.frame_count = 0;
        position.status = 0;
        *self.position.lock() = position;
    }
}

/// Append a smoothed fix to the diagnostic trace
fn trace_fix(path: &Path, position: &Position) {
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| {
            writeln!(
                file,
                "{}, {}, {}",
                Local::now().to_rfc3339(),
                position.x,
                position.y
            )
        });

    if let Err(e) = result {
        warn!("Could not write GPS trace {}: {}", path.display(), e);
    }
}

/// Serial link to the GPS sensor
pub struct GpsLink {
    link: SerialLink,
    smoothing_window: usize,
    position: Arc<Mutex<Position>>,
    offset: Arc<Mutex<Offset>>,
    store: Option<Arc<dyn OffsetStore>>,
    trace_file: Option<PathBuf>,
}

impl GpsLink {
    pub fn new(settings: LinkSettings, backend: Arc<dyn SerialBackend>, smoothing_window: usize) -> Self {
        Self {
            link: SerialLink::new(settings, backend),
            smoothing_window,
            position: Arc::new(Mutex::new(Position::default())),
            offset: Arc::new(Mutex::new(Offset::default())),
            store: None,
            trace_file: None,
        }
    }

    /// Start from an already-normalized mounting offset
    pub fn with_offset(self, offset: Offset) -> Self {
        *self.offset.lock() = offset;
        self
    }

    /// Persist every offset update through `store`
    pub fn with_store(mut self, store: Arc<dyn OffsetStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Append every smoothed fix to `path`
    pub fn with_trace(mut self, path: PathBuf) -> Self {
        self.trace_file = Some(path);
        self
    }

    pub fn start(&mut self) -> io::Result<()> {
        let protocol = GpsProtocol::new(
            self.smoothing_window,
            Arc::clone(&self.position),
            Arc::clone(&self.offset),
            self.trace_file.clone(),
        );
        self.link.start(protocol)
    }

    pub fn stop(&mut self) {
        self.link.stop();
    }

    /// Copy of the latest position
    pub fn position(&self) -> Position {
        *self.position.lock()
    }

    pub fn offset(&self) -> Offset {
        *self.offset.lock()
    }

    /// Replace the GPS mounting offset once it is persisted; an invalid unit
    /// or a failed save leaves everything untouched
    pub fn update_offset(&self, record: &OffsetRecord) -> shared::Result<()> {
        let offset = record.to_offset()?;
        if let Some(store) = &self.store {
            store.save(record)?;
        }

        *self.offset.lock() = offset;
        info!(
            "📐 GPS offset set to ({:.3}, {:.3}, {:.3}) m, heading {}°",
            offset.x, offset.y, offset.z, offset.heading_offset
        );
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub fn state(&self) -> LinkState {
        self.link.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::tests::{test_settings, wait_for};
    use crate::serial::mock::{MockPort, MockSerial, PortHandle};
    use shared::protocol::GPS_STATUS_SOLVED;
    use shared::{JsonOffsetStore, SharedError};
    use std::time::Duration;

    fn frame(status: u8, x: i16, y: i16, azimuth: i16) -> [u8; GPS_FRAME_SIZE] {
        GpsFrame {
            sequence: 0,
            status,
            x,
            y,
            z: 1000,
            azimuth,
            elevation: 0,
            rotation: 0,
        }
        .to_bytes()
    }

    fn gps_backend(ports: Vec<MockPort>) -> Arc<MockSerial> {
        let backend = Arc::new(MockSerial::new());
        backend.add_device("/dev/ttyACM2", "VEX Robotics GPS Sensor - User");
        for port in ports {
            backend.push_port(port);
        }
        backend
    }

    fn connected_link(window: usize) -> (GpsLink, PortHandle) {
        let (port, handle) = MockPort::new();
        let mut link = GpsLink::new(test_settings("gps", "GPS.*User"), gps_backend(vec![port]), window);
        link.start().unwrap();
        assert!(wait_for(|| link.is_connected()));
        (link, handle)
    }

    #[test]
    fn test_solved_frame_updates_position() {
        let (mut link, handle) = connected_link(1);

        handle.inject(&frame(GPS_STATUS_SOLVED, 10_000, -5_000, 16_384));
        assert!(wait_for(|| link.position().frame_count == 1));

        let position = link.position();
        assert_eq!(position.status, Position::STATUS_CONNECTED | (1 << 20));
        assert!((position.x - 1.0).abs() < 1e-6);
        assert!((position.y + 0.5).abs() < 1e-6);
        assert!((position.z - 0.1).abs() < 1e-6);
        assert!((position.azimuth - 90.0).abs() < 1e-4);
        link.stop();
    }

    #[test]
    fn test_unsolved_frame_only_touches_status() {
        let (mut link, handle) = connected_link(1);

        handle.inject(&frame(GPS_STATUS_SOLVED, 10_000, 10_000, 0));
        assert!(wait_for(|| link.position().frame_count == 1));

        handle.inject(&frame(5, 20_000, 20_000, 0));
        assert!(wait_for(|| link.position().status == Position::STATUS_CONNECTED | (1 << 5)));
        let position = link.position();
        assert_eq!(position.frame_count, 1);
        assert!((position.x - 1.0).abs() < 1e-6);

        // counter kept running through the unsolved frame
        handle.inject(&frame(GPS_STATUS_SOLVED, 10_000, 10_000, 0));
        assert!(wait_for(|| link.position().frame_count == 3));
        link.stop();
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let (mut link, handle) = connected_link(1);

        // short frame: terminator after 6 bytes
        handle.inject(&[1, 20, 0, 0, 0xCC, 0x33]);
        // long run without a terminator
        handle.inject(&[0x11; 70]);
        std::thread::sleep(Duration::from_millis(50));
        assert!(wait_for(|| handle.pending() == 0));
        assert_eq!(link.position(), Position::default());
        assert!(link.is_connected());

        handle.inject(&frame(GPS_STATUS_SOLVED, 0, 20_000, 0));
        assert!(wait_for(|| link.position().frame_count == 1));
        assert!((link.position().y - 2.0).abs() < 1e-6);
        link.stop();
    }

    #[test]
    fn test_frame_split_across_reads() {
        let (mut link, handle) = connected_link(1);
        let bytes = frame(GPS_STATUS_SOLVED, 5_000, 5_000, 0);

        handle.inject(&bytes[..7]);
        std::thread::sleep(Duration::from_millis(30));
        handle.inject(&bytes[7..]);
        assert!(wait_for(|| link.position().frame_count == 1));
        link.stop();
    }

    #[test]
    fn test_fixes_are_smoothed() {
        let (mut link, handle) = connected_link(2);

        handle.inject(&frame(GPS_STATUS_SOLVED, 10_000, 0, 0));
        handle.inject(&frame(GPS_STATUS_SOLVED, 20_000, 0, 0));
        assert!(wait_for(|| link.position().frame_count == 2));
        assert!((link.position().x - 1.5).abs() < 1e-6);
        link.stop();
    }

    #[test]
    fn test_fault_clears_status_and_reconnects() {
        let (failing, first) = MockPort::failing();
        let (port, second) = MockPort::new();
        let backend = gps_backend(vec![failing, port]);
        let mut link = GpsLink::new(test_settings("gps", "GPS.*User"), backend.clone(), 1);

        first.inject(&frame(GPS_STATUS_SOLVED, 10_000, 0, 0));
        link.start().unwrap();

        // the failing port delivers one fix, then breaks
        assert!(wait_for(|| backend.opened().len() == 2 && link.is_connected()));
        let position = link.position();
        assert_eq!(position.status, 0);
        assert_eq!(position.frame_count, 0);
        assert!((position.x - 1.0).abs() < 1e-6);

        // counter restarts on the new connection
        second.inject(&frame(GPS_STATUS_SOLVED, 10_000, 0, 0));
        assert!(wait_for(|| link.position().status != 0));
        assert_eq!(link.position().frame_count, 1);

        link.stop();
        assert_eq!(link.position().status, 0);
        assert_eq!(link.state(), LinkState::Stopped);
    }

    #[test]
    fn test_mount_offset_is_applied() {
        let (port, handle) = MockPort::new();
        let mut link = GpsLink::new(test_settings("gps", "GPS.*User"), gps_backend(vec![port]), 1)
            .with_offset(Offset {
                x: 0.0,
                y: 0.1,
                z: 0.0,
                heading_offset: 0.0,
            });
        link.start().unwrap();
        assert!(wait_for(|| link.is_connected()));

        handle.inject(&frame(GPS_STATUS_SOLVED, 10_000, 10_000, 0));
        assert!(wait_for(|| link.position().frame_count == 1));
        assert!((link.position().x - 1.0).abs() < 1e-6);
        assert!((link.position().y - 0.9).abs() < 1e-6);
        link.stop();
    }

    #[test]
    fn test_update_offset_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gps_offsets.json");
        let store = Arc::new(JsonOffsetStore::new(&path));
        let link = GpsLink::new(test_settings("gps", "GPS.*User"), gps_backend(vec![]), 1)
            .with_store(store.clone());

        let record = OffsetRecord {
            x: 10.0,
            y: -5.0,
            z: 0.0,
            unit: "cm".to_string(),
            heading_offset: 90.0,
            elevation_offset: None,
        };
        link.update_offset(&record).unwrap();
        assert!((link.offset().x - 0.1).abs() < 1e-12);
        assert!((link.offset().y + 0.05).abs() < 1e-12);
        assert_eq!(store.load().unwrap(), record);
    }

    #[test]
    fn test_invalid_unit_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gps_offsets.json");
        let link = GpsLink::new(test_settings("gps", "GPS.*User"), gps_backend(vec![]), 1)
            .with_store(Arc::new(JsonOffsetStore::new(&path)));

        let record = OffsetRecord {
            unit: "furlongs".to_string(),
            x: 1.0,
            ..OffsetRecord::gps_default()
        };
        let err = link.update_offset(&record).unwrap_err();
        assert!(matches!(err, SharedError::InvalidUnit(ref unit) if unit == "furlongs"));
        assert_eq!(link.offset(), Offset::default());
        assert!(!path.exists());
    }

    #[test]
    fn test_failed_save_keeps_previous_offset() {
        struct FailingStore;
        impl OffsetStore for FailingStore {
            fn save(&self, _record: &OffsetRecord) -> shared::Result<()> {
                Err(SharedError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "read-only")))
            }
        }

        let link = GpsLink::new(test_settings("gps", "GPS.*User"), gps_backend(vec![]), 1)
            .with_store(Arc::new(FailingStore));

        let record = OffsetRecord {
            x: 25.0,
            unit: "cm".to_string(),
            ..OffsetRecord::gps_default()
        };
        assert!(matches!(link.update_offset(&record), Err(SharedError::Io(_))));
        assert_eq!(link.offset(), Offset::default());
    }

    #[test]
    fn test_trace_file_records_fixes() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("gps_trace.txt");
        let (port, handle) = MockPort::new();
        let mut link = GpsLink::new(test_settings("gps", "GPS.*User"), gps_backend(vec![port]), 1)
            .with_trace(trace.clone());
        link.start().unwrap();
        assert!(wait_for(|| link.is_connected()));

        handle.inject(&frame(GPS_STATUS_SOLVED, 10_000, 20_000, 0));
        handle.inject(&frame(3, 0, 0, 0));
        assert!(wait_for(|| link.position().status == Position::STATUS_CONNECTED | (1 << 3)));
        link.stop();

        let content = std::fs::read_to_string(&trace).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        let fields: Vec<&str> = lines[0].split(", ").collect();
        assert_eq!(fields.len(), 3);
        assert!(chrono::DateTime::parse_from_rfc3339(fields[0]).is_ok());
        assert_eq!(fields[1], "1");
        assert_eq!(fields[2], "2");
    }
}
