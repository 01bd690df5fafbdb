/*!
GPS beacon frame decoding.

Each frame is 16 bytes:

```text
[0]      sequence (unused)
[1]      status code
[2..14]  x, y, z, azimuth, elevation, rotation as i16 LE
[14..16] terminator CC 33
```

Positions are in units of 0.1 mm, angles in 1/32768 of a half turn.
*/

use crate::error::{Result, SharedError};
use crate::offset::Offset;
use crate::protocol::{GPS_FRAME_SIZE, GPS_STATUS_SOLVED, GPS_TERMINATOR};
use crate::smoother::PositionSmoother;
use crate::telemetry::Position;

/// Raw distance units per meter
pub const DISTANCE_SCALE: f64 = 10_000.0;

/// Raw angle units per 180 degrees
pub const ANGLE_SCALE: f64 = 32_768.0;

/// One undecoded beacon frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpsFrame {
    pub sequence: u8,
    pub status: u8,
    pub x: i16,
    pub y: i16,
    pub z: i16,
    pub azimuth: i16,
    pub elevation: i16,
    pub rotation: i16,
}

impl GpsFrame {
    /// Parse a frame read up to and including its terminator
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != GPS_FRAME_SIZE {
            return Err(SharedError::invalid_frame(format!(
                "GPS frame is {} bytes, expected {}",
                data.len(),
                GPS_FRAME_SIZE
            )));
        }
        if data[GPS_FRAME_SIZE - 2..] != GPS_TERMINATOR {
            return Err(SharedError::invalid_frame(format!(
                "GPS frame terminator {:02X?}",
                &data[GPS_FRAME_SIZE - 2..]
            )));
        }

        let field = |i: usize| i16::from_le_bytes([data[2 + 2 * i], data[3 + 2 * i]]);
        Ok(Self {
            sequence: data[0],
            status: data[1],
            x: field(0),
            y: field(1),
            z: field(2),
            azimuth: field(3),
            elevation: field(4),
            rotation: field(5),
        })
    }

    /// Wire form of this frame, terminator included
    pub fn to_bytes(&self) -> [u8; GPS_FRAME_SIZE] {
        let mut out = [0u8; GPS_FRAME_SIZE];
        out[0] = self.sequence;
        out[1] = self.status;
        let fields = [self.x, self.y, self.z, self.azimuth, self.elevation, self.rotation];
        for (i, value) in fields.iter().enumerate() {
            out[2 + 2 * i..4 + 2 * i].copy_from_slice(&value.to_le_bytes());
        }
        out[GPS_FRAME_SIZE - 2..].copy_from_slice(&GPS_TERMINATOR);
        out
    }

    pub fn is_solved(&self) -> bool {
        self.status == GPS_STATUS_SOLVED
    }
}

/// Public status bitmask for a sensor status code
pub fn status_bits(code: u8) -> u32 {
    let mut bits = Position::STATUS_CONNECTED;
    if (1..32).contains(&code) {
        bits |= 1 << code;
    }
    bits
}

/// Wrap an angle into `[0, 360)`
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// What a decoded frame changes in the shared position
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GpsUpdate {
    /// Solved fix: replace the whole position
    Fix(Position),
    /// Unsolved frame: only the status bits change
    Status(u32),
}

/// Per-link decoding state: frame counter and smoothing filter
#[derive(Debug, Clone)]
pub struct GpsDecoder {
    smoother: PositionSmoother,
    frame_count: i32,
}

impl GpsDecoder {
    pub fn new(smoothing_window: usize) -> Self {
        Self {
            smoother: PositionSmoother::new(smoothing_window),
            frame_count: 0,
        }
    }

    /// Frames decoded since the last reset
    pub fn frame_count(&self) -> i32 {
        self.frame_count
    }

    /// Forget the frame count (link dropped)
    pub fn reset(&mut self) {
        self.frame_count = 0;
    }

    /// Convert a frame using the current GPS mounting offset
    pub fn decode(&mut self, frame: &GpsFrame, offset: &Offset) -> GpsUpdate {
        self.frame_count = self.frame_count.wrapping_add(1);
        let status = status_bits(frame.status);

        if !frame.is_solved() {
            return GpsUpdate::Status(status);
        }

        let z = frame.z as f64 / DISTANCE_SCALE;
        let azimuth = wrap_degrees(raw_angle(frame.azimuth) - offset.heading_offset);
        let elevation = raw_angle(frame.elevation);
        let rotation = raw_angle(frame.rotation);

        // antenna sits off the rotation centre: remove its offset, rotated by -azimuth
        let (sin, cos) = azimuth.to_radians().sin_cos();
        let mount_x = offset.x * cos + offset.y * sin;
        let mount_y = -offset.x * sin + offset.y * cos;
        let x = frame.x as f64 / DISTANCE_SCALE - mount_x;
        let y = frame.y as f64 / DISTANCE_SCALE - mount_y;

        let (x, y) = self.smoother.update(x, y);

        GpsUpdate::Fix(Position {
            frame_count: self.frame_count,
            status,
            x: x as f32,
            y: y as f32,
            z: z as f32,
            azimuth: azimuth as f32,
            elevation: elevation as f32,
            rotation: rotation as f32,
        })
    }
}

impl Default for GpsDecoder {
    fn default() -> Self {
        Self::new(crate::smoother::DEFAULT_WINDOW)
    }
}

fn raw_angle(raw: i16) -> f64 {
    raw as f64 / ANGLE_SCALE * 180.0
}
