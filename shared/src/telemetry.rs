/*!
Telemetry record types and their binary layout.

All multi-byte values are little-endian. A record is laid out as the
detection count (`i32`), the [`Position`], then every [`Detection`] in
emission order. That byte sequence is also the CRC input of the frame
carrying it.
*/

use crate::error::{Result, SharedError};
use crate::protocol::{DETECTION_SIZE, FIELD_DETECTION_SIZE, POSITION_SIZE, SCREEN_DETECTION_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Robot pose as last reported by the GPS sensor
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub frame_count: i32,
    pub status: u32,
    /// Meters
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Degrees
    pub azimuth: f32,
    pub elevation: f32,
    pub rotation: f32,
}

impl Position {
    pub const STATUS_CONNECTED: u32 = 0x0000_0001;
    pub const STATUS_NODOTS: u32 = 0x0000_0002;
    pub const STATUS_NORAWBITS: u32 = 0x0000_0004;
    pub const STATUS_NOGROUPS: u32 = 0x0000_0008;
    pub const STATUS_NOBITS: u32 = 0x0000_0010;
    pub const STATUS_PIXELERROR: u32 = 0x0000_0020;
    pub const STATUS_SOLVER: u32 = 0x0000_0040;
    pub const STATUS_ANGLEJUMP: u32 = 0x0000_0080;
    pub const STATUS_POSJUMP: u32 = 0x0000_0100;
    pub const STATUS_NOSOLUTION: u32 = 0x0000_0200;
    pub const STATUS_KALMAN_EST: u32 = 0x0010_0000;

    /// Whether the link-connected bit is set
    pub fn is_connected(&self) -> bool {
        self.status & Self::STATUS_CONNECTED != 0
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.frame_count);
        buf.put_u32_le(self.status);
        buf.put_f32_le(self.x);
        buf.put_f32_le(self.y);
        buf.put_f32_le(self.z);
        buf.put_f32_le(self.azimuth);
        buf.put_f32_le(self.elevation);
        buf.put_f32_le(self.rotation);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        SharedError::ensure_len(POSITION_SIZE, buf.remaining())?;
        Ok(Self {
            frame_count: buf.get_i32_le(),
            status: buf.get_u32_le(),
            x: buf.get_f32_le(),
            y: buf.get_f32_le(),
            z: buf.get_f32_le(),
            azimuth: buf.get_f32_le(),
            elevation: buf.get_f32_le(),
            rotation: buf.get_f32_le(),
        })
    }
}

/// Bounding box in screen pixels, `x`/`y` being the top-left corner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenDetection {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ScreenDetection {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Centre of the bounding box in pixels
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.x);
        buf.put_i32_le(self.y);
        buf.put_i32_le(self.width);
        buf.put_i32_le(self.height);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        SharedError::ensure_len(SCREEN_DETECTION_SIZE, buf.remaining())?;
        Ok(Self {
            x: buf.get_i32_le(),
            y: buf.get_i32_le(),
            width: buf.get_i32_le(),
            height: buf.get_i32_le(),
        })
    }
}

/// Field-relative position of a detected object, in meters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldDetection {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl FieldDetection {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_f32_le(self.x);
        buf.put_f32_le(self.y);
        buf.put_f32_le(self.z);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        SharedError::ensure_len(FIELD_DETECTION_SIZE, buf.remaining())?;
        Ok(Self {
            x: buf.get_f32_le(),
            y: buf.get_f32_le(),
            z: buf.get_f32_le(),
        })
    }
}

/// One detected object
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "class")]
    pub class_id: i32,
    #[serde(rename = "prob")]
    pub probability: f32,
    /// Meters from the camera
    pub depth: f32,
    #[serde(rename = "screenLocation")]
    pub screen: ScreenDetection,
    #[serde(rename = "mapLocation")]
    pub field: FieldDetection,
}

impl Detection {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.class_id);
        buf.put_f32_le(self.probability);
        buf.put_f32_le(self.depth);
        self.screen.encode(buf);
        self.field.encode(buf);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        SharedError::ensure_len(DETECTION_SIZE, buf.remaining())?;
        Ok(Self {
            class_id: buf.get_i32_le(),
            probability: buf.get_f32_le(),
            depth: buf.get_f32_le(),
            screen: ScreenDetection::decode(buf)?,
            field: FieldDetection::decode(buf)?,
        })
    }
}

/// Position snapshot plus the detections of one processing cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub position: Position,
    pub detections: Vec<Detection>,
}

impl TelemetryRecord {
    pub fn new(position: Position, detections: Vec<Detection>) -> Self {
        Self { position, detections }
    }

    /// Size of the binary encoding in bytes
    pub fn encoded_len(&self) -> usize {
        4 + POSITION_SIZE + self.detections.len() * DETECTION_SIZE
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.detections.len() as i32);
        self.position.encode(buf);
        for detection in &self.detections {
            detection.encode(buf);
        }
    }

    /// Binary encoding as a standalone buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        SharedError::ensure_len(4, buf.remaining())?;
        let count = buf.get_i32_le();
        if count < 0 {
            return Err(SharedError::invalid_frame(format!("negative detection count {}", count)));
        }
        let count = count as usize;
        SharedError::ensure_len(POSITION_SIZE + count.saturating_mul(DETECTION_SIZE), buf.remaining())?;

        let position = Position::decode(buf)?;
        let detections = (0..count)
            .map(|_| Detection::decode(buf))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { position, detections })
    }

    /// Decode a record that must span exactly `data`
    pub fn from_bytes(mut data: &[u8]) -> Result<Self> {
        let record = Self::decode(&mut data)?;
        if !data.is_empty() {
            return Err(SharedError::invalid_frame(format!(
                "{} trailing bytes after record",
                data.len()
            )));
        }
        Ok(record)
    }
}
