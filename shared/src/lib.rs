/*!
# Shared Types and Utilities

This crate contains the wire types, codecs and geometry shared by the V5
vision bridge components. Nothing in here touches a serial port.

## Core Types

- [`Position`] - robot pose reported by the GPS sensor
- [`Detection`] - one detected object, on screen and on the field
- [`TelemetryRecord`] - position + detections, as sent to the controller
- [`GpsDecoder`] - turns raw beacon frames into positions
- [`FieldMapper`] - camera-relative detection to field coordinates

## Modules

- [`crc`] - CRC32 used on outbound frames
- [`telemetry`] - record types and their binary layout
- [`frame`] - outbound frame header encoding and validation
- [`gps`] - GPS frame decoding and status bits
- [`smoother`] - moving-average position filter
- [`transform`] - rotation matrix and field projection
- [`depth`] - depth of a detection from a depth frame
- [`offset`] - mounting offsets, units and persistence
- [`error`] - Common error types
*/

pub mod crc;
pub mod depth;
pub mod error;
pub mod frame;
pub mod gps;
pub mod offset;
pub mod smoother;
pub mod telemetry;
pub mod transform;

// Re-export commonly used types
pub use depth::DepthImage;
pub use error::{Result, SharedError};
pub use frame::{FrameHeader, TelemetryFrame};
pub use gps::{GpsDecoder, GpsFrame, GpsUpdate};
pub use offset::{CameraOffset, JsonOffsetStore, LengthUnit, Offset, OffsetRecord, OffsetStore};
pub use smoother::{MovingAverage, PositionSmoother};
pub use telemetry::{Detection, FieldDetection, Position, ScreenDetection, TelemetryRecord};
pub use transform::{CameraIntrinsics, FieldMapper, Matrix3};

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Magic bytes opening every outbound frame
    pub const FRAME_MAGIC: [u8; 4] = [0xAA, 0x55, 0xCC, 0x33];

    /// Size of the outbound frame header (magic + len + type + crc)
    pub const FRAME_HEADER_SIZE: usize = 12;

    /// Packet type of a telemetry record frame
    pub const PACKET_TYPE_TELEMETRY: u16 = 0x0001;

    /// ASCII line the controller sends to request a telemetry frame
    pub const REQUEST_TOKEN: &str = "AA55CC3301";

    /// Serialized size of a `Position`
    pub const POSITION_SIZE: usize = 32;

    /// Serialized size of a `ScreenDetection`
    pub const SCREEN_DETECTION_SIZE: usize = 16;

    /// Serialized size of a `FieldDetection`
    pub const FIELD_DETECTION_SIZE: usize = 12;

    /// Serialized size of a `Detection` (class, prob, depth + both locations)
    pub const DETECTION_SIZE: usize = 12 + SCREEN_DETECTION_SIZE + FIELD_DETECTION_SIZE;

    /// Length of one inbound GPS frame, terminator included
    pub const GPS_FRAME_SIZE: usize = 16;

    /// Terminator closing every inbound GPS frame
    pub const GPS_TERMINATOR: [u8; 2] = [0xCC, 0x33];

    /// GPS status code of a fully solved fix
    pub const GPS_STATUS_SOLVED: u8 = 20;

    /// Default serial baud rate of both links
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;
}
