/*!
Outbound frame encoding and validation.

A frame is the 12-byte header followed by the payload:

```text
AA 55 CC 33 | len: u16 LE | type: u16 LE | crc32: u32 LE | payload[len]
```

The bridge only ever writes frames; [`TelemetryFrame::decode`] exists for
the inspection tool and for controller-side simulations in tests.
*/

use crate::crc;
use crate::error::{Result, SharedError};
use crate::protocol::{FRAME_HEADER_SIZE, FRAME_MAGIC, PACKET_TYPE_TELEMETRY};
use crate::telemetry::TelemetryRecord;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Header fields following the magic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u16,
    pub packet_type: u16,
    pub crc: u32,
}

impl FrameHeader {
    /// Header describing `payload` of the given packet type
    pub fn for_payload(packet_type: u16, payload: &[u8]) -> Result<Self> {
        let length = u16::try_from(payload.len()).map_err(|_| {
            SharedError::invalid_frame(format!("payload of {} bytes exceeds u16 length field", payload.len()))
        })?;

        Ok(Self {
            length,
            packet_type,
            crc: crc::crc32(payload),
        })
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(&FRAME_MAGIC);
        buf.put_u16_le(self.length);
        buf.put_u16_le(self.packet_type);
        buf.put_u32_le(self.crc);
    }

    /// Parse and check the magic; length and CRC are checked by the caller
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        SharedError::ensure_len(FRAME_HEADER_SIZE, buf.remaining())?;

        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != FRAME_MAGIC {
            return Err(SharedError::invalid_frame(format!("bad magic {:02X?}", magic)));
        }

        Ok(Self {
            length: buf.get_u16_le(),
            packet_type: buf.get_u16_le(),
            crc: buf.get_u32_le(),
        })
    }
}

/// Telemetry record framed for the controller link
pub struct TelemetryFrame;

impl TelemetryFrame {
    /// Serialize `record` into a complete frame
    pub fn encode(record: &TelemetryRecord) -> Result<Bytes> {
        let payload = record.to_bytes();
        let header = FrameHeader::for_payload(PACKET_TYPE_TELEMETRY, &payload)?;

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        header.encode(&mut buf);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Validate magic, length, packet type and CRC, then decode the record
    pub fn decode(mut data: &[u8]) -> Result<(FrameHeader, TelemetryRecord)> {
        let header = FrameHeader::decode(&mut data)?;

        if data.len() != header.length as usize {
            return Err(SharedError::invalid_frame(format!(
                "length field says {} bytes, frame carries {}",
                header.length,
                data.len()
            )));
        }

        if header.packet_type != PACKET_TYPE_TELEMETRY {
            return Err(SharedError::invalid_frame(format!(
                "unexpected packet type 0x{:04X}",
                header.packet_type
            )));
        }

        let crc = crc::crc32(data);
        if crc != header.crc {
            return Err(SharedError::invalid_frame(format!(
                "CRC mismatch: header 0x{:08X}, payload 0x{:08X}",
                header.crc, crc
            )));
        }

        let record = TelemetryRecord::from_bytes(data)?;
        Ok((header, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Detection, FieldDetection, Position, ScreenDetection};

    fn sample_record() -> TelemetryRecord {
        let position = Position {
            frame_count: 7,
            status: 0x0010_0001,
            x: 1.5,
            y: -2.25,
            z: 0.5,
            azimuth: 90.0,
            elevation: 0.0,
            rotation: -45.0,
        };
        let detection = Detection {
            class_id: 2,
            probability: 0.875,
            depth: 3.5,
            screen: ScreenDetection::new(100, 120, 40, 60),
            field: FieldDetection::new(1.0, 2.0, 0.25),
        };
        TelemetryRecord::new(position, vec![detection])
    }

    // `sample_record` packed field by field with the controller's struct layout
    const SAMPLE_FRAME_HEX: &str = "AA55CC334C0001005A0581C70100000007000000010010000000C03F000010C0\
        0000003F0000B44200000000000034C2020000000000603F0000604064000000\
        78000000280000003C0000000000803F000000400000803E";

    #[test]
    fn test_frame_matches_reference_bytes() {
        let frame = TelemetryFrame::encode(&sample_record()).unwrap();
        assert_eq!(frame.as_ref(), hex::decode(SAMPLE_FRAME_HEX).unwrap().as_slice());
    }

    #[test]
    fn test_header_fields() {
        let record = sample_record();
        let frame = TelemetryFrame::encode(&record).unwrap();

        assert_eq!(&frame[0..4], &FRAME_MAGIC);
        let header = FrameHeader::decode(&mut &frame[..]).unwrap();
        assert_eq!(header.length as usize, record.encoded_len());
        assert_eq!(header.packet_type, PACKET_TYPE_TELEMETRY);
        assert_eq!(header.crc, 0xC781_055A);
    }

    #[test]
    fn test_crc_is_stable_across_encodes() {
        let record = sample_record();
        let a = TelemetryFrame::encode(&record).unwrap();
        let b = TelemetryFrame::encode(&record).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_roundtrip() {
        let record = sample_record();
        let frame = TelemetryFrame::encode(&record).unwrap();
        let (header, decoded) = TelemetryFrame::decode(&frame).unwrap();
        assert_eq!(header.packet_type, PACKET_TYPE_TELEMETRY);
        assert_eq!(decoded, record);

        let empty = TelemetryFrame::encode(&TelemetryRecord::default()).unwrap();
        let (header, decoded) = TelemetryFrame::decode(&empty).unwrap();
        assert_eq!(header.crc, 0);
        assert!(decoded.detections.is_empty());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut frame = TelemetryFrame::encode(&sample_record()).unwrap().to_vec();
        frame[1] = 0x56;
        assert!(matches!(TelemetryFrame::decode(&frame), Err(SharedError::InvalidFrame(_))));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let frame = TelemetryFrame::encode(&sample_record()).unwrap();
        assert!(TelemetryFrame::decode(&frame[..frame.len() - 4]).is_err());
    }

    #[test]
    fn test_corrupted_payload_fails_crc() {
        let mut frame = TelemetryFrame::encode(&sample_record()).unwrap().to_vec();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;
        let err = TelemetryFrame::decode(&frame).unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![0u8; u16::MAX as usize + 1];
        assert!(FrameHeader::for_payload(PACKET_TYPE_TELEMETRY, &payload).is_err());
    }
}
