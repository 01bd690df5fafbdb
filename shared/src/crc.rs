/*!
CRC32 used on outbound telemetry frames.

MSB-first (non-reflected) CRC over polynomial `0x04C11DB7`, accumulator
starting at 0 and no final XOR. This is not the reflected IEEE 802.3
CRC-32; the controller side computes exactly this variant.
*/

use ::crc::{Algorithm, Crc, Digest};

/// Generator polynomial
pub const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// Parameters of the frame checksum
pub const FRAME_CRC: Algorithm<u32> = Algorithm {
    width: 32,
    poly: POLYNOMIAL,
    init: 0,
    refin: false,
    refout: false,
    xorout: 0,
    check: 0x89A1_897F,
    residue: 0,
};

static CRC32: Crc<u32> = Crc::<u32>::new(&FRAME_CRC);

/// Incremental checksum over several buffers
pub fn digest() -> Digest<'static, u32> {
    CRC32.digest()
}

/// CRC32 of a complete buffer
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}
