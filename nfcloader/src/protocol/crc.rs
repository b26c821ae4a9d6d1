//! Running CRC-16 over the firmware image.
//!
//! The downloader firmware verifies the whole image against a single
//! CRC-16/CCITT-FALSE value (polynomial `0x1021`, initial value `0xFFFF`,
//! no reflection, no final XOR) sent along with the last chunk.

use crc::{CRC_16_IBM_3740, Crc, Digest};

static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Stateful CRC-16 accumulator fed with sequential chunks of the image.
#[derive(Clone)]
pub struct Crc16 {
    digest: Digest<'static, u16>,
}

impl Crc16 {
    /// Create an accumulator in its initial state.
    pub fn new() -> Self {
        Self {
            digest: CRC16.digest(),
        }
    }

    /// Feed `data` and return the CRC over everything fed so far.
    pub fn update(&mut self, data: &[u8]) -> u16 {
        self.digest.update(data);
        self.value()
    }

    /// CRC over everything fed so far.
    pub fn value(&self) -> u16 {
        self.digest.clone().finalize()
    }

    /// Discard all fed data.
    pub fn reset(&mut self) {
        self.digest = CRC16.digest();
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Crc16 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc16")
            .field("value", &format_args!("{:#06x}", self.value()))
            .finish()
    }
}

/// One-shot CRC-16 of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}
