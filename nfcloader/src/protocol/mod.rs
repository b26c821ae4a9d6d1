//! Protocol implementations.

pub mod crc;
pub mod packet;

// Re-export common types
pub use {
    crc::Crc16,
    packet::{
        DeviceError, MAX_CHUNK_SIZE, MessageKind, MessageTag, TransferOutcome, VersionCheck,
        VersionInfo, decode_response, decode_version, encode_chunk,
    },
};
