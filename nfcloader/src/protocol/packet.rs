//! Download protocol packets.
//!
//! The host writes one outgoing packet per NDEF message and the downloader
//! firmware answers each with a fixed-size response. Before the first chunk
//! the firmware publishes a version packet.
//!
//! ## Outgoing Packet
//!
//! ```text
//! +--------+-----+--------+----------------+--------+
//! | MSG ID | TAG | LENGTH |      DATA      | CRC16  |
//! +--------+-----+--------+----------------+--------+
//! |   1    |  1  |   2    |  0..=486 bytes |   2    |
//! +--------+-----+--------+----------------+--------+
//! | 48/49  |  0  | len LE |     chunk      | 49 only|
//! +--------+-----+--------+----------------+--------+
//! ```
//!
//! ## Response Packet
//!
//! ```text
//! +--------+-----+-----------+
//! | MSG ID | TAG |  RESULT   |
//! +--------+-----+-----------+
//! |   1    |  1  | 4 (u32 LE)|
//! +--------+-----+-----------+
//! ```
//!
//! ## Version Packet
//!
//! ```text
//! +--------+-----+-----+----------+----------+-----------+-----------+-----------+
//! | MSG ID | TAG | RSV | SW MAJOR | SW MINOR | API MAJOR | API MINOR | DEVICE ID |
//! +--------+-----+-----+----------+----------+-----------+-----------+-----------+
//! |   1    |  1  |  2  |    2     |    2     |     2     |     2     |     4     |
//! +--------+-----+-----+----------+----------+-----------+-----------+-----------+
//! ```
//!
//! All multi-byte fields are little-endian.

use {
    crate::error::{Error, Result},
    byteorder::{ByteOrder, LittleEndian, WriteBytesExt},
    log::{debug, warn},
    std::fmt,
};

/// Size of the tag's shared NFC memory available to one NDEF message.
pub const NFC_SHARED_MEMORY_SIZE: usize = 512;

/// Largest data chunk that fits one NDEF message.
///
/// Shared memory minus the NDEF TLV overhead (8 + 4 + 1), the MIME record
/// overhead (6), the MIME type `N/P` (3) and the packet header (4).
pub const MAX_CHUNK_SIZE: usize = NFC_SHARED_MEMORY_SIZE - (8 + 4 + 1) - 6 - 3 - 4;

/// Chunks at or below this length are sent as the final, CRC-bearing chunk.
///
/// Two bytes of slack are kept below [`MAX_CHUNK_SIZE`] for the trailing CRC.
/// A chunk of 485 or 486 bytes is never final, even at end of file; the next
/// (empty) read then becomes the final chunk.
pub const FINAL_CHUNK_THRESHOLD: usize = MAX_CHUNK_SIZE - 2;

/// Size of the outgoing packet header.
pub const CHUNK_HEADER_SIZE: usize = 4;

/// Size of the trailing CRC on the final chunk.
pub const CRC_SIZE: usize = 2;

/// Wire size of a response packet.
pub const RESPONSE_SIZE: usize = 6;

/// Bytes of the version packet carrying the identifying fields.
pub const VERSION_HEADER_SIZE: usize = 12;

/// Wire size of a complete version packet, including the device id.
pub const VERSION_PACKET_SIZE: usize = 16;

/// Software version the downloader must report.
pub const EXPECTED_SW_VERSION: (u16, u16) = (1, 2);

/// API version the downloader is expected to report.
pub const EXPECTED_API_VERSION: (u16, u16) = (4, 0);

/// Message identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Incremental data chunk.
    IncrementalChunk = 0x48,
    /// Last data chunk, followed by the image CRC.
    FinalChunk = 0x49,
}

impl MessageKind {
    /// Parse a message identifier byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x48 => Some(Self::IncrementalChunk),
            0x49 => Some(Self::FinalChunk),
            _ => None,
        }
    }
}

/// Direction tag carried in the second byte of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    /// Host to device.
    Outgoing = 0,
    /// Device to host.
    Incoming = 1,
}

/// Non-error result codes.
pub mod result_code {
    /// The image was received and its CRC verified.
    pub const DOWNLOAD_COMPLETE: u32 = 1;
    /// The chunk was accepted, send the next one.
    pub const DOWNLOAD_ONGOING: u32 = 2;
}

/// Failure reported by the downloader firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceError {
    /// The image does not fit in user flash.
    ImageTooBig = 3,
    /// The chunk size does not match the command size.
    InvalidChunkSize = 4,
    /// The image CRC does not match the CRC sent with the last chunk.
    CrcMismatch = 5,
    /// The downloader received an invalid command.
    CommunicationFailed = 6,
    /// No handler for the message id.
    UnknownCommand = 0x10007,
    /// Parameters missing or given in excess.
    InvalidCommandSize = 0x1000D,
    /// A parameter was missing or had an invalid value.
    InvalidParameter = 0x1000E,
}

impl DeviceError {
    /// Map a result code to a device error, if it is one.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            3 => Some(Self::ImageTooBig),
            4 => Some(Self::InvalidChunkSize),
            5 => Some(Self::CrcMismatch),
            6 => Some(Self::CommunicationFailed),
            0x10007 => Some(Self::UnknownCommand),
            0x1000D => Some(Self::InvalidCommandSize),
            0x1000E => Some(Self::InvalidParameter),
            _ => None,
        }
    }

    /// Numeric result code on the wire.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            Self::ImageTooBig => "image does not fit in flash",
            Self::InvalidChunkSize => "invalid chunk size",
            Self::CrcMismatch => "crc mismatch",
            Self::CommunicationFailed => "communication failed",
            Self::UnknownCommand => "unknown command",
            Self::InvalidCommandSize => "invalid command size",
            Self::InvalidParameter => "invalid parameter",
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:X})", self.description(), self.code())
    }
}

/// Interpretation of a packet read back from the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Chunk accepted, more data expected.
    Ongoing,
    /// Image received and verified.
    Successful,
    /// The device rejected the transfer.
    Failed(DeviceError),
    /// Not a response to the last packet; keep waiting.
    Invalid,
}

/// Version information published by the downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    /// Software major version.
    pub sw_major: u16,
    /// Software minor version.
    pub sw_minor: u16,
    /// API major version.
    pub api_major: u16,
    /// API minor version.
    pub api_minor: u16,
    /// Device identifier, when the full 16-byte packet was read.
    pub device_id: Option<u32>,
}

impl VersionInfo {
    /// Whether the software version is the one this loader speaks.
    pub fn is_supported(&self) -> bool {
        (self.sw_major, self.sw_minor) == EXPECTED_SW_VERSION
    }

    /// Whether the API version is the expected one.
    pub fn api_matches(&self) -> bool {
        (self.api_major, self.api_minor) == EXPECTED_API_VERSION
    }

    /// Name of the IC, if the device id is a known one.
    pub fn device_name(&self) -> Option<&'static str> {
        match self.device_id? {
            0x4E31_0020 => Some("NHS3100"),
            0x4E31_5220 => Some("NHS3152"),
            _ => None,
        }
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "firmware {}.{}, API {}.{}",
            self.sw_major, self.sw_minor, self.api_major, self.api_minor
        )?;
        match (self.device_name(), self.device_id) {
            (Some(name), _) => write!(f, ", {name}"),
            (None, Some(id)) => write!(f, ", device 0x{id:08X}"),
            (None, None) => Ok(()),
        }
    }
}

/// Result of checking a version packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionCheck {
    /// The reported software version is supported.
    pub matched: bool,
    /// The parsed version, if the packet was large enough to parse.
    pub reported: Option<VersionInfo>,
}

/// Encode an outgoing chunk.
///
/// With `crc` absent the packet is an incremental chunk; with `crc` present it
/// is the final chunk and the CRC is appended. The firmware recognises the
/// last chunk from the message id alone, so the two always go together.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode_chunk(payload: &[u8], crc: Option<u16>) -> Result<Vec<u8>> {
    if payload.len() > MAX_CHUNK_SIZE {
        return Err(Error::ChunkTooLarge {
            len: payload.len(),
            max: MAX_CHUNK_SIZE,
        });
    }

    let kind = if crc.is_some() {
        MessageKind::FinalChunk
    } else {
        MessageKind::IncrementalChunk
    };

    let mut packet = Vec::with_capacity(CHUNK_HEADER_SIZE + payload.len() + CRC_SIZE);
    packet.push(kind as u8);
    packet.push(MessageTag::Outgoing as u8);
    // Safe cast, bounded by MAX_CHUNK_SIZE
    packet
        .write_u16::<LittleEndian>(payload.len() as u16)
        .unwrap();
    packet.extend_from_slice(payload);
    if let Some(crc) = crc {
        packet
            .write_u16::<LittleEndian>(crc)
            .unwrap();
    }

    Ok(packet)
}

/// Interpret a packet read back after sending a chunk.
///
/// Never fails: anything that is not a well-formed response to a chunk is
/// [`TransferOutcome::Invalid`].
pub fn decode_response(bytes: &[u8]) -> TransferOutcome {
    if bytes.len() != RESPONSE_SIZE {
        return TransferOutcome::Invalid;
    }
    if bytes[1] != MessageTag::Incoming as u8 {
        // Our own packet, not yet answered
        return TransferOutcome::Invalid;
    }

    let msg_id = bytes[0];
    let result = LittleEndian::read_u32(&bytes[2..6]);

    if let Some(err) = DeviceError::from_code(result) {
        warn!("Download failed, {}", err.description());
        return TransferOutcome::Failed(err);
    }

    match (MessageKind::from_byte(msg_id), result) {
        (Some(MessageKind::IncrementalChunk), result_code::DOWNLOAD_ONGOING) => {
            TransferOutcome::Ongoing
        },
        (Some(MessageKind::FinalChunk), result_code::DOWNLOAD_COMPLETE) => {
            TransferOutcome::Successful
        },
        _ => {
            warn!("Invalid message id / result combination: 0x{msg_id:02X}/{result}");
            TransferOutcome::Invalid
        },
    }
}

/// Check the version packet published by the downloader.
///
/// Only the [`VERSION_HEADER_SIZE`] header or the full [`VERSION_PACKET_SIZE`]
/// packet is accepted; the device id is read from the full packet. Any other
/// length is not a version packet.
pub fn decode_version(bytes: Option<&[u8]>) -> VersionCheck {
    let Some(bytes) = bytes.filter(|b| !b.is_empty()) else {
        debug!("No version packet received");
        return VersionCheck {
            matched: false,
            reported: None,
        };
    };

    if !matches!(bytes.len(), VERSION_HEADER_SIZE | VERSION_PACKET_SIZE) {
        debug!("Not a version packet ({} bytes)", bytes.len());
        return VersionCheck {
            matched: false,
            reported: None,
        };
    }

    let info = VersionInfo {
        sw_major: LittleEndian::read_u16(&bytes[4..6]),
        sw_minor: LittleEndian::read_u16(&bytes[6..8]),
        api_major: LittleEndian::read_u16(&bytes[8..10]),
        api_minor: LittleEndian::read_u16(&bytes[10..12]),
        device_id: bytes
            .get(12..VERSION_PACKET_SIZE)
            .map(LittleEndian::read_u32),
    };
    debug!("Reported {info}");

    VersionCheck {
        matched: info.is_supported(),
        reported: Some(info),
    }
}
