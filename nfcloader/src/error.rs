//! Error types for nfcloader.

use {crate::session::TransferFailure, std::io, thiserror::Error};

/// Result type for nfcloader operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for nfcloader operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (image file, serial port).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// PC/SC subsystem error.
    #[cfg(feature = "pcsc")]
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// A data chunk exceeds the protocol maximum.
    #[error("Chunk of {len} bytes exceeds the maximum of {max} bytes")]
    ChunkTooLarge {
        /// Length of the rejected chunk.
        len: usize,
        /// Maximum allowed chunk length.
        max: usize,
    },

    /// No tag reader is available.
    #[error("No supported readers found")]
    NoReaders,

    /// No reader matches the requested name.
    #[error("Reader \"{0}\" not found")]
    ReaderNotFound(String),

    /// Configuration error (unsupported driver, bad settings).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tag reader or tag communication failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The embedding application requested a stop.
    #[error("download aborted on user request")]
    Cancelled,

    /// The download session ended in failure.
    #[error(transparent)]
    Transfer(#[from] TransferFailure),
}

impl Error {
    /// Whether the error is a user-requested stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
