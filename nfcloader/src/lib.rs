//! # nfcloader
//!
//! A library for programming NXP NHS31xx ICs through the one-time NFC
//! program downloader.
//!
//! A fresh NHS31xx runs a downloader that accepts a single firmware image
//! over NFC. The host writes the image chunk by chunk into the IC's Type 2
//! tag memory and reads back the downloader's answer to each chunk. The last
//! chunk carries a CRC-16 over the whole image; once the downloader accepts
//! it, it replaces itself with the new firmware.
//!
//! This crate provides:
//!
//! - The packet codec for chunks, responses and the version handshake
//! - The download session with its timeouts and failure classification
//! - NDEF framing on Type 2 tag pages
//! - Reader backends for a PN532 on a serial port and PC/SC readers
//!
//! ## Features
//!
//! - `native` (default): PN532 NFC front-end over the `serialport` crate
//! - `pcsc`: PC/SC contactless smartcard readers
//!
//! ## Example
//!
//! ```rust,no_run
//! use nfcloader::{Downloader, DriverKind, FirmwareImage, Transport};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::open("app.bin")?;
//!     let total = usize::try_from(image.len())?;
//!
//!     // Blocks until a tag is presented to the reader
//!     let transport = Transport::connect(DriverKind::Nfc, None)?;
//!
//!     let report = Downloader::new(transport).run(image, total, |_| {})?;
//!     println!("Transmitted (bytes): {}", report.bytes_sent);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;
pub mod tag;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Install the function polled while waiting for a tag or a downloader answer.
///
/// Once it returns `true` the wait ends with [`Error::Cancelled`]. Only the
/// first call has an effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Whether the installed checker asks to stop. `false` when none is installed.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result},
    image::FirmwareImage,
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{DeviceError, TransferOutcome, VersionCheck, VersionInfo},
    session::{
        Clock, Downloader, Event, FailureCause, Progress, SessionConfig, SystemClock,
        TransferFailure, TransferReport,
    },
    tag::{DriverKind, MockTransport, TagTransport, Transport, list_readers},
};
