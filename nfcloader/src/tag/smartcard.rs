//! Smartcard reader backend.
//!
//! PC/SC contactless readers expose Type 2 tag pages through the pseudo-APDUs
//! of the PC/SC part 3 storage card commands:
//!
//! ```text
//! READ BINARY    FF B0 00 <page> <len>
//! UPDATE BINARY  FF D6 00 <page> 04 <4 bytes>
//! ```
//!
//! A status word starting with `0x90` means success. Some readers only
//! return a single page per read; the channel switches to single-page reads
//! after the first 4-byte answer.

use {
    super::{ndef::PAGE_SIZE, type2::PageAccess},
    crate::error::Result,
    log::trace,
};

/// SW1 of a successful command.
pub const SW1_SUCCESS: u8 = 0x90;

/// Bytes requested per read before falling back to single pages.
pub const BLOCK_READ_LEN: u8 = 0x10;

/// APDU exchange with a card.
pub trait ApduChannel {
    /// Send a command APDU and return the response, status word included.
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>>;
}

/// Type 2 tag page access over APDUs.
pub struct ApduPages<C: ApduChannel> {
    channel: C,
    word_reads: bool,
}

impl<C: ApduChannel> ApduPages<C> {
    /// Wrap an APDU channel.
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            word_reads: false,
        }
    }

    /// Whether the reader was found to return single pages only.
    pub fn word_reads(&self) -> bool {
        self.word_reads
    }

    /// Get a reference to the underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Send `apdu` and split off the status word. `None` on failure status.
    fn command(&mut self, apdu: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut response = self
            .channel
            .transmit(apdu)?;
        if response.len() < 2 {
            trace!("APDU {apdu:02X?}: short response {response:02X?}");
            return Ok(None);
        }

        let status = response.split_off(response.len() - 2);
        if status[0] == SW1_SUCCESS {
            Ok(Some(response))
        } else {
            trace!(
                "APDU {:02X?}: status {:02X}{:02X}",
                apdu, status[0], status[1]
            );
            Ok(None)
        }
    }
}

impl<C: ApduChannel> PageAccess for ApduPages<C> {
    #[allow(clippy::cast_possible_truncation)]
    fn read_pages(&mut self, page: u8) -> Result<Option<Vec<u8>>> {
        let len = if self.word_reads {
            PAGE_SIZE as u8
        } else {
            BLOCK_READ_LEN
        };

        let data = self.command(&[0xFF, 0xB0, 0x00, page, len])?;
        if let Some(ref data) = data {
            if data.len() == PAGE_SIZE && !self.word_reads {
                trace!("Reader returns single pages, switching to page reads");
                self.word_reads = true;
            }
        }
        Ok(data)
    }

    fn write_page(&mut self, page: u8, data: [u8; PAGE_SIZE]) -> Result<bool> {
        let apdu = [
            0xFF, 0xD6, 0x00, page, 0x04, data[0], data[1], data[2], data[3],
        ];
        Ok(self
            .command(&apdu)?
            .is_some())
    }
}

#[cfg(feature = "pcsc")]
pub use reader::{PcscChannel, connect, list_readers};

#[cfg(feature = "pcsc")]
mod reader {
    use {
        super::{ApduChannel, ApduPages},
        crate::{
            error::{Error, Result},
            is_interrupted_requested,
            tag::{select_reader, type2::Type2Tag},
        },
        log::{debug, info},
        pcsc::{Card, Context, Protocols, Scope, ShareMode},
        std::{ffi::CString, thread, time::Duration},
    };

    /// Delay between attempts to reach a card.
    const CARD_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// A connected PC/SC card.
    pub struct PcscChannel {
        card: Card,
    }

    impl ApduChannel for PcscChannel {
        fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
            let mut buf = [0u8; pcsc::MAX_BUFFER_SIZE];
            let response = self
                .card
                .transmit(apdu, &mut buf)?;
            Ok(response.to_vec())
        }
    }

    fn reader_names(ctx: &Context) -> Result<Vec<CString>> {
        match ctx.list_readers_owned() {
            Ok(readers) => Ok(readers),
            Err(pcsc::Error::NoReadersAvailable) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// List the PC/SC readers.
    pub fn list_readers() -> Result<Vec<String>> {
        let ctx = Context::establish(Scope::User)?;
        Ok(reader_names(&ctx)?
            .iter()
            .map(|name| {
                name.to_string_lossy()
                    .into_owned()
            })
            .collect())
    }

    /// Connect to the first card presented to the selected reader.
    pub fn connect(filter: Option<&str>) -> Result<Type2Tag<ApduPages<PcscChannel>>> {
        let ctx = Context::establish(Scope::User)?;
        let raw = reader_names(&ctx)?;
        let names: Vec<String> = raw
            .iter()
            .map(|name| {
                name.to_string_lossy()
                    .into_owned()
            })
            .collect();
        info!("Available readers: {names:?}");

        let selected = select_reader(&names, filter)?;
        let index = names
            .iter()
            .position(|name| name == selected)
            .unwrap_or_default();

        info!("Now accessing tag reader {selected}");
        info!("Searching for a tag");

        loop {
            if is_interrupted_requested() {
                return Err(Error::Cancelled);
            }

            match ctx.connect(&raw[index], ShareMode::Shared, Protocols::ANY) {
                Ok(card) => {
                    info!("TAG connected");
                    return Ok(Type2Tag::new(ApduPages::new(PcscChannel { card })));
                },
                Err(
                    pcsc::Error::NoSmartcard
                    | pcsc::Error::RemovedCard
                    | pcsc::Error::UnpoweredCard
                    | pcsc::Error::UnresponsiveCard,
                ) => {
                    thread::sleep(CARD_POLL_INTERVAL);
                },
                Err(e) => {
                    debug!("Connecting to {selected} failed: {e}");
                    return Err(e.into());
                },
            }
        }
    }
}
