//! Tag transports.
//!
//! The downloader firmware exchanges packets through the NDEF area of the
//! IC's NFC Type 2 tag memory. Two reader backends are supported:
//!
//! - **NFC** (`native` feature, default): a PN532 front-end on a serial port
//! - **Smartcard** (`pcsc` feature): a PC/SC contactless reader
//!
//! Both implement [`PageAccess`] and share the NDEF framing in
//! [`Type2Tag`]. The download session only sees [`TagTransport`].

pub mod mock;
pub mod ndef;
pub mod pn532;
pub mod smartcard;
pub mod type2;

use {
    crate::error::{Error, Result},
    std::{fmt, str::FromStr},
};

pub use {
    mock::MockTransport,
    type2::{PageAccess, Type2Tag},
};

/// Packet exchange with the tag.
pub trait TagTransport {
    /// Read the packet currently published by the tag.
    ///
    /// Returns `None` when the tag holds nothing readable.
    fn read(&mut self) -> Result<Option<Vec<u8>>>;

    /// Publish a packet for the device.
    fn write(&mut self, packet: &[u8]) -> Result<()>;
}

impl<T: TagTransport + ?Sized> TagTransport for &mut T {
    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        (**self).read()
    }

    fn write(&mut self, packet: &[u8]) -> Result<()> {
        (**self).write(packet)
    }
}

/// Reader backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverKind {
    /// PN532 NFC front-end over a serial port.
    #[default]
    Nfc,
    /// PC/SC smartcard reader.
    Smartcard,
}

impl DriverKind {
    /// All driver kinds.
    pub const ALL: [Self; 2] = [Self::Nfc, Self::Smartcard];

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Nfc => "nfc",
            Self::Smartcard => "smartcard",
        }
    }

    /// Whether support for this backend was compiled in.
    pub fn is_available(self) -> bool {
        match self {
            Self::Nfc => cfg!(feature = "native"),
            Self::Smartcard => cfg!(feature = "pcsc"),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "nfc" | "pn532" => Ok(Self::Nfc),
            "smartcard" | "pcsc" => Ok(Self::Smartcard),
            other => Err(Error::Config(format!(
                "Unsupported driver \"{other}\" (expected nfc or smartcard)"
            ))),
        }
    }
}

/// Pick a reader by case-insensitive name fragment, or the first one.
pub fn select_reader<'a>(readers: &'a [String], filter: Option<&str>) -> Result<&'a str> {
    if readers.is_empty() {
        return Err(Error::NoReaders);
    }

    match filter {
        None => Ok(&readers[0]),
        Some(filter) => {
            let needle = filter.to_lowercase();
            readers
                .iter()
                .find(|name| {
                    name.to_lowercase()
                        .contains(&needle)
                })
                .map(String::as_str)
                .ok_or_else(|| Error::ReaderNotFound(filter.to_string()))
        },
    }
}

/// A connected tag on one of the supported backends.
pub enum Transport {
    /// Tag reached through a PN532.
    #[cfg(feature = "native")]
    Nfc(Type2Tag<pn532::Pn532<crate::port::NativePort>>),
    /// Tag reached through a PC/SC reader.
    #[cfg(feature = "pcsc")]
    Smartcard(Type2Tag<smartcard::ApduPages<smartcard::PcscChannel>>),
}

impl Transport {
    /// Connect to a tag, blocking until one is presented.
    ///
    /// `filter` selects the reader by name fragment; without it the first
    /// reader found is used.
    pub fn connect(kind: DriverKind, filter: Option<&str>) -> Result<Self> {
        match kind {
            DriverKind::Nfc => Self::connect_nfc(filter),
            DriverKind::Smartcard => Self::connect_smartcard(filter),
        }
    }

    /// Backend of this transport.
    pub fn kind(&self) -> DriverKind {
        match *self {
            #[cfg(feature = "native")]
            Self::Nfc(_) => DriverKind::Nfc,
            #[cfg(feature = "pcsc")]
            Self::Smartcard(_) => DriverKind::Smartcard,
        }
    }

    #[cfg(feature = "native")]
    fn connect_nfc(filter: Option<&str>) -> Result<Self> {
        pn532::connect(filter).map(Self::Nfc)
    }

    #[cfg(not(feature = "native"))]
    fn connect_nfc(_filter: Option<&str>) -> Result<Self> {
        Err(not_compiled(DriverKind::Nfc))
    }

    #[cfg(feature = "pcsc")]
    fn connect_smartcard(filter: Option<&str>) -> Result<Self> {
        smartcard::connect(filter).map(Self::Smartcard)
    }

    #[cfg(not(feature = "pcsc"))]
    fn connect_smartcard(_filter: Option<&str>) -> Result<Self> {
        Err(not_compiled(DriverKind::Smartcard))
    }
}

impl TagTransport for Transport {
    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        match *self {
            #[cfg(feature = "native")]
            Self::Nfc(ref mut tag) => tag.read(),
            #[cfg(feature = "pcsc")]
            Self::Smartcard(ref mut tag) => tag.read(),
        }
    }

    fn write(&mut self, packet: &[u8]) -> Result<()> {
        match *self {
            #[cfg(feature = "native")]
            Self::Nfc(ref mut tag) => tag.write(packet),
            #[cfg(feature = "pcsc")]
            Self::Smartcard(ref mut tag) => tag.write(packet),
        }
    }
}

/// List the readers a backend can see.
pub fn list_readers(kind: DriverKind) -> Result<Vec<String>> {
    match kind {
        #[cfg(feature = "native")]
        DriverKind::Nfc => pn532::list_readers(),
        #[cfg(feature = "pcsc")]
        DriverKind::Smartcard => smartcard::list_readers(),
        #[allow(unreachable_patterns)]
        other => Err(not_compiled(other)),
    }
}

fn not_compiled(kind: DriverKind) -> Error {
    let feature = match kind {
        DriverKind::Nfc => "native",
        DriverKind::Smartcard => "pcsc",
    };
    Error::Config(format!(
        "The {kind} driver is not available in this build (enable the `{feature}` feature)"
    ))
}
