//! PN532 NFC front-end over its high-speed UART.
//!
//! ## Frame Format
//!
//! ```text
//! +----------+------------+-----+-----+-----+-----------+-----+-----------+
//! | PREAMBLE | START CODE | LEN | LCS | TFI |   DATA    | DCS | POSTAMBLE |
//! +----------+------------+-----+-----+-----+-----------+-----+-----------+
//! |   0x00   | 0x00 0xFF  |  1  |  1  |  1  | LEN - 1   |  1  |   0x00    |
//! +----------+------------+-----+-----+-----+-----------+-----+-----------+
//! ```
//!
//! `TFI` is `0xD4` host to PN532 and `0xD5` back. Every command is first
//! acknowledged with `00 00 FF 00 FF 00`, then answered with command + 1.
//!
//! Type 2 tag pages are reached with `InDataExchange` wrapping the tag's own
//! `READ` (`0x30`, 16 bytes) and `WRITE` (`0xA2`, 4 bytes) commands.

use {
    super::{ndef::PAGE_SIZE, type2::PageAccess},
    crate::{
        error::{Error, Result},
        is_interrupted_requested,
        port::Port,
    },
    log::{debug, info, trace},
    std::{
        io::Read,
        thread,
        time::{Duration, Instant},
    },
};

/// Default PN532 HSU baud rate.
pub const DEFAULT_BAUD: u32 = 115200;

/// Host to PN532 frame identifier.
pub const TFI_HOST: u8 = 0xD4;

/// PN532 to host frame identifier.
pub const TFI_PN532: u8 = 0xD5;

/// ACK frame.
pub const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];

/// Wake-up sequence for a PN532 sleeping in HSU mode.
pub const WAKE_UP: [u8; 16] = [
    0x55, 0x55, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

/// Time allowed for a command to be acknowledged and answered.
const COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Delay between tag detection attempts.
const TAG_RETRY_DELAY: Duration = Duration::from_secs(1);

/// PN532 commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Read IC and firmware version.
    GetFirmwareVersion = 0x02,
    /// Configure the security access module (normal mode).
    SamConfiguration = 0x14,
    /// RF settings (retry counts).
    RfConfiguration = 0x32,
    /// Exchange data with the activated target.
    InDataExchange = 0x40,
    /// Detect and activate targets.
    InListPassiveTarget = 0x4A,
}

/// Type 2 tag commands tunnelled through `InDataExchange`.
pub mod t2t {
    /// Read four pages.
    pub const READ: u8 = 0x30;
    /// Write one page.
    pub const WRITE: u8 = 0xA2;
}

/// A decoded PN532 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Command acknowledged.
    Ack,
    /// Command rejected.
    Nack,
    /// Information frame: TFI followed by data.
    Data(Vec<u8>),
}

/// Build a normal information frame for `command`.
#[allow(clippy::cast_possible_truncation)]
pub fn build_frame(command: Command, params: &[u8]) -> Vec<u8> {
    // TFI + command + params, always < 255 for the commands used here
    let len = (2 + params.len()) as u8;

    let mut frame = Vec::with_capacity(params.len() + 9);
    frame.extend_from_slice(&[0x00, 0x00, 0xFF, len, len.wrapping_neg()]);
    frame.push(TFI_HOST);
    frame.push(command as u8);
    frame.extend_from_slice(params);

    let sum = params
        .iter()
        .fold(TFI_HOST.wrapping_add(command as u8), |acc, b| {
            acc.wrapping_add(*b)
        });
    frame.push(sum.wrapping_neg());
    frame.push(0x00);
    frame
}

/// Parse the first frame in `buf`.
///
/// Returns the frame and the number of bytes it consumed, or `None` if more
/// bytes are needed.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
    let Some(start) = buf
        .windows(2)
        .position(|w| w == [0x00, 0xFF])
    else {
        return Ok(None);
    };

    let Some(&[len, lcs]) = buf.get(start + 2..start + 4) else {
        return Ok(None);
    };
    let header_end = start + 4;

    match (len, lcs) {
        (0x00, 0xFF) => return Ok(Some((Frame::Ack, header_end))),
        (0xFF, 0x00) => return Ok(Some((Frame::Nack, header_end))),
        _ => {},
    }

    if len.wrapping_add(lcs) != 0 {
        return Err(Error::Transport(format!(
            "PN532 frame length checksum mismatch ({len:02X} {lcs:02X})"
        )));
    }

    let data_end = header_end + usize::from(len);
    let Some(data) = buf.get(header_end..data_end) else {
        return Ok(None);
    };
    let Some(&dcs) = buf.get(data_end) else {
        return Ok(None);
    };

    let sum = data
        .iter()
        .fold(dcs, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        return Err(Error::Transport("PN532 frame data checksum mismatch".into()));
    }

    Ok(Some((Frame::Data(data.to_vec()), data_end + 1)))
}

/// PN532 driver.
///
/// Generic over the port type `P`, which must implement the `Port` trait.
pub struct Pn532<P: Port> {
    port: P,
    pending: Vec<u8>,
    timeout: Duration,
}

impl<P: Port> Pn532<P> {
    /// Create a driver on an opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            pending: Vec::new(),
            timeout: COMMAND_TIMEOUT,
        }
    }

    /// Set the command timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Wake the PN532 and put it in normal mode.
    ///
    /// Returns the firmware version as `(version, revision)`.
    pub fn wake_up(&mut self) -> Result<(u8, u8)> {
        self.port
            .write_all_bytes(&WAKE_UP)?;
        self.command(Command::SamConfiguration, &[0x01, 0x14, 0x01])?;

        let version = self.command(Command::GetFirmwareVersion, &[])?;
        let &[ic, ver, rev, ..] = version.as_slice() else {
            return Err(Error::Transport(format!(
                "Unexpected firmware version response {version:02X?}"
            )));
        };
        debug!("PN5{ic:02X} firmware {ver}.{rev}");

        // Limit passive activation retries so detection polls return
        self.command(Command::RfConfiguration, &[0x05, 0xFF, 0x01, 0x02])?;
        Ok((ver, rev))
    }

    /// Send a command and return the response data after the command code.
    pub fn command(&mut self, command: Command, params: &[u8]) -> Result<Vec<u8>> {
        let frame = build_frame(command, params);
        trace!("PN532 > {frame:02X?}");
        self.port
            .write_all_bytes(&frame)?;

        match self.read_frame()? {
            Frame::Ack => {},
            other => {
                return Err(Error::Transport(format!(
                    "PN532 did not acknowledge {command:?}: {other:?}"
                )));
            },
        }

        match self.read_frame()? {
            Frame::Data(data) => {
                trace!("PN532 < {data:02X?}");
                match data[..] {
                    [TFI_PN532, code, ref rest @ ..] if code == command as u8 + 1 => {
                        Ok(rest.to_vec())
                    },
                    _ => Err(Error::Transport(format!(
                        "Unexpected PN532 response to {command:?}: {data:02X?}"
                    ))),
                }
            },
            other => Err(Error::Transport(format!(
                "Unexpected PN532 frame after {command:?}: {other:?}"
            ))),
        }
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let deadline = Instant::now() + self.timeout;
        let mut chunk = [0u8; 64];

        loop {
            match parse_frame(&self.pending) {
                Ok(Some((frame, consumed))) => {
                    self.pending
                        .drain(..consumed);
                    return Ok(frame);
                },
                Ok(None) => {},
                Err(e) => {
                    self.skip_bad_frame();
                    return Err(e);
                },
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "No response from PN532 on {}",
                    self.port.name()
                )));
            }

            match self.port.read(&mut chunk) {
                Ok(n) => self
                    .pending
                    .extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Drop the pending bytes up to and including the start code of a frame
    /// that failed its checksum, so the next read resyncs on the following one.
    fn skip_bad_frame(&mut self) {
        match self
            .pending
            .windows(2)
            .position(|w| w == [0x00, 0xFF])
        {
            Some(start) => {
                self.pending
                    .drain(..start + 2);
            },
            None => self
                .pending
                .clear(),
        }
    }

    /// Look for an ISO14443A tag. Returns its UID when one is activated.
    pub fn detect_tag(&mut self) -> Result<Option<Vec<u8>>> {
        let response = self.command(Command::InListPassiveTarget, &[0x01, 0x00])?;

        // NbTg, Tg, SENS_RES (2), SEL_RES, NFCIDLength, NFCID
        match response[..] {
            [0, ..] | [] => Ok(None),
            [_, _, _, _, _, uid_len, ref rest @ ..] => Ok(rest
                .get(..usize::from(uid_len))
                .map(<[u8]>::to_vec)),
            _ => Err(Error::Transport(format!(
                "Malformed target list {response:02X?}"
            ))),
        }
    }

    /// Poll until a tag is presented or an interruption is requested.
    pub fn wait_for_tag(&mut self) -> Result<Vec<u8>> {
        loop {
            if is_interrupted_requested() {
                return Err(Error::Cancelled);
            }
            if let Some(uid) = self.detect_tag()? {
                return Ok(uid);
            }
            info!("No tag found. Place a tag.");
            thread::sleep(TAG_RETRY_DELAY);
        }
    }

    /// Run a tag command. `None` when the tag reported an error.
    fn exchange(&mut self, data: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut params = Vec::with_capacity(data.len() + 1);
        params.push(0x01);
        params.extend_from_slice(data);

        let response = self.command(Command::InDataExchange, &params)?;
        match response.split_first() {
            Some((status, rest)) if status & 0x3F == 0 => Ok(Some(rest.to_vec())),
            Some((status, _)) => {
                trace!("InDataExchange status 0x{status:02X}");
                Ok(None)
            },
            None => Ok(None),
        }
    }
}

impl<P: Port> PageAccess for Pn532<P> {
    fn read_pages(&mut self, page: u8) -> Result<Option<Vec<u8>>> {
        self.exchange(&[t2t::READ, page])
    }

    fn write_page(&mut self, page: u8, data: [u8; PAGE_SIZE]) -> Result<bool> {
        Ok(self
            .exchange(&[t2t::WRITE, page, data[0], data[1], data[2], data[3]])?
            .is_some())
    }
}

#[cfg(feature = "native")]
pub use native::{connect, list_readers};

#[cfg(feature = "native")]
mod native {
    use {
        super::{DEFAULT_BAUD, Pn532},
        crate::{
            error::{Error, Result},
            port::{NativePort, NativePortEnumerator, Port, PortEnumerator, SerialConfig},
            tag::{select_reader, type2::Type2Tag},
        },
        log::{debug, info},
    };

    /// List the serial ports a PN532 may be attached to, USB adapters first.
    pub fn list_readers() -> Result<Vec<String>> {
        Ok(NativePortEnumerator::list_ports()?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    /// Open the PN532 on the selected port and wait for a tag.
    ///
    /// `filter` is matched against the port names; a filter matching no
    /// listed port is opened as a path.
    pub fn connect(filter: Option<&str>) -> Result<Type2Tag<Pn532<NativePort>>> {
        let ports = list_readers()?;
        let port_name = match (select_reader(&ports, filter), filter) {
            (Ok(name), _) => name.to_string(),
            (Err(Error::NoReaders | Error::ReaderNotFound(_)), Some(path)) => path.to_string(),
            (Err(e), _) => return Err(e),
        };

        let config = SerialConfig::new(&port_name, DEFAULT_BAUD);
        let mut port = NativePort::open(&config).map_err(|e| {
            debug!("Opening {port_name} failed: {e}");
            Error::ReaderNotFound(port_name.clone())
        })?;
        port.clear_buffers()?;

        let mut pn532 = Pn532::new(port);
        let (ver, rev) = pn532.wake_up()?;
        info!("Now accessing tag reader PN532 v{ver}.{rev} on {port_name}");

        info!("Searching for a tag");
        let uid = pn532.wait_for_tag()?;
        info!("TAG connected: {uid:02X?}");

        Ok(Type2Tag::new(pn532))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::{TagTransport, type2::Type2Tag};
    use std::collections::VecDeque;
    use std::io::{Read, Write};

    /// Mock serial port with separate read/write buffers.
    struct MockSerial {
        read_buf: VecDeque<u8>,
        write_buf: Vec<u8>,
    }

    impl MockSerial {
        fn new(response: &[u8]) -> Self {
            Self {
                read_buf: response
                    .iter()
                    .copied()
                    .collect(),
                write_buf: Vec::new(),
            }
        }
    }

    impl Read for MockSerial {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.read_buf.is_empty() {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(self.read_buf.len());
            for b in buf.iter_mut().take(n) {
                *b = self.read_buf.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for MockSerial {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.write_buf.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockSerial {
        fn name(&self) -> &str {
            "mock"
        }

        fn clear_buffers(&mut self) -> Result<()> {
            self.read_buf
                .clear();
            Ok(())
        }
    }

    /// Response frame from the PN532 for `command` carrying `data`.
    #[allow(clippy::cast_possible_truncation)]
    fn response(command: Command, data: &[u8]) -> Vec<u8> {
        let mut body = vec![TFI_PN532, command as u8 + 1];
        body.extend_from_slice(data);
        let len = body.len() as u8;
        let sum = body
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b));

        let mut frame = vec![0x00, 0x00, 0xFF, len, len.wrapping_neg()];
        frame.extend_from_slice(&body);
        frame.push(sum.wrapping_neg());
        frame.push(0x00);
        frame
    }

    fn acked(command: Command, data: &[u8]) -> Vec<u8> {
        let mut bytes = ACK_FRAME.to_vec();
        bytes.extend(response(command, data));
        bytes
    }

    fn driver(script: &[u8]) -> Pn532<MockSerial> {
        Pn532::new(MockSerial::new(script)).with_timeout(Duration::from_millis(20))
    }

    #[test]
    fn test_build_frame_get_firmware_version() {
        assert_eq!(
            build_frame(Command::GetFirmwareVersion, &[]),
            vec![0x00, 0x00, 0xFF, 0x02, 0xFE, 0xD4, 0x02, 0x2A, 0x00]
        );
    }

    #[test]
    fn test_build_frame_sam_configuration() {
        assert_eq!(
            build_frame(Command::SamConfiguration, &[0x01, 0x14, 0x01]),
            vec![0x00, 0x00, 0xFF, 0x05, 0xFB, 0xD4, 0x14, 0x01, 0x14, 0x01, 0x02, 0x00]
        );
    }

    #[test]
    fn test_parse_ack_and_data() {
        let bytes = acked(Command::GetFirmwareVersion, &[0x32, 0x01, 0x06, 0x07]);

        let (frame, used) = parse_frame(&bytes).unwrap().unwrap();
        assert_eq!(frame, Frame::Ack);
        assert_eq!(used, 5);

        let (frame, _) = parse_frame(&bytes[used..]).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Data(vec![0xD5, 0x03, 0x32, 0x01, 0x06, 0x07])
        );
    }

    #[test]
    fn test_parse_incomplete_frame() {
        let bytes = response(Command::GetFirmwareVersion, &[0x32, 0x01, 0x06, 0x07]);
        for len in 0..bytes.len() - 1 {
            assert_eq!(parse_frame(&bytes[..len]).unwrap(), None);
        }
    }

    #[test]
    fn test_parse_bad_checksum() {
        let mut bytes = response(Command::GetFirmwareVersion, &[0x32, 0x01, 0x06, 0x07]);
        let dcs = bytes.len() - 2;
        bytes[dcs] ^= 0xFF;
        assert!(parse_frame(&bytes).is_err());

        assert!(parse_frame(&[0x00, 0x00, 0xFF, 0x05, 0x05]).is_err());
    }

    #[test]
    fn test_command_roundtrip() {
        let mut pn532 = driver(&acked(Command::GetFirmwareVersion, &[0x32, 0x01, 0x06, 0x07]));
        let data = pn532
            .command(Command::GetFirmwareVersion, &[])
            .unwrap();

        assert_eq!(data, vec![0x32, 0x01, 0x06, 0x07]);
        assert_eq!(
            pn532.port().write_buf,
            build_frame(Command::GetFirmwareVersion, &[])
        );
    }

    #[test]
    fn test_command_without_ack_times_out() {
        let mut pn532 = driver(&[]);
        let err = pn532
            .command(Command::GetFirmwareVersion, &[])
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_wake_up() {
        let mut script = acked(Command::SamConfiguration, &[]);
        script.extend(acked(Command::GetFirmwareVersion, &[0x32, 0x01, 0x06, 0x07]));
        script.extend(acked(Command::RfConfiguration, &[]));

        let mut pn532 = driver(&script);
        assert_eq!(pn532.wake_up().unwrap(), (1, 6));
        assert!(pn532
            .port()
            .write_buf
            .starts_with(&WAKE_UP));
    }

    #[test]
    fn test_detect_tag() {
        let uid = [0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let mut target = vec![0x01, 0x01, 0x00, 0x44, 0x00, 0x07];
        target.extend_from_slice(&uid);

        let mut pn532 = driver(&acked(Command::InListPassiveTarget, &target));
        assert_eq!(pn532.detect_tag().unwrap(), Some(uid.to_vec()));

        let mut pn532 = driver(&acked(Command::InListPassiveTarget, &[0x00]));
        assert_eq!(pn532.detect_tag().unwrap(), None);
    }

    #[test]
    fn test_read_pages_through_data_exchange() {
        let mut data = vec![0x00];
        data.extend_from_slice(&[0xAB; 16]);

        let mut pn532 = driver(&acked(Command::InDataExchange, &data));
        assert_eq!(pn532.read_pages(6).unwrap(), Some(vec![0xAB; 16]));
        assert_eq!(
            pn532.port().write_buf,
            build_frame(Command::InDataExchange, &[0x01, 0x30, 0x06])
        );
    }

    #[test]
    fn test_recovers_after_corrupt_frame() {
        let mut data = vec![0x00];
        data.extend_from_slice(&[0xAB; 16]);

        let mut corrupt = acked(Command::InDataExchange, &data);
        let dcs = corrupt.len() - 2;
        corrupt[dcs] ^= 0xFF;

        let mut script = corrupt;
        script.extend(acked(Command::InDataExchange, &data));
        let mut pn532 = driver(&script);

        assert!(matches!(pn532.read_pages(6), Err(Error::Transport(_))));
        assert_eq!(pn532.read_pages(6).unwrap(), Some(vec![0xAB; 16]));
    }

    #[test]
    fn test_tag_error_status() {
        let mut pn532 = driver(&acked(Command::InDataExchange, &[0x01]));
        assert!(!pn532
            .write_page(6, [1, 2, 3, 4])
            .unwrap());
    }

    #[test]
    fn test_type2_read_over_pn532() {
        // NDEF area holding a 6-byte response packet
        let mut memory = vec![0x03, 12, 0xD2, 0x03, 0x06, b'N', b'/', b'P'];
        memory.extend_from_slice(&[0x48, 0x01, 0x02, 0x00, 0x00, 0x00]);
        memory.resize(32, 0x00);

        let mut script = Vec::new();
        for block in memory.chunks(16) {
            let mut data = vec![0x00];
            data.extend_from_slice(block);
            script.extend(acked(Command::InDataExchange, &data));
        }

        let mut tag = Type2Tag::new(driver(&script));
        assert_eq!(
            tag.read().unwrap(),
            Some(vec![0x48, 0x01, 0x02, 0x00, 0x00, 0x00])
        );
    }
}
