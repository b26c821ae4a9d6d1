//! Download session.
//!
//! Drives one flash attempt over a connected tag:
//!
//! ```text
//! AwaitingHandshake --> TransferLoop --> Successful
//!         |                  |
//!         +------------------+--> Failed
//!         |                  |
//!         +------------------+--> Aborted (user request)
//! ```
//!
//! The handshake polls the tag until the downloader publishes a supported
//! version. The transfer loop then sends the image in chunks of at most
//! [`MAX_CHUNK_SIZE`] bytes and waits for the answer to each one before
//! sending the next. A chunk of at most [`FINAL_CHUNK_THRESHOLD`] bytes is
//! the final one and carries the CRC over the whole image.
//!
//! Every wait is bounded by a deadline on a monotonic [`Clock`].

use {
    crate::{
        error::{Error, Result},
        image::read_chunk,
        protocol::{
            Crc16, DeviceError, TransferOutcome, VersionInfo, decode_response, decode_version,
            encode_chunk,
            packet::{EXPECTED_API_VERSION, FINAL_CHUNK_THRESHOLD, MAX_CHUNK_SIZE},
        },
        tag::TagTransport,
    },
    log::{debug, info, trace, warn},
    std::{
        fmt,
        io::Read,
        thread,
        time::{Duration, Instant},
    },
};

/// Default delay between two reads of the tag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Default time the downloader has to publish its version.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default time the downloader has to answer a chunk.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Monotonic time source for the polling loops.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block for `duration`.
    fn sleep(&mut self, duration: Duration);
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Session timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Delay between two reads of the tag.
    pub poll_interval: Duration,
    /// Time allowed for the version handshake.
    pub handshake_timeout: Duration,
    /// Time allowed for the answer to each chunk.
    pub response_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Why a session failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// No supported version packet was read in time.
    HandshakeTimeout,
    /// The tag answered with a version this loader does not speak.
    VersionMismatch(VersionInfo),
    /// No decisive answer to a chunk in time.
    ResponseTimeout,
    /// Writing a chunk to the tag failed.
    TransportWrite(String),
    /// Reading the answer from the tag failed.
    TransportRead(String),
    /// The downloader rejected the transfer.
    Device(DeviceError),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeTimeout => {
                f.write_str("Correct application version of tag not found within time limit")
            },
            Self::VersionMismatch(info) => write!(
                f,
                "Unsupported downloader version ({info}), expected firmware {}.{}",
                crate::protocol::packet::EXPECTED_SW_VERSION.0,
                crate::protocol::packet::EXPECTED_SW_VERSION.1
            ),
            Self::ResponseTimeout => f.write_str("no response from the tag within time limit"),
            Self::TransportWrite(e) => write!(f, "writing to the tag failed: {e}"),
            Self::TransportRead(e) => write!(f, "reading from the tag failed: {e}"),
            Self::Device(e) => write!(f, "downloader reported {e}"),
        }
    }
}

/// A failed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    /// What went wrong.
    pub cause: FailureCause,
    /// The final, CRC-bearing chunk had already been sent. The downloader
    /// may have started replacing itself and the IC state is unknown.
    pub critical: bool,
    /// Image bytes sent before the failure.
    pub bytes_sent: usize,
}

impl TransferFailure {
    /// Whether the failure happened before any chunk was sent.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self.cause,
            FailureCause::HandshakeTimeout | FailureCause::VersionMismatch(_)
        )
    }
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_handshake() {
            return write!(f, "{}", self.cause);
        }

        write!(
            f,
            "Transmission of data, or reception of response failed ({}).",
            self.cause
        )?;
        if self.critical {
            f.write_str(
                " This error occurred during the critical point: the one-time NFC program \
                 downloader firmware may already have been erased.",
            )
        } else {
            f.write_str(" Reset the IC and try again.")
        }
    }
}

impl std::error::Error for TransferFailure {}

/// Summary of a successful session.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    /// Image bytes transmitted.
    pub bytes_sent: usize,
    /// Chunks transmitted, the final one included.
    pub chunks: usize,
    /// Time from the first chunk to the final answer.
    pub elapsed: Duration,
    /// Version reported by the downloader.
    pub device: VersionInfo,
}

impl TransferReport {
    /// Effective throughput in bytes per second.
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        if self.elapsed.is_zero() {
            0.0
        } else {
            self.bytes_sent as f64 / self.elapsed.as_secs_f64()
        }
    }
}

/// Progress after a chunk was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Image bytes written so far.
    pub sent: usize,
    /// Image size as announced by the caller.
    pub total: usize,
    /// Time since the first chunk.
    pub elapsed: Duration,
    /// The chunk just written was the final one.
    pub final_chunk: bool,
}

/// Session events reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The downloader answered the handshake.
    Connected(VersionInfo),
    /// A chunk was written to the tag.
    ChunkSent(Progress),
}

/// State owned by one transfer loop.
struct TransferSession {
    crc: Crc16,
    sent: usize,
    chunks: usize,
    started: Instant,
    last_was_final: bool,
}

impl TransferSession {
    fn new(started: Instant) -> Self {
        Self {
            crc: Crc16::new(),
            sent: 0,
            chunks: 0,
            started,
            last_was_final: false,
        }
    }

    fn fail(&self, cause: FailureCause) -> Error {
        Error::Transfer(TransferFailure {
            cause,
            critical: self.last_was_final,
            bytes_sent: self.sent,
        })
    }
}

/// Runs download sessions over a tag transport.
pub struct Downloader<T: TagTransport, C: Clock = SystemClock> {
    transport: T,
    clock: C,
    config: SessionConfig,
    interrupted: Box<dyn Fn() -> bool + Send + Sync>,
}

impl<T: TagTransport> Downloader<T> {
    /// Create a downloader with the default timing.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            clock: SystemClock,
            config: SessionConfig::default(),
            interrupted: Box::new(crate::is_interrupted_requested),
        }
    }
}

impl<T: TagTransport, C: Clock> Downloader<T, C> {
    /// Use another clock.
    #[must_use]
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Downloader<T, C2> {
        Downloader {
            transport: self.transport,
            clock,
            config: self.config,
            interrupted: self.interrupted,
        }
    }

    /// Set the session timing.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the global interrupt checker for this downloader.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.interrupted = Box::new(checker);
        self
    }

    /// Session timing.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Download `image` to the tag.
    ///
    /// `total` is only used for progress reporting. The image is consumed
    /// and dropped before this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::Transfer`] when the session fails; see
    ///   [`TransferFailure::critical`]
    /// - [`Error::Cancelled`] when an interruption was requested
    /// - [`Error::Io`] when the image cannot be read
    pub fn run<R, F>(&mut self, mut image: R, total: usize, mut on_event: F) -> Result<TransferReport>
    where
        R: Read,
        F: FnMut(Event),
    {
        let device = self.handshake()?;
        info!("Tag present, application version OK");
        debug!("Downloader reports {device}");
        on_event(Event::Connected(device));

        let mut session = TransferSession::new(self.clock.now());

        loop {
            self.check_interrupt()?;

            let chunk = read_chunk(&mut image, MAX_CHUNK_SIZE)?;
            let crc = session
                .crc
                .update(&chunk);
            let is_final = chunk.len() <= FINAL_CHUNK_THRESHOLD;
            let packet = encode_chunk(&chunk, is_final.then_some(crc))?;

            let elapsed = self.clock.now() - session.started;
            if is_final {
                info!(
                    "[{:5.2}] Sending the last {} bytes",
                    elapsed.as_secs_f64(),
                    chunk.len()
                );
            } else {
                info!(
                    "[{:5.2}] Sending {} bytes of data ...",
                    elapsed.as_secs_f64(),
                    chunk.len()
                );
            }
            trace!("Chunk packet: {} bytes, crc 0x{crc:04X}", packet.len());

            session.last_was_final = is_final;
            if let Err(e) = self
                .transport
                .write(&packet)
            {
                if e.is_cancelled() {
                    return Err(e);
                }
                return Err(session.fail(FailureCause::TransportWrite(e.to_string())));
            }
            session.sent += chunk.len();
            session.chunks += 1;

            on_event(Event::ChunkSent(Progress {
                sent: session.sent,
                total,
                elapsed,
                final_chunk: is_final,
            }));

            if self.await_response(&session)? == TransferOutcome::Successful {
                break;
            }
        }

        drop(image);

        let elapsed = self.clock.now() - session.started;
        debug!("Download completed in {elapsed:?}");
        Ok(TransferReport {
            bytes_sent: session.sent,
            chunks: session.chunks,
            elapsed,
            device,
        })
    }

    fn check_interrupt(&self) -> Result<()> {
        if (self.interrupted)() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep until the next poll. `false` once `deadline` has passed.
    fn wait_poll(&mut self, deadline: Instant) -> bool {
        let now = self.clock.now();
        if now >= deadline {
            return false;
        }
        let remaining = deadline - now;
        self.clock
            .sleep(
                self.config
                    .poll_interval
                    .min(remaining),
            );
        true
    }

    fn handshake(&mut self) -> Result<VersionInfo> {
        let deadline = self.clock.now() + self.config.handshake_timeout;
        let mut reported = None;

        loop {
            self.check_interrupt()?;

            match self.transport.read() {
                Ok(packet) => {
                    let check = decode_version(packet.as_deref());
                    if let (true, Some(info)) = (check.matched, check.reported) {
                        if !info.api_matches() {
                            warn!(
                                "Downloader reports API {}.{}, expected {}.{}",
                                info.api_major,
                                info.api_minor,
                                EXPECTED_API_VERSION.0,
                                EXPECTED_API_VERSION.1
                            );
                        }
                        return Ok(info);
                    }
                    if check.reported.is_some() {
                        reported = check.reported;
                    }
                },
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => debug!("Tag read failed during handshake: {e}"),
            }

            if !self.wait_poll(deadline) {
                let cause = reported.map_or(
                    FailureCause::HandshakeTimeout,
                    FailureCause::VersionMismatch,
                );
                return Err(Error::Transfer(TransferFailure {
                    cause,
                    critical: false,
                    bytes_sent: 0,
                }));
            }
        }
    }

    /// Wait for a decisive answer to the chunk just sent.
    ///
    /// Returns [`TransferOutcome::Ongoing`] or [`TransferOutcome::Successful`].
    fn await_response(&mut self, session: &TransferSession) -> Result<TransferOutcome> {
        let deadline = self.clock.now() + self.config.response_timeout;

        loop {
            self.check_interrupt()?;

            match self.transport.read() {
                Ok(Some(packet)) => match decode_response(&packet) {
                    outcome @ (TransferOutcome::Ongoing | TransferOutcome::Successful) => {
                        return Ok(outcome);
                    },
                    TransferOutcome::Failed(err) => {
                        return Err(session.fail(FailureCause::Device(err)));
                    },
                    TransferOutcome::Invalid => trace!("Ignoring {packet:02X?}"),
                },
                Ok(None) => {},
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => return Err(session.fail(FailureCause::TransportRead(e.to_string()))),
            }

            if !self.wait_poll(deadline) {
                return Err(session.fail(FailureCause::ResponseTimeout));
            }
        }
    }
}
