//! Scripted tag transport for exercising the download session without hardware.

use {
    super::TagTransport,
    crate::error::{Error, Result},
    std::collections::VecDeque,
};

/// A tag that answers reads from a script and records every write.
///
/// Once the script is exhausted every read returns `None`, like a tag
/// whose NDEF area holds nothing the host recognises.
#[derive(Debug, Default)]
pub struct MockTransport {
    reads: VecDeque<Option<Vec<u8>>>,
    writes: Vec<Vec<u8>>,
    fail_write_at: Option<usize>,
    reads_served: usize,
}

impl MockTransport {
    /// Create a transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next read.
    pub fn push_read(&mut self, packet: Option<Vec<u8>>) {
        self.reads
            .push_back(packet);
    }

    /// Queue a packet for a later read.
    #[must_use]
    pub fn with_read(mut self, packet: impl Into<Vec<u8>>) -> Self {
        self.push_read(Some(packet.into()));
        self
    }

    /// Queue `count` empty reads.
    #[must_use]
    pub fn with_empty_reads(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.push_read(None);
        }
        self
    }

    /// Make the write with the given zero-based index fail.
    #[must_use]
    pub fn fail_write_at(mut self, index: usize) -> Self {
        self.fail_write_at = Some(index);
        self
    }

    /// Packets written so far.
    pub fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// Number of reads answered so far.
    pub fn reads_served(&self) -> usize {
        self.reads_served
    }
}

impl TagTransport for MockTransport {
    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        self.reads_served += 1;
        Ok(self
            .reads
            .pop_front()
            .flatten())
    }

    fn write(&mut self, packet: &[u8]) -> Result<()> {
        if self.fail_write_at == Some(self.writes.len()) {
            return Err(Error::Transport("tag left the field".into()));
        }
        self.writes
            .push(packet.to_vec());
        Ok(())
    }
}
