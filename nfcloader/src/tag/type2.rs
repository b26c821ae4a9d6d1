//! NFC Forum Type 2 tag memory access.
//!
//! Both reader backends reach the tag through page reads and writes; this
//! module turns those into the [`TagTransport`] packet exchange by framing
//! packets as NDEF messages starting at page 6.

use {
    super::{
        TagTransport,
        ndef::{self, PAGE_SIZE, READ_WINDOW},
    },
    crate::error::{Error, Result},
    log::trace,
};

/// First page of the NDEF area.
pub const NDEF_START_PAGE: u8 = 0x06;

/// Page-level access to a Type 2 tag.
pub trait PageAccess {
    /// Read memory starting at `page`.
    ///
    /// Readers return either four pages (16 bytes) or a single page
    /// (4 bytes). `None` means the read was refused.
    fn read_pages(&mut self, page: u8) -> Result<Option<Vec<u8>>>;

    /// Write one page. Returns `false` when the tag refused the write.
    fn write_page(&mut self, page: u8, data: [u8; PAGE_SIZE]) -> Result<bool>;
}

/// A Type 2 tag carrying download packets in its NDEF area.
pub struct Type2Tag<A: PageAccess> {
    access: A,
}

impl<A: PageAccess> Type2Tag<A> {
    /// Wrap a page-access channel.
    pub fn new(access: A) -> Self {
        Self { access }
    }

    /// Consume the tag and return the underlying channel.
    pub fn into_access(self) -> A {
        self.access
    }

    fn write_checked(&mut self, page: u8, data: [u8; PAGE_SIZE]) -> Result<()> {
        if self
            .access
            .write_page(page, data)?
        {
            Ok(())
        } else {
            Err(Error::Transport(format!(
                "write refused at page {}",
                page - NDEF_START_PAGE
            )))
        }
    }
}

impl<A: PageAccess> TagTransport for Type2Tag<A> {
    #[allow(clippy::cast_possible_truncation)]
    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        let mut data = Vec::with_capacity(READ_WINDOW + 16);
        let mut page = NDEF_START_PAGE;

        while data.len() < READ_WINDOW {
            let Some(block) = self
                .access
                .read_pages(page)?
            else {
                return Ok(None);
            };
            if block.len() < PAGE_SIZE {
                return Ok(None);
            }
            // Word-only readers return a single page per read
            page += (block.len() / PAGE_SIZE) as u8;
            data.extend_from_slice(&block);
        }
        data.truncate(READ_WINDOW);

        Ok(ndef::decode_message(&data))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write(&mut self, packet: &[u8]) -> Result<()> {
        let message = ndef::encode_message(packet);
        trace!(
            "Writing {} byte packet as {} pages",
            packet.len(),
            message.page_count()
        );

        for (index, chunk) in message
            .body
            .chunks_exact(PAGE_SIZE)
            .enumerate()
        {
            let mut word = [0u8; PAGE_SIZE];
            word.copy_from_slice(chunk);
            // At most 128 pages, fits the tag's page numbering
            self.write_checked(NDEF_START_PAGE + index as u8, word)?;
        }

        // Publish the real NDEF length last
        self.write_checked(NDEF_START_PAGE, message.first_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// In-memory tag with an optional word-only read mode.
    struct MemoryTag {
        pages: BTreeMap<u8, [u8; PAGE_SIZE]>,
        word_reads: bool,
        refuse_write_at: Option<u8>,
        writes: Vec<u8>,
    }

    impl MemoryTag {
        fn new() -> Self {
            Self {
                pages: BTreeMap::new(),
                word_reads: false,
                refuse_write_at: None,
                writes: Vec::new(),
            }
        }

        fn page(&self, page: u8) -> [u8; PAGE_SIZE] {
            self.pages
                .get(&page)
                .copied()
                .unwrap_or_default()
        }
    }

    impl PageAccess for MemoryTag {
        fn read_pages(&mut self, page: u8) -> Result<Option<Vec<u8>>> {
            let count = if self.word_reads { 1 } else { 4 };
            Ok(Some(
                (page..page + count)
                    .flat_map(|p| self.page(p))
                    .collect(),
            ))
        }

        fn write_page(&mut self, page: u8, data: [u8; PAGE_SIZE]) -> Result<bool> {
            if self.refuse_write_at == Some(page) {
                return Ok(false);
            }
            self.writes.push(page);
            self.pages.insert(page, data);
            Ok(true)
        }
    }

    #[test]
    fn test_write_then_read_back() {
        let mut tag = Type2Tag::new(MemoryTag::new());
        let packet = [0x49, 0x01, 0x01, 0x00, 0x00, 0x00];

        tag.write(&packet).unwrap();
        assert_eq!(tag.read().unwrap(), Some(packet.to_vec()));
    }

    #[test]
    fn test_write_publishes_first_page_last() {
        let mut tag = Type2Tag::new(MemoryTag::new());
        tag.write(&[0xAB; 20]).unwrap();

        let memory = tag.into_access();
        // 2 + 3 + 3 + 20 = 28 bytes -> 7 pages, then page 6 again
        assert_eq!(memory.writes, vec![6, 7, 8, 9, 10, 11, 12, 6]);
        assert_eq!(memory.page(6), [0x03, 26, 0xD2, 0x03]);
    }

    #[test]
    fn test_word_only_reader() {
        let mut memory = MemoryTag::new();
        memory.word_reads = true;
        let mut tag = Type2Tag::new(memory);
        let packet = [0x48, 0x01, 0x02, 0x00, 0x00, 0x00];

        tag.write(&packet).unwrap();
        assert_eq!(tag.read().unwrap(), Some(packet.to_vec()));
    }

    #[test]
    fn test_read_empty_tag() {
        let mut tag = Type2Tag::new(MemoryTag::new());
        assert_eq!(tag.read().unwrap(), None);
    }

    #[test]
    fn test_refused_write_is_transport_error() {
        let mut memory = MemoryTag::new();
        memory.refuse_write_at = Some(NDEF_START_PAGE + 2);
        let mut tag = Type2Tag::new(memory);

        let err = tag.write(&[0u8; 30]).unwrap_err();
        assert!(matches!(err, Error::Transport(ref msg) if msg.contains("page 2")));
    }

    #[test]
    fn test_refused_read_is_absent() {
        struct Refusing;

        impl PageAccess for Refusing {
            fn read_pages(&mut self, _page: u8) -> Result<Option<Vec<u8>>> {
                Ok(None)
            }

            fn write_page(&mut self, _page: u8, _data: [u8; PAGE_SIZE]) -> Result<bool> {
                Ok(true)
            }
        }

        let mut tag = Type2Tag::new(Refusing);
        assert_eq!(tag.read().unwrap(), None);
    }
}
