//! Firmware image source.
//!
//! The image is streamed from disk in chunks; it is never loaded whole. The
//! file handle is released when the [`FirmwareImage`] is dropped, which the
//! download session does on every exit path.

use {
    crate::error::Result,
    log::debug,
    std::{
        fs::File,
        io::{self, BufReader, Read},
        path::{Path, PathBuf},
    },
};

/// A firmware image opened for streaming.
#[derive(Debug)]
pub struct FirmwareImage {
    reader: BufReader<File>,
    path: PathBuf,
    len: u64,
}

impl FirmwareImage {
    /// Open an image file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening firmware image: {}", path.display());

        let file = File::open(path)?;
        let len = file
            .metadata()?
            .len();

        Ok(Self {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            len,
        })
    }

    /// Size of the image in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path the image was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Read for FirmwareImage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader
            .read(buf)
    }
}

/// Read up to `max` bytes, fewer only at end of input.
pub fn read_chunk<R: Read>(reader: &mut R, max: usize) -> io::Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(max);
    reader
        .by_ref()
        .take(max as u64)
        .read_to_end(&mut chunk)?;
    Ok(chunk)
}
