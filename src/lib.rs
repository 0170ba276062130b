//! Streaming decoder for the XZ container format and its LZMA2 filter.
//!
//! The crate exposes two readers. [`XzReader`] consumes a complete `.xz`
//! stream: it parses the stream header, decodes every block through the
//! mandatory LZMA2 filter, and verifies block checks, the index and the
//! stream footer before reporting a clean end of stream. [`Lzma2Reader`]
//! decodes a raw LZMA2 chunk sequence and is what the XZ layer instantiates
//! for each block.
//!
//! Both readers implement [`std::io::Read`]. Any decoding failure is one of
//! the [`Error`] kinds; once a reader has failed it stays failed and no
//! further input is consumed.

mod dict;
mod error;
mod lzma;
mod lzma2;
mod range_dec;
mod state;
mod vli;
mod xz;

use std::io::Read;

pub use error::{Error, Result};
pub use lzma2::{get_memory_usage as lzma2_get_memory_usage, Lzma2Reader};
pub use xz::{CheckType, XzReader};

/// The minimal size of an LZMA2 dictionary.
pub const DICT_SIZE_MIN: u32 = 4096;

/// The maximal size of an LZMA2 dictionary.
pub const DICT_SIZE_MAX: u32 = u32::MAX;

pub(crate) trait ByteReader {
    fn read_u8(&mut self) -> Result<u8>;

    fn read_u16_be(&mut self) -> Result<u16>;

    fn read_u32_le(&mut self) -> Result<u32>;

    fn read_u32_be(&mut self) -> Result<u32>;
}

impl<T: Read> ByteReader for T {
    #[inline(always)]
    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    #[inline(always)]
    fn read_u16_be(&mut self) -> Result<u16> {
        let mut buf = [0; 2];
        self.read_exact(buf.as_mut())?;
        Ok(u16::from_be_bytes(buf))
    }

    #[inline(always)]
    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0; 4];
        self.read_exact(buf.as_mut())?;
        Ok(u32::from_le_bytes(buf))
    }

    #[inline(always)]
    fn read_u32_be(&mut self) -> Result<u32> {
        let mut buf = [0; 4];
        self.read_exact(buf.as_mut())?;
        Ok(u32::from_be_bytes(buf))
    }
}

/// Counts the bytes forwarded from an inner reader.
///
/// A block hands its source to a `CountingReader` for the duration of the
/// block body and takes it back afterwards, so declared block sizes and the
/// padding alignment can be checked against what was actually consumed.
pub(crate) struct CountingReader<R> {
    inner: R,
    bytes_read: u64,
}

impl<R> CountingReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            bytes_read: 0,
        }
    }

    pub(crate) fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub(crate) fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read_size = self.inner.read(buf)?;
        self.bytes_read += read_size as u64;
        Ok(read_size)
    }
}
