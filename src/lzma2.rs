use std::io::{self, Read};

use log::trace;

use crate::{
    dict::Dictionary, lzma::LzmaDecoder, range_dec::RangeDecoder, ByteReader, Error, Result,
};

/// Upper bound on one chunk's compressed payload: the chunk header stores
/// the compressed size minus one in 16 bits.
pub(crate) const COMPRESSED_SIZE_MAX: usize = 1 << 16;

/// Memory required for LZMA2 decompression with the given dictionary size,
/// in KiB.
pub fn get_memory_usage(dict_size: u32) -> u32 {
    let dict = ((dict_size as u64 + 15) & !15) / 1024;
    40 + (COMPRESSED_SIZE_MAX as u32) / 1024 + dict as u32
}

/// A streaming decoder for a raw LZMA2 chunk sequence.
///
/// This is the filter layer of an XZ block, usable on its own when the
/// chunk stream and dictionary size come from elsewhere.
///
/// # Examples
/// ```
/// use std::io::Read;
///
/// use xzdec::Lzma2Reader;
///
/// let compressed: Vec<u8> = vec![
///     1, 0, 12, 72, 101, 108, 108, 111, 44, 32, 119, 111, 114, 108, 100, 33, 0,
/// ];
/// let mut reader = Lzma2Reader::new(compressed.as_slice(), 4096).unwrap();
/// let mut decompressed = Vec::new();
/// reader.read_to_end(&mut decompressed).unwrap();
/// assert_eq!(&decompressed[..], b"Hello, world!");
/// ```
pub struct Lzma2Reader<R> {
    inner: R,
    dict: Dictionary,
    rc: RangeDecoder,
    lzma: Option<LzmaDecoder>,
    uncompressed_left: usize,
    is_lzma_chunk: bool,
    need_dict_reset: bool,
    need_props: bool,
    end_reached: bool,
    error: Option<Error>,
}

impl<R> Lzma2Reader<R> {
    /// Unwraps the reader, returning the underlying byte source.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Lzma2Reader<R> {
    /// Creates a new LZMA2 reader over `inner` with a dictionary of
    /// `dict_size` bytes. Fails only if the dictionary cannot be
    /// allocated.
    pub fn new(inner: R, dict_size: u32) -> Result<Self> {
        Ok(Self {
            inner,
            dict: Dictionary::new(dict_size)?,
            rc: RangeDecoder::new(COMPRESSED_SIZE_MAX),
            lzma: None,
            uncompressed_left: 0,
            is_lzma_chunk: false,
            need_dict_reset: true,
            need_props: true,
            end_reached: false,
            error: None,
        })
    }

    // Control byte map:
    //   0x00         end of the LZMA2 payload
    //   0x01         uncompressed chunk, dictionary reset first
    //   0x02         uncompressed chunk
    //   0x03..=0x7F  reserved
    //   0x80..=0xFF  LZMA chunk; bits 5..6 select the reset level
    //                (0 none, 1 state, 2 state+props, 3 state+props+dict)
    //                and bits 0..4 are the top bits of the uncompressed
    //                size minus one.
    fn decode_chunk_header(&mut self) -> Result<()> {
        let control = self.inner.read_u8()?;

        if control == 0x00 {
            self.end_reached = true;
            return Ok(());
        }
        if (0x03..=0x7F).contains(&control) {
            return Err(Error::BadControlByte(control));
        }

        if control >= 0xE0 || control == 0x01 {
            // A dictionary reset also invalidates the properties; the next
            // coded chunk must carry a fresh properties byte.
            self.need_props = true;
            self.need_dict_reset = false;
            self.dict.reset();
        } else if self.need_dict_reset {
            return Err(Error::BadControlByte(control));
        }

        if control >= 0x80 {
            self.is_lzma_chunk = true;
            let mut uncompressed_size = ((control & 0x1F) as usize) << 16;
            uncompressed_size += self.inner.read_u16_be()? as usize + 1;
            let compressed_size = self.inner.read_u16_be()? as usize + 1;

            if control >= 0xC0 {
                self.need_props = false;
                self.decode_props()?;
            } else if self.need_props {
                return Err(Error::BadControlByte(control));
            } else if control >= 0xA0 {
                if let Some(lzma) = self.lzma.as_mut() {
                    lzma.reset();
                }
            }

            trace!(
                "lzma2: coded chunk, {uncompressed_size} bytes from {compressed_size} coded bytes"
            );
            self.uncompressed_left = uncompressed_size;
            self.rc.prepare(&mut self.inner, compressed_size)?;
        } else {
            self.is_lzma_chunk = false;
            self.uncompressed_left = self.inner.read_u16_be()? as usize + 1;
            trace!("lzma2: uncompressed chunk, {} bytes", self.uncompressed_left);
        }

        Ok(())
    }

    /// Reads a properties byte and rebuilds the LZMA decoder around it.
    fn decode_props(&mut self) -> Result<()> {
        let props = self.inner.read_u8()?;
        if props > (4 * 5 + 4) * 9 + 8 {
            return Err(Error::BadProperties);
        }
        let pb = props / (9 * 5);
        let rest = props - pb * 9 * 5;
        let lp = rest / 9;
        let lc = rest - lp * 9;
        if lc + lp > 4 {
            return Err(Error::BadProperties);
        }
        self.lzma = Some(LzmaDecoder::new(lc as u32, lp as u32, pb as u32));
        Ok(())
    }

    fn read_decode(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(error) = &self.error {
            return Err(error.duplicate());
        }
        if self.end_reached {
            return Ok(0);
        }

        let mut size = 0;
        let mut len = buf.len();
        let mut off = 0;
        while len > 0 {
            if self.uncompressed_left == 0 {
                self.decode_chunk_header()?;
                if self.end_reached {
                    return Ok(size);
                }
            }

            let copy_size_max = self.uncompressed_left.min(len);
            if self.is_lzma_chunk {
                self.dict.set_limit(copy_size_max);
                if let Some(lzma) = self.lzma.as_mut() {
                    lzma.decode(&mut self.dict, &mut self.rc)?;
                }
            } else {
                self.dict.copy_uncompressed(&mut self.inner, copy_size_max)?;
            }

            let copied = self.dict.flush(buf, off);
            off += copied;
            len -= copied;
            size += copied;
            self.uncompressed_left -= copied;

            if self.uncompressed_left == 0 {
                if self.is_lzma_chunk {
                    if self.rc.has_input_left() {
                        return Err(Error::SizeMismatch);
                    }
                    if !self.rc.is_code_clear() {
                        return Err(Error::RangeDecoderDirty);
                    }
                }
                if self.dict.has_pending() {
                    return Err(Error::SizeMismatch);
                }
            }
        }
        Ok(size)
    }

    /// Like `read`, but keeps the crate error type. The first error is
    /// latched and repeated on every later call.
    pub(crate) fn pull(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.read_decode(buf) {
            Ok(size) => Ok(size),
            Err(error) => {
                self.error = Some(error.duplicate());
                Err(error)
            }
        }
    }
}

impl<R: Read> Read for Lzma2Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pull(buf).map_err(Into::into)
    }
}
