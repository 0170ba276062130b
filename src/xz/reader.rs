use std::io::{self, Read};

use log::debug;

use super::{
    header::{BlockHeader, StreamFooter, StreamHeader},
    Check, CRC32,
};
use crate::{vli::read_vli, ByteReader, CountingReader, Error, Lzma2Reader, Result};

/// Streaming XZ decoder.
///
/// Consumes a single XZ stream from the inner byte source and produces the
/// uncompressed bytes through [`std::io::Read`]. Every framing rule is
/// enforced: stream header, per-block header CRCs, block padding, the block
/// check, the index (matched record by record against the decoded blocks)
/// and the stream footer. `read` returns 0 only once the whole stream,
/// footer included, has been verified.
///
/// # Examples
/// ```no_run
/// use std::{fs::File, io};
///
/// let file = File::open("archive.xz")?;
/// let mut reader = xzdec::XzReader::new(io::BufReader::new(file));
/// let mut output = Vec::new();
/// io::Read::read_to_end(&mut reader, &mut output)?;
/// # Ok::<(), io::Error>(())
/// ```
pub struct XzReader<R> {
    /// The source; `None` while a block decoder owns it.
    source: Option<R>,
    block: Option<BlockDecoder<R>>,
    header: Option<StreamHeader>,
    records: Vec<IndexRecord>,
    finished: bool,
    error: Option<Error>,
}

/// Per-block sizes remembered for index verification.
struct IndexRecord {
    unpadded_size: u64,
    uncompressed_size: u64,
}

/// Decoding state of the block currently being read. Owns the source
/// through the counted reader until the block ends.
struct BlockDecoder<R> {
    lzma2: Lzma2Reader<CountingReader<R>>,
    check: Check,
    header_size: u64,
    compressed_size: Option<u64>,
    uncompressed_size: Option<u64>,
    produced: u64,
}

impl<R: Read> XzReader<R> {
    /// Creates a new XZ reader over `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            source: Some(inner),
            block: None,
            header: None,
            records: Vec::new(),
            finished: false,
            error: None,
        }
    }

    /// Unwraps the reader, returning the underlying byte source.
    ///
    /// # Panics
    /// Panics if the reader failed in the middle of constructing a block,
    /// in which case the source is gone.
    pub fn into_inner(self) -> R {
        match self.block {
            Some(block) => block.lzma2.into_inner().into_inner(),
            None => self.source.expect("source lost in a failed block"),
        }
    }

    fn source_mut(&mut self) -> &mut R {
        self.source.as_mut().expect("source not set")
    }

    fn read_stream_header(&mut self) -> Result<()> {
        if self.header.is_none() {
            let header = StreamHeader::parse(self.source_mut())?;
            debug!("xz: stream header accepted, check type {:?}", header.check_type);
            self.header = Some(header);
        }
        Ok(())
    }

    /// Parses a block header and moves the source into a fresh LZMA2
    /// decoder wrapped in a counted reader.
    fn begin_block(&mut self, size_byte: u8) -> Result<()> {
        let header = BlockHeader::parse(self.source_mut(), size_byte)?;
        debug!(
            "xz: block with {} byte dictionary, sizes {:?}/{:?}",
            header.dict_size, header.compressed_size, header.uncompressed_size
        );

        let check_type = self.header.as_ref().expect("stream header parsed").check_type;
        let source = self.source.take().expect("source not set");
        let lzma2 = Lzma2Reader::new(CountingReader::new(source), header.dict_size)?;

        self.block = Some(BlockDecoder {
            lzma2,
            check: Check::new(check_type),
            header_size: header.header_size,
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size,
            produced: 0,
        });
        Ok(())
    }

    /// Verifies the finished block's sizes, padding and check, reclaims
    /// the source and records the block for index verification.
    fn finish_block(&mut self) -> Result<()> {
        let block = self.block.take().expect("block not set");
        let counted = block.lzma2.into_inner();
        let compressed = counted.bytes_read();
        self.source = Some(counted.into_inner());

        if block.compressed_size.is_some_and(|declared| declared != compressed) {
            return Err(Error::SizeMismatch);
        }
        if block
            .uncompressed_size
            .is_some_and(|declared| declared != block.produced)
        {
            return Err(Error::SizeMismatch);
        }

        let source = self.source_mut();
        let padding = ((4 - (compressed & 3)) & 3) as usize;
        for _ in 0..padding {
            if source.read_u8()? != 0x00 {
                return Err(Error::BadPadding);
            }
        }

        let check_size = block.check.size();
        let mut stored = [0u8; 32];
        source.read_exact(&mut stored[..check_size])?;
        if !block.check.verify(&stored[..check_size]) {
            return Err(Error::BadChecksum);
        }

        self.records.push(IndexRecord {
            unpadded_size: block.header_size + compressed + check_size as u64,
            uncompressed_size: block.produced,
        });
        Ok(())
    }

    /// Called once the index indicator byte has been consumed; checks the
    /// index against the decoded blocks, then the footer, then reports
    /// end of stream.
    fn read_index_and_footer(&mut self) -> Result<()> {
        let flags = self.header.as_ref().expect("stream header parsed").flags;
        let mut source = self.source.take().expect("source not set");
        let result = verify_stream_tail(&mut source, &self.records, flags);
        self.source = Some(source);
        result?;
        debug!("xz: index and footer verified, {} block(s)", self.records.len());
        Ok(())
    }

    fn read_decode(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(error) = &self.error {
            return Err(error.duplicate());
        }
        if self.finished || buf.is_empty() {
            return Ok(0);
        }

        self.read_stream_header()?;

        loop {
            if let Some(block) = self.block.as_mut() {
                let size = block.lzma2.pull(buf)?;
                if size > 0 {
                    block.check.update(&buf[..size]);
                    block.produced += size as u64;
                    return Ok(size);
                }
                self.finish_block()?;
            } else {
                let byte = self.source_mut().read_u8()?;
                if byte == 0x00 {
                    self.read_index_and_footer()?;
                    self.finished = true;
                    return Ok(0);
                }
                self.begin_block(byte)?;
            }
        }
    }
}

impl<R: Read> Read for XzReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_decode(buf) {
            Ok(size) => Ok(size),
            Err(error) => {
                self.error = Some(error.duplicate());
                Err(error.into())
            }
        }
    }
}

/// Reads and verifies the index (indicator already consumed) and the
/// stream footer.
fn verify_stream_tail<R: Read>(
    source: &mut R,
    records: &[IndexRecord],
    stream_flags: [u8; 2],
) -> Result<()> {
    let mut index = Crc32Reader::new(&mut *source);
    index.absorb(&[0x00]);

    let record_count = read_vli(&mut index)?;
    if record_count != records.len() as u64 {
        return Err(Error::SizeMismatch);
    }
    for record in records {
        let unpadded_size = read_vli(&mut index)?;
        let uncompressed_size = read_vli(&mut index)?;
        if unpadded_size != record.unpadded_size
            || uncompressed_size != record.uncompressed_size
        {
            return Err(Error::SizeMismatch);
        }
    }

    let padding = ((4 - (index.count & 3)) & 3) as usize;
    for _ in 0..padding {
        if index.read_u8()? != 0x00 {
            return Err(Error::BadPadding);
        }
    }

    let (computed, index_size) = index.finish();
    let stored = source.read_u32_le()?;
    if stored != computed {
        return Err(Error::BadCrc);
    }

    let footer = StreamFooter::parse(source, stream_flags)?;
    if footer.backward_size != index_size + 4 {
        return Err(Error::SizeMismatch);
    }
    Ok(())
}

/// Feeds everything it reads into a rolling CRC32 and counts it, for the
/// index whose digest covers fields of unknown length.
struct Crc32Reader<R> {
    inner: R,
    digest: crc::Digest<'static, u32, crc::Table<16>>,
    count: u64,
}

impl<R: Read> Crc32Reader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            digest: CRC32.digest(),
            count: 0,
        }
    }

    /// Accounts for bytes that were consumed before this reader existed.
    fn absorb(&mut self, bytes: &[u8]) {
        self.digest.update(bytes);
        self.count += bytes.len() as u64;
    }

    fn finish(self) -> (u32, u64) {
        (self.digest.finalize(), self.count)
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.inner.read(buf)?;
        self.digest.update(&buf[..size]);
        self.count += size as u64;
        Ok(size)
    }
}
