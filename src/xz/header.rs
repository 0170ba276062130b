use std::io::Read;

use super::{CheckType, CRC32, XZ_FOOTER_MAGIC, XZ_MAGIC};
use crate::{vli::read_vli, ByteReader, Error, Result};

const FILTER_ID_LZMA2: u64 = 0x21;

/// The 12-byte stream header: magic, two flag bytes, CRC32 of the flags.
pub(crate) struct StreamHeader {
    pub(crate) check_type: CheckType,
    pub(crate) flags: [u8; 2],
}

impl StreamHeader {
    pub(crate) fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut raw = [0u8; 12];
        reader.read_exact(&mut raw)?;

        if raw[..6] != XZ_MAGIC {
            return Err(Error::BadMagic);
        }

        let flags = [raw[6], raw[7]];
        if flags[0] != 0x00 {
            return Err(Error::BadReservedFlag);
        }

        let stored_crc = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        if CRC32.checksum(&flags) != stored_crc {
            return Err(Error::BadCrc);
        }

        let check_type = CheckType::from_flag_byte(flags[1])?;
        Ok(Self { check_type, flags })
    }
}

/// The 12-byte stream footer: CRC32, backward size, the stream flags
/// again, footer magic.
pub(crate) struct StreamFooter {
    /// Real size of the index field encoded as `(stored + 1) * 4`.
    pub(crate) backward_size: u64,
}

impl StreamFooter {
    pub(crate) fn parse<R: Read>(reader: &mut R, stream_flags: [u8; 2]) -> Result<Self> {
        let mut raw = [0u8; 12];
        reader.read_exact(&mut raw)?;

        if raw[10..12] != XZ_FOOTER_MAGIC {
            return Err(Error::BadMagic);
        }

        let stored_crc = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if CRC32.checksum(&raw[4..10]) != stored_crc {
            return Err(Error::BadCrc);
        }

        if [raw[8], raw[9]] != stream_flags {
            return Err(Error::BadReservedFlag);
        }

        let stored_size = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        Ok(Self {
            backward_size: (stored_size as u64 + 1) * 4,
        })
    }
}

/// A parsed block header. Only a single LZMA2 filter is accepted.
pub(crate) struct BlockHeader {
    pub(crate) header_size: u64,
    pub(crate) compressed_size: Option<u64>,
    pub(crate) uncompressed_size: Option<u64>,
    pub(crate) dict_size: u32,
}

impl BlockHeader {
    /// Parses a block header whose first byte, the encoded size, has
    /// already been read (a zero byte belongs to the index, not a block).
    pub(crate) fn parse<R: Read>(reader: &mut R, size_byte: u8) -> Result<Self> {
        debug_assert_ne!(size_byte, 0x00);
        let header_size = (size_byte as usize + 1) * 4;
        let mut raw = vec![0u8; header_size];
        raw[0] = size_byte;
        reader.read_exact(&mut raw[1..])?;

        let crc_offset = header_size - 4;
        let stored_crc = u32::from_le_bytes([
            raw[crc_offset],
            raw[crc_offset + 1],
            raw[crc_offset + 2],
            raw[crc_offset + 3],
        ]);
        if CRC32.checksum(&raw[..crc_offset]) != stored_crc {
            return Err(Error::BadCrc);
        }

        let mut body = &raw[1..crc_offset];

        let flags = body.read_u8()?;
        if flags & 0x3C != 0 {
            return Err(Error::BadReservedFlag);
        }
        if flags & 0x03 != 0 {
            // Between two and four filters declared; only one is allowed.
            return Err(Error::UnsupportedFilter);
        }

        let compressed_size = if flags & 0x40 != 0 {
            Some(read_vli(&mut body)?)
        } else {
            None
        };
        let uncompressed_size = if flags & 0x80 != 0 {
            Some(read_vli(&mut body)?)
        } else {
            None
        };

        let filter_id = read_vli(&mut body)?;
        if filter_id != FILTER_ID_LZMA2 {
            return Err(Error::UnsupportedFilter);
        }
        let props_len = read_vli(&mut body)?;
        if props_len != 1 {
            return Err(Error::BadProperties);
        }
        let props = body.read_u8()?;
        let dict_size = dict_size_from_props(props)?;

        // Whatever remains before the CRC is alignment padding.
        if body.iter().any(|&byte| byte != 0x00) {
            return Err(Error::BadPadding);
        }

        Ok(Self {
            header_size: header_size as u64,
            compressed_size,
            uncompressed_size,
            dict_size,
        })
    }
}

/// Decodes the one-byte LZMA2 filter properties into a dictionary size:
/// `2 | (bit 0)` shifted by `props / 2 + 11`, with 40 meaning 4 GiB - 1.
fn dict_size_from_props(props: u8) -> Result<u32> {
    if props > 40 {
        return Err(Error::BadProperties);
    }
    if props == 40 {
        return Ok(u32::MAX);
    }
    Ok((2 | (props as u32 & 1)) << (props / 2 + 11))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_stream_header() -> [u8; 12] {
        let mut raw = [0xFD, b'7', b'z', b'X', b'Z', 0x00, 0x00, 0x01, 0, 0, 0, 0];
        let crc = CRC32.checksum(&raw[6..8]).to_le_bytes();
        raw[8..12].copy_from_slice(&crc);
        raw
    }

    #[test]
    fn parses_a_valid_stream_header() {
        let raw = valid_stream_header();
        let header = StreamHeader::parse(&mut &raw[..]).unwrap();
        assert_eq!(header.check_type, CheckType::Crc32);
        assert_eq!(header.flags, [0x00, 0x01]);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut raw = valid_stream_header();
        raw[0] = 0xFE;
        assert!(matches!(
            StreamHeader::parse(&mut &raw[..]),
            Err(Error::BadMagic)
        ));
    }

    #[test]
    fn rejects_reserved_flag_byte() {
        let mut raw = valid_stream_header();
        raw[6] = 0x01;
        assert!(matches!(
            StreamHeader::parse(&mut &raw[..]),
            Err(Error::BadReservedFlag)
        ));
    }

    #[test]
    fn rejects_corrupt_header_crc() {
        let mut raw = valid_stream_header();
        raw[8] ^= 0x01;
        assert!(matches!(
            StreamHeader::parse(&mut &raw[..]),
            Err(Error::BadCrc)
        ));
    }

    #[test]
    fn rejects_reserved_check_type() {
        let mut raw = valid_stream_header();
        raw[7] = 0x02;
        let crc = CRC32.checksum(&raw[6..8]).to_le_bytes();
        raw[8..12].copy_from_slice(&crc);
        assert!(matches!(
            StreamHeader::parse(&mut &raw[..]),
            Err(Error::UnsupportedCheck(0x02))
        ));
    }

    #[test]
    fn truncated_header_is_reported() {
        let raw = valid_stream_header();
        assert!(matches!(
            StreamHeader::parse(&mut &raw[..7]),
            Err(Error::Truncated)
        ));
    }

    fn block_header_bytes(body: &[u8]) -> Vec<u8> {
        // Body is everything between the size byte and the CRC; pad it to
        // the next 4-byte boundary and prepend the encoded size.
        let mut padded = body.to_vec();
        while (padded.len() + 1 + 4) % 4 != 0 {
            padded.push(0x00);
        }
        let total = padded.len() + 5;
        let mut raw = vec![(total / 4 - 1) as u8];
        raw.extend_from_slice(&padded);
        let crc = CRC32.checksum(&raw).to_le_bytes();
        raw.extend_from_slice(&crc);
        raw
    }

    #[test]
    fn parses_a_minimal_block_header() {
        // No size fields, one LZMA2 filter, properties byte 0 (4 KiB).
        let raw = block_header_bytes(&[0x00, 0x21, 0x01, 0x00]);
        let header = BlockHeader::parse(&mut &raw[1..], raw[0]).unwrap();
        assert_eq!(header.header_size, raw.len() as u64);
        assert_eq!(header.compressed_size, None);
        assert_eq!(header.uncompressed_size, None);
        assert_eq!(header.dict_size, 4096);
    }

    #[test]
    fn parses_declared_sizes() {
        let raw = block_header_bytes(&[0xC0, 0x85, 0x02, 0x96, 0x01, 0x21, 0x01, 0x01]);
        let header = BlockHeader::parse(&mut &raw[1..], raw[0]).unwrap();
        assert_eq!(header.compressed_size, Some(0x105));
        assert_eq!(header.uncompressed_size, Some(0x96));
        assert_eq!(header.dict_size, 6144);
    }

    #[test]
    fn rejects_non_lzma2_filters() {
        // Delta filter (id 0x03) with a one-byte property.
        let raw = block_header_bytes(&[0x00, 0x03, 0x01, 0x01]);
        assert!(matches!(
            BlockHeader::parse(&mut &raw[1..], raw[0]),
            Err(Error::UnsupportedFilter)
        ));
    }

    #[test]
    fn rejects_multiple_filters() {
        let raw = block_header_bytes(&[0x01, 0x03, 0x01, 0x01, 0x21, 0x01, 0x00]);
        assert!(matches!(
            BlockHeader::parse(&mut &raw[1..], raw[0]),
            Err(Error::UnsupportedFilter)
        ));
    }

    #[test]
    fn rejects_reserved_block_flags() {
        let raw = block_header_bytes(&[0x04, 0x21, 0x01, 0x00]);
        assert!(matches!(
            BlockHeader::parse(&mut &raw[1..], raw[0]),
            Err(Error::BadReservedFlag)
        ));
    }

    #[test]
    fn rejects_corrupt_block_crc() {
        let mut raw = block_header_bytes(&[0x00, 0x21, 0x01, 0x00]);
        let last = raw.len() - 1;
        raw[last] ^= 0x80;
        assert!(matches!(
            BlockHeader::parse(&mut &raw[1..], raw[0]),
            Err(Error::BadCrc)
        ));
    }

    #[test]
    fn rejects_nonzero_header_padding() {
        // Hand-build a header whose padding byte is 0xFF but whose CRC is
        // still valid, so only the padding rule can reject it.
        let mut raw = vec![0x02, 0x00, 0x21, 0x01, 0x00, 0xFF, 0x00, 0x00];
        let crc = CRC32.checksum(&raw).to_le_bytes();
        raw.extend_from_slice(&crc);
        assert!(matches!(
            BlockHeader::parse(&mut &raw[1..], raw[0]),
            Err(Error::BadPadding)
        ));
    }

    #[test]
    fn dictionary_size_decoding() {
        assert_eq!(dict_size_from_props(0).unwrap(), 4096);
        assert_eq!(dict_size_from_props(1).unwrap(), 6144);
        assert_eq!(dict_size_from_props(2).unwrap(), 8192);
        assert_eq!(dict_size_from_props(39).unwrap(), 0xC000_0000);
        assert_eq!(dict_size_from_props(40).unwrap(), u32::MAX);
        assert!(matches!(dict_size_from_props(41), Err(Error::BadProperties)));
    }

    #[test]
    fn footer_round_trip() {
        let flags = [0x00, 0x01];
        let mut raw = [0u8; 12];
        raw[4..8].copy_from_slice(&2u32.to_le_bytes());
        raw[8..10].copy_from_slice(&flags);
        raw[10..12].copy_from_slice(&XZ_FOOTER_MAGIC);
        let crc = CRC32.checksum(&raw[4..10]).to_le_bytes();
        raw[0..4].copy_from_slice(&crc);

        let footer = StreamFooter::parse(&mut &raw[..], flags).unwrap();
        assert_eq!(footer.backward_size, 12);

        // The same footer against different stream flags must not pass.
        assert!(matches!(
            StreamFooter::parse(&mut &raw[..], [0x00, 0x04]),
            Err(Error::BadReservedFlag)
        ));
    }
}
