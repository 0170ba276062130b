//! XZ container format decoding.

mod header;
mod reader;

pub use reader::XzReader;

use sha2::Digest;

use crate::{Error, Result};

pub(crate) const CRC32: crc::Crc<u32, crc::Table<16>> =
    crc::Crc::<u32, crc::Table<16>>::new(&crc::CRC_32_ISO_HDLC);
pub(crate) const CRC64: crc::Crc<u64, crc::Table<16>> =
    crc::Crc::<u64, crc::Table<16>>::new(&crc::CRC_64_XZ);

/// XZ stream magic bytes: 0xFD, '7', 'z', 'X', 'Z', 0x00
const XZ_MAGIC: [u8; 6] = [0xFD, b'7', b'z', b'X', b'Z', 0x00];

/// XZ stream footer magic bytes.
const XZ_FOOTER_MAGIC: [u8; 2] = [b'Y', b'Z'];

/// The block check declared by the stream header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckType {
    /// No check.
    None = 0x00,
    /// CRC32, 4 bytes.
    Crc32 = 0x01,
    /// CRC64, 8 bytes.
    Crc64 = 0x04,
    /// SHA-256, 32 bytes.
    Sha256 = 0x0A,
}

impl CheckType {
    /// Decodes the check-type byte of the stream flags. The high nibble is
    /// reserved; unknown low-nibble values are well-formed but unsupported.
    pub(crate) fn from_flag_byte(byte: u8) -> Result<Self> {
        if byte & 0xF0 != 0 {
            return Err(Error::BadReservedFlag);
        }
        match byte {
            0x00 => Ok(CheckType::None),
            0x01 => Ok(CheckType::Crc32),
            0x04 => Ok(CheckType::Crc64),
            0x0A => Ok(CheckType::Sha256),
            _ => Err(Error::UnsupportedCheck(byte)),
        }
    }

    /// The number of check bytes stored after each block.
    pub fn size(self) -> usize {
        match self {
            CheckType::None => 0,
            CheckType::Crc32 => 4,
            CheckType::Crc64 => 8,
            CheckType::Sha256 => 32,
        }
    }
}

/// Rolling digest over one block's uncompressed bytes.
pub(crate) enum Check {
    None,
    Crc32(crc::Digest<'static, u32, crc::Table<16>>),
    Crc64(crc::Digest<'static, u64, crc::Table<16>>),
    Sha256(Box<sha2::Sha256>),
}

impl Check {
    pub(crate) fn new(check_type: CheckType) -> Self {
        match check_type {
            CheckType::None => Check::None,
            CheckType::Crc32 => Check::Crc32(CRC32.digest()),
            CheckType::Crc64 => Check::Crc64(CRC64.digest()),
            CheckType::Sha256 => Check::Sha256(Box::new(sha2::Sha256::new())),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Check::None => {}
            Check::Crc32(digest) => digest.update(data),
            Check::Crc64(digest) => digest.update(data),
            Check::Sha256(sha) => sha.update(data),
        }
    }

    pub(crate) fn size(&self) -> usize {
        match self {
            Check::None => 0,
            Check::Crc32(_) => 4,
            Check::Crc64(_) => 8,
            Check::Sha256(_) => 32,
        }
    }

    /// Consumes the digest and compares it to the stored check bytes.
    pub(crate) fn verify(self, stored: &[u8]) -> bool {
        match self {
            Check::None => stored.is_empty(),
            Check::Crc32(digest) => {
                let Ok(stored) = <[u8; 4]>::try_from(stored) else {
                    return false;
                };
                digest.finalize() == u32::from_le_bytes(stored)
            }
            Check::Crc64(digest) => {
                let Ok(stored) = <[u8; 8]>::try_from(stored) else {
                    return false;
                };
                digest.finalize() == u64::from_le_bytes(stored)
            }
            Check::Sha256(sha) => sha.finalize().as_slice() == stored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_check_digest() {
        let mut check = Check::new(CheckType::Crc32);
        check.update(b"123456789");

        // CRC32 of "123456789" in little-endian byte order.
        assert!(check.verify(&[0x26, 0x39, 0xF4, 0xCB]));
    }

    #[test]
    fn crc64_check_digest() {
        let mut check = Check::new(CheckType::Crc64);
        check.update(b"123456789");

        // CRC64 of "123456789" in little-endian byte order.
        assert!(check.verify(&[250, 57, 25, 223, 187, 201, 93, 153]));
    }

    #[test]
    fn sha256_check_digest() {
        let mut check = Check::new(CheckType::Sha256);
        check.update(b"123456789");

        let expected = [
            21, 226, 176, 211, 195, 56, 145, 235, 176, 241, 239, 96, 158, 196, 25, 66, 12, 32,
            227, 32, 206, 148, 198, 95, 188, 140, 51, 18, 68, 142, 178, 37,
        ];
        assert!(check.verify(&expected));
    }

    #[test]
    fn mismatching_digest_is_rejected() {
        let mut check = Check::new(CheckType::Crc32);
        check.update(b"123456789");
        assert!(!check.verify(&[0x27, 0x39, 0xF4, 0xCB]));
    }

    #[test]
    fn check_type_bytes() {
        assert_eq!(CheckType::from_flag_byte(0x00).unwrap(), CheckType::None);
        assert_eq!(CheckType::from_flag_byte(0x01).unwrap(), CheckType::Crc32);
        assert_eq!(CheckType::from_flag_byte(0x04).unwrap(), CheckType::Crc64);
        assert_eq!(CheckType::from_flag_byte(0x0A).unwrap(), CheckType::Sha256);
        assert!(matches!(
            CheckType::from_flag_byte(0x02),
            Err(Error::UnsupportedCheck(0x02))
        ));
        assert!(matches!(
            CheckType::from_flag_byte(0x10),
            Err(Error::BadReservedFlag)
        ));
    }
}
