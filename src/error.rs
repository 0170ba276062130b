use std::io;

/// Result type of the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Everything that can go wrong while decoding an XZ or LZMA2 stream.
///
/// All of these are fatal: a reader that returned an error stays errored
/// and repeats an equivalent error on every subsequent read without
/// consuming more input.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The source ended before the current construct was complete.
    #[error("unexpected end of input")]
    Truncated,

    /// Stream header or footer magic bytes did not match.
    #[error("bad magic bytes")]
    BadMagic,

    /// A framing CRC32 (stream header, block header, index or footer)
    /// did not match its stored value.
    #[error("framing CRC32 mismatch")]
    BadCrc,

    /// A padding byte was not zero.
    #[error("non-zero padding byte")]
    BadPadding,

    /// Reserved flag bits were set, or the footer flags disagree with the
    /// stream header.
    #[error("invalid reserved flags")]
    BadReservedFlag,

    /// A variable-length integer was over-long, unterminated or had a
    /// non-canonical zero end byte.
    #[error("malformed variable-length integer")]
    MalformedInteger,

    /// The stream uses a check type this decoder does not know.
    #[error("unsupported check type {0:#04x}")]
    UnsupportedCheck(u8),

    /// The block declares a filter other than LZMA2, or more than one
    /// filter.
    #[error("unsupported filter chain")]
    UnsupportedFilter,

    /// An LZMA or LZMA2 properties byte was out of range.
    #[error("invalid LZMA properties")]
    BadProperties,

    /// An LZMA2 control byte from the reserved range, or a chunk that
    /// needs state the stream never provided.
    #[error("invalid LZMA2 control byte {0:#04x}")]
    BadControlByte(u8),

    /// A declared block or chunk size disagrees with what was actually
    /// consumed or produced.
    #[error("declared size does not match actual size")]
    SizeMismatch,

    /// An LZMA chunk ended with residual bits in the range coder.
    #[error("range coder did not end cleanly")]
    RangeDecoderDirty,

    /// A match distance points past the bytes written to the dictionary.
    #[error("match distance exceeds dictionary history")]
    BadDistance,

    /// More than `dict_size - 1` bytes were staged without being drained.
    #[error("dictionary overflow")]
    DictionaryOverflow,

    /// The block check digest did not match the stored check.
    #[error("block check mismatch")]
    BadChecksum,

    /// The dictionary buffer could not be allocated.
    #[error("dictionary allocation failed")]
    OutOfMemory,

    /// The underlying byte source failed.
    #[error("i/o error: {0}")]
    Io(io::Error),
}

impl Error {
    /// An equivalent error, used to repeat the first failure on every
    /// read after a reader has latched it.
    pub(crate) fn duplicate(&self) -> Error {
        match self {
            Error::Truncated => Error::Truncated,
            Error::BadMagic => Error::BadMagic,
            Error::BadCrc => Error::BadCrc,
            Error::BadPadding => Error::BadPadding,
            Error::BadReservedFlag => Error::BadReservedFlag,
            Error::MalformedInteger => Error::MalformedInteger,
            Error::UnsupportedCheck(byte) => Error::UnsupportedCheck(*byte),
            Error::UnsupportedFilter => Error::UnsupportedFilter,
            Error::BadProperties => Error::BadProperties,
            Error::BadControlByte(byte) => Error::BadControlByte(*byte),
            Error::SizeMismatch => Error::SizeMismatch,
            Error::RangeDecoderDirty => Error::RangeDecoderDirty,
            Error::BadDistance => Error::BadDistance,
            Error::DictionaryOverflow => Error::DictionaryOverflow,
            Error::BadChecksum => Error::BadChecksum,
            Error::OutOfMemory => Error::OutOfMemory,
            Error::Io(inner) => Error::Io(io::Error::new(inner.kind(), inner.to_string())),
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        // An exhausted source is always reported as a truncated stream.
        if error.kind() == io::ErrorKind::UnexpectedEof {
            Error::Truncated
        } else {
            Error::Io(error)
        }
    }
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(inner) => inner,
            Error::Truncated => io::Error::new(io::ErrorKind::UnexpectedEof, error),
            Error::UnsupportedCheck(_) | Error::UnsupportedFilter => {
                io::Error::new(io::ErrorKind::Unsupported, error)
            }
            Error::OutOfMemory => io::Error::new(io::ErrorKind::OutOfMemory, error),
            _ => io::Error::new(io::ErrorKind::InvalidData, error),
        }
    }
}
