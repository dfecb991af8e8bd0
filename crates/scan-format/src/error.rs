use thiserror::Error;

/// Errors raised while decoding a fixed-size record.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A directory entry window was not exactly [`crate::DIR_ENTRY_SIZE`] bytes.
    #[error("directory entry must be {expected} bytes, got {actual}")]
    BadSize { expected: usize, actual: usize },

    /// A header window did not match the record's fixed size.
    #[error("{record} header must be {expected} bytes, got {actual}")]
    WrongSize {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The record carries the engine's "deliberately invalidated" magic.
    #[error("record marked corrupt by the cache engine")]
    Corrupt,

    /// The record's magic matched neither known constant.
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
}

impl DecodeError {
    /// Project a decode failure onto its magic classification, if it has one.
    pub fn magic(&self) -> Option<MagicError> {
        match self {
            DecodeError::Corrupt => Some(MagicError::Corrupt),
            DecodeError::BadMagic(got) => Some(MagicError::BadMagic(*got)),
            _ => None,
        }
    }
}

/// Why a magic number was rejected.
///
/// `Corrupt` means the engine itself invalidated the record; `BadMagic`
/// means the bytes are not a record at all (stale data, bit rot, wrong offset).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicError {
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("record marked corrupt")]
    Corrupt,
}

impl From<MagicError> for DecodeError {
    fn from(e: MagicError) -> Self {
        match e {
            MagicError::BadMagic(got) => DecodeError::BadMagic(got),
            MagicError::Corrupt => DecodeError::Corrupt,
        }
    }
}

/// A stripe written by a format older than this crate supports.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unsupported stripe format {major}.{minor} (minimum {min_major}.{min_minor})")]
pub struct VersionError {
    pub major: u16,
    pub minor: u16,
    pub min_major: u16,
    pub min_minor: u16,
}

/// Stripe dimensions that cannot hold a directory.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryError {
    #[error("stripe of {length} bytes at {start:#x} is too small for a directory")]
    TooSmall { start: u64, length: u64 },

    #[error("average object size must be non-zero")]
    ZeroObjectSize,
}
