//! # scan-format
//!
//! Record codecs for the on-disk cache image (format 24.0+).
//!
//! Every function in this crate is pure: it turns a fixed-size byte window
//! into a typed record (or back) and never touches storage.
//!
//! ## Span Layout
//!
//! ```text
//! +---------------------+  0x0000
//! | (reserved)          |
//! +---------------------+  0x2000  DISK_HEADER_OFFSET
//! | DiskHeader (32B)    |  magic, volume/block counts
//! | SpanBlockHeader × N |  offset, length, number, type/free (24B each)
//! +---------------------+
//! | Stripe 0            |
//! |   StripeHeader A    |  72B, magic 0xF1D0F00D
//! |   freelist          |  u16 × segments
//! |   Directory A       |  DirEntry (10B) × entries
//! |   StripeHeader B    |
//! |   Directory B       |
//! |   Content           |  Doc (72B) + header blob + payload ...
//! +---------------------+
//! | Stripe 1 ...        |
//! +---------------------+
//! ```

mod dir_entry;
mod doc;
mod error;
mod geometry;
mod header;

pub use dir_entry::DirEntry;
pub use doc::{Doc, DocKey};
pub use error::{DecodeError, GeometryError, MagicError, VersionError};
pub use geometry::StripeGeometry;
pub use header::{CacheType, DiskHeader, SpanBlockHeader, StripeHeader};

/// Size of a packed directory entry.
pub const DIR_ENTRY_SIZE: usize = 10;

/// log2 of [`CACHE_BLOCK_SIZE`].
pub const CACHE_BLOCK_SHIFT: u32 = 9;

/// Granularity of directory offsets inside a stripe's content region.
pub const CACHE_BLOCK_SIZE: u64 = 1 << CACHE_BLOCK_SHIFT;

/// Granularity of span-level allocation (span block lengths, directory alignment).
pub const STORE_BLOCK_SIZE: u64 = 8192;

/// Magic of a live `Doc` header.
pub const DOC_MAGIC: u32 = 0x5F12_9B13;

/// Magic the engine writes over a `Doc` it has deliberately invalidated.
pub const DOC_CORRUPT_MAGIC: u32 = 0xDEAD_BABE;

/// Size of the fixed `Doc` header.
pub const DOC_HEADER_SIZE: usize = 72;

/// Magic of a stripe header.
pub const STRIPE_MAGIC: u32 = 0xF1D0_F00D;

/// Size of a stripe header copy.
pub const STRIPE_HEADER_SIZE: usize = 72;

/// Magic of the span (disk) header.
pub const DISK_HEADER_MAGIC: u32 = 0xABCD_1237;

/// Byte offset of the span header from the start of the device.
pub const DISK_HEADER_OFFSET: u64 = 0x2000;

/// Size of the span header, up to the first span block header.
pub const DISK_HEADER_SIZE: usize = 32;

/// Size of one span block header.
pub const SPAN_BLOCK_HEADER_SIZE: usize = 24;

/// Directory entries per bucket.
pub const DIR_DEPTH: u64 = 4;

/// Upper bound on buckets held by one segment.
pub const MAX_BUCKETS_PER_SEGMENT: u64 = 1 << 14;

/// Average object size assumed when sizing a stripe directory.
pub const DEFAULT_AVG_OBJECT_SIZE: u64 = 8000;

/// Oldest stripe format major version this crate understands.
pub const MIN_VERSION_MAJOR: u16 = 24;

/// Oldest stripe format minor version (paired with [`MIN_VERSION_MAJOR`]).
pub const MIN_VERSION_MINOR: u16 = 0;

/// Round `value` up to the next multiple of `to`.
///
/// Values already aligned are returned unchanged.
#[inline]
pub fn align_up(value: u64, to: u64) -> u64 {
    match value % to {
        0 => value,
        rem => value + (to - rem),
    }
}

/// Little-endian field readers over a window whose length was already checked.
pub(crate) mod le {
    #[inline]
    pub fn u16_at(b: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([b[at], b[at + 1]])
    }

    #[inline]
    pub fn u32_at(b: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
    }

    #[inline]
    pub fn u64_at(b: &[u8], at: usize) -> u64 {
        let mut w = [0u8; 8];
        w.copy_from_slice(&b[at..at + 8]);
        u64::from_le_bytes(w)
    }

    #[inline]
    pub fn put_u16(b: &mut [u8], at: usize, v: u16) {
        b[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn put_u32(b: &mut [u8], at: usize, v: u32) {
        b[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn put_u64(b: &mut [u8], at: usize, v: u64) {
        b[at..at + 8].copy_from_slice(&v.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, STORE_BLOCK_SIZE), 0);
        assert_eq!(align_up(1, STORE_BLOCK_SIZE), 8192);
        assert_eq!(align_up(8192, STORE_BLOCK_SIZE), 8192);
        assert_eq!(align_up(8193, STORE_BLOCK_SIZE), 16384);
    }

    #[test]
    fn test_bit_exact_constants() {
        assert_eq!(DIR_ENTRY_SIZE, 10);
        assert_eq!(CACHE_BLOCK_SIZE, 512);
        assert_eq!(DOC_MAGIC, 0x5F129B13);
        assert_eq!(DOC_CORRUPT_MAGIC, 0xDEADBABE);
        assert_eq!((MIN_VERSION_MAJOR, MIN_VERSION_MINOR), (24, 0));
    }
}
