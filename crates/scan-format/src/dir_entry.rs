//! Packed 10-byte directory entry.
//!
//! ```text
//! w0: oooooooo oooooooo   offset bits 0..16
//! w1: ssssss-- oooooooo   size (6) | unused (2) | offset bits 16..24
//!     bb                  big (2), shares the top two bits of size
//! w2: tnhp tttttttttttt   token | pinned | head | phase | tag (12)
//! w3: nnnnnnnn nnnnnnnn   next (segment-relative index)
//! w4: oooooooo oooooooo   offset bits 24..40
//! ```
//!
//! Because `big` overlaps the top of `size`, an encoded entry always has
//! `size >> 4 == big`.

use serde::Serialize;

use crate::le::{put_u16, u16_at};
use crate::{DecodeError, CACHE_BLOCK_SHIFT, CACHE_BLOCK_SIZE, DIR_ENTRY_SIZE};

const TOKEN_BIT: u16 = 0x8000;
const PINNED_BIT: u16 = 0x4000;
const HEAD_BIT: u16 = 0x2000;
const PHASE_BIT: u16 = 0x1000;
const TAG_MASK: u16 = 0x0FFF;

const SIZE_FIELD_MAX: u16 = 0x3F;
const BIG_MAX: u16 = 0x3;
const RAW_OFFSET_MAX: u64 = (1 << 40) - 1;

/// A decoded directory entry.
///
/// Entries are plain values copied out of the directory bytes; they own
/// nothing and are never written back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct DirEntry {
    /// Upper bound on the size of the referenced `Doc`, block-quantised.
    pub length: u32,
    /// Byte offset into the stripe's content region; `0` marks an unused slot.
    pub offset: u64,
    /// Partial key used for fast collision rejection.
    pub tag: u16,
    pub token: bool,
    pub pinned: bool,
    /// First entry of an object's fragment chain.
    pub head: bool,
    /// Directory generation that produced this entry.
    pub phase: bool,
    /// Segment-relative index of the next entry; `0` ends the chain.
    pub next: u16,
}

impl DirEntry {
    /// Decode an entry from exactly [`DIR_ENTRY_SIZE`] bytes.
    ///
    /// Total for every 10-byte input.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.len() != DIR_ENTRY_SIZE {
            return Err(DecodeError::BadSize {
                expected: DIR_ENTRY_SIZE,
                actual: raw.len(),
            });
        }

        let w = [
            u16_at(raw, 0),
            u16_at(raw, 2),
            u16_at(raw, 4),
            u16_at(raw, 6),
            u16_at(raw, 8),
        ];

        let big = (w[1] >> 14) & BIG_MAX;
        let size = (w[1] >> 10) & SIZE_FIELD_MAX;
        let raw_offset = w[0] as u64 | ((w[1] as u64 & 0xFF) << 16) | ((w[4] as u64) << 24);

        Ok(Self {
            length: Self::quantum_length(size, big),
            offset: Self::offset_from_raw(raw_offset),
            tag: w[2] & TAG_MASK,
            token: w[2] & TOKEN_BIT != 0,
            pinned: w[2] & PINNED_BIT != 0,
            head: w[2] & HEAD_BIT != 0,
            phase: w[2] & PHASE_BIT != 0,
            next: w[3],
        })
    }

    /// Encode back into the packed layout.
    ///
    /// `offset`, the flags, `tag` and `next` survive a decode exactly as long as
    /// `offset` is block aligned. `length` is rounded up to the smallest
    /// representable quantum.
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let raw_offset = Self::raw_from_offset(self.offset);
        let (size, big) = Self::size_fields(self.length);

        let w0 = raw_offset as u16;
        let w1 = (size << 10) | ((raw_offset >> 16) as u16 & 0xFF);
        let mut w2 = self.tag & TAG_MASK;
        if self.token {
            w2 |= TOKEN_BIT;
        }
        if self.pinned {
            w2 |= PINNED_BIT;
        }
        if self.head {
            w2 |= HEAD_BIT;
        }
        if self.phase {
            w2 |= PHASE_BIT;
        }
        let w4 = (raw_offset >> 24) as u16;

        let mut out = [0u8; DIR_ENTRY_SIZE];
        put_u16(&mut out, 0, w0);
        put_u16(&mut out, 2, w1);
        put_u16(&mut out, 4, w2);
        put_u16(&mut out, 6, self.next);
        put_u16(&mut out, 8, w4);
        out
    }

    /// Whether the slot is unused and must be skipped by traversal.
    #[inline]
    pub fn is_unused(&self) -> bool {
        self.offset == 0
    }

    /// Whether this entry starts an object (in use and `head` set).
    #[inline]
    pub fn is_head(&self) -> bool {
        self.head && !self.is_unused()
    }

    #[inline]
    fn quantum_length(size: u16, big: u16) -> u32 {
        (size as u32 + 1) << (CACHE_BLOCK_SHIFT + 3 * big as u32)
    }

    #[inline]
    fn offset_from_raw(raw: u64) -> u64 {
        if raw == 0 {
            0
        } else {
            (raw - 1) * CACHE_BLOCK_SIZE
        }
    }

    fn raw_from_offset(offset: u64) -> u64 {
        if offset == 0 {
            return 0;
        }
        (offset / CACHE_BLOCK_SIZE + 1).min(RAW_OFFSET_MAX)
    }

    /// Smallest `(size, big)` pair covering `length` whose size field
    /// carries `big` in its top two bits.
    fn size_fields(length: u32) -> (u16, u16) {
        for big in 0..=BIG_MAX {
            let quantum = 1u64 << (CACHE_BLOCK_SHIFT + 3 * big as u32);
            let lowest = (big as u64) << 4;
            let size = ((length as u64).div_ceil(quantum).max(1) - 1).max(lowest);
            if size <= lowest | 0xF {
                return (size as u16, big);
            }
        }
        (SIZE_FIELD_MAX, BIG_MAX)
    }
}

impl std::fmt::Display for DirEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}B -> {:#x}", self.length, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(w: [u16; 5]) -> [u8; 10] {
        let mut out = [0u8; 10];
        for (i, v) in w.iter().enumerate() {
            out[i * 2..i * 2 + 2].copy_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_decode_rejects_wrong_size() {
        assert_eq!(
            DirEntry::decode(&[0u8; 9]),
            Err(DecodeError::BadSize {
                expected: 10,
                actual: 9
            })
        );
        assert!(DirEntry::decode(&[0u8; 11]).is_err());
    }

    #[test]
    fn test_decode_zero_is_unused() {
        let e = DirEntry::decode(&[0u8; 10]).unwrap();
        assert_eq!(e.offset, 0);
        assert!(e.is_unused());
        assert!(!e.is_head());
        assert_eq!(e.length, 512);
    }

    #[test]
    fn test_decode_fields() {
        // raw offset 3 -> (3 - 1) * 512, size 0x11 (big 1), head + phase, tag 0xABC, next 7
        let raw = words([3, 0x11 << 10, 0x3ABC, 7, 0]);
        let e = DirEntry::decode(&raw).unwrap();
        assert_eq!(e.offset, 1024);
        assert_eq!(e.length, 18 << 12);
        assert!(e.head && e.phase);
        assert!(!e.token && !e.pinned);
        assert_eq!(e.tag, 0xABC);
        assert_eq!(e.next, 7);
    }

    #[test]
    fn test_high_offset_bits() {
        let raw = words([0, 0x00FF, 0, 0, 0x0001]);
        let e = DirEntry::decode(&raw).unwrap();
        let raw_offset = (0xFFu64 << 16) | (1u64 << 24);
        assert_eq!(e.offset, (raw_offset - 1) * 512);
    }

    #[test]
    fn test_offset_always_block_multiple() {
        for seed in 0u32..2000 {
            let x = seed.wrapping_mul(2_654_435_761);
            let raw = words([
                x as u16,
                (x >> 16) as u16,
                (x >> 3) as u16,
                (x >> 7) as u16,
                (x >> 11) as u16,
            ]);
            let e = DirEntry::decode(&raw).unwrap();
            assert_eq!(e.offset % CACHE_BLOCK_SIZE, 0);
        }
    }

    #[test]
    fn test_encode_preserves_fields() {
        let e = DirEntry {
            length: 4096,
            offset: 0x1234 * 512,
            tag: 0xFFF,
            token: true,
            pinned: false,
            head: true,
            phase: true,
            next: 0xBEEF,
        };
        let back = DirEntry::decode(&e.encode()).unwrap();
        assert_eq!(back.offset, e.offset);
        assert_eq!(back.tag, e.tag);
        assert_eq!((back.token, back.pinned, back.head, back.phase), (true, false, true, true));
        assert_eq!(back.next, e.next);
        assert!(back.length >= e.length);
    }

    #[test]
    fn test_encode_decode_bytes_identity() {
        let raw = words([0x0010, (0x25 << 10) | 0x02, 0x5123, 42, 0x0003]);
        let e = DirEntry::decode(&raw).unwrap();
        assert_eq!(e.encode(), raw);
    }

    #[test]
    fn test_length_quantisation() {
        let e = DirEntry {
            length: 513,
            offset: 512,
            ..Default::default()
        };
        assert_eq!(DirEntry::decode(&e.encode()).unwrap().length, 1024);

        let huge = DirEntry {
            length: u32::MAX,
            offset: 512,
            ..Default::default()
        };
        assert_eq!(DirEntry::decode(&huge.encode()).unwrap().length, 64 << 18);
    }

    #[test]
    fn test_size_field_sits_at_bit_ten() {
        let e = DirEntry::decode(&words([1, 0x0400, 0, 0, 0])).unwrap();
        assert_eq!(e.length, 1024);
        // Bits 8 and 9 belong to neither field.
        let e = DirEntry::decode(&words([1, 0x0300, 0, 0, 0])).unwrap();
        assert_eq!(e.length, 512);
    }

    #[test]
    fn test_length_from_raw_size_and_big() {
        for s in 0u16..64 {
            for b in 0u16..4 {
                let w1 = (s << 10) | (b << 14) | 0x00A5;
                let size = ((w1 & 0x3F00) >> 10) as u64;
                let big = ((w1 & 0xC000) >> 14) as u64;
                let expected = (size + 1) * (1u64 << (9 + 3 * big));
                let e = DirEntry::decode(&words([7, w1, 0, 0, 0])).unwrap();
                assert_eq!(e.length as u64, expected, "w1={w1:#06x}");
            }
        }
        // Hand-checked corners.
        let len = |w1: u16| DirEntry::decode(&words([1, w1, 0, 0, 0])).unwrap().length;
        assert_eq!(len(0x0000), 512);
        assert_eq!(len(0x3C00), 16 * 512);
        assert_eq!(len(0x4000), 17 * 4096);
        assert_eq!(len(0x8000), 33 * 32768);
        assert_eq!(len(0xFC00), 64 << 18);
    }

    #[test]
    fn test_encoded_length_is_smallest_cover() {
        let encoded = |length: u32| {
            let e = DirEntry {
                length,
                offset: 512,
                ..Default::default()
            };
            DirEntry::decode(&e.encode()).unwrap().length
        };
        assert_eq!(encoded(4096), 4096);
        assert_eq!(encoded(8192), 8192);
        // Past 16 blocks of 512 the next representable quantum is 17 * 4096.
        assert_eq!(encoded(8193), 17 * 4096);
        assert_eq!(encoded(17 * 4096 + 1), 18 * 4096);
        assert_eq!(encoded(32 * 4096 + 1), 33 * 32768);
    }
}
