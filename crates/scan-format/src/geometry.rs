//! Stripe directory sizing.
//!
//! The engine never records directory dimensions on disk; they are derived
//! from the stripe's extent and the configured average object size. The
//! content offset depends on the directory size and vice versa, so the
//! sizing is iterated to a fixed point (three rounds settle every stripe size
//! the engine accepts).

use serde::Serialize;

use crate::{
    align_up, GeometryError, DIR_DEPTH, DIR_ENTRY_SIZE, MAX_BUCKETS_PER_SEGMENT,
    STORE_BLOCK_SIZE, STRIPE_HEADER_SIZE,
};

const SIZING_ROUNDS: usize = 3;

/// Directory dimensions and region offsets of one stripe.
///
/// Offsets are absolute byte positions within the span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StripeGeometry {
    pub segments: u64,
    pub buckets_per_segment: u64,
    pub directory_offset: u64,
    pub content_offset: u64,
}

impl StripeGeometry {
    /// Size the directory of a stripe spanning `length` bytes from `start`.
    pub fn for_stripe(start: u64, length: u64, avg_obj_size: u64) -> Result<Self, GeometryError> {
        if avg_obj_size == 0 {
            return Err(GeometryError::ZeroObjectSize);
        }

        let mut segments = 0u64;
        let mut buckets = 0u64;
        let mut content = start;

        for _ in 0..SIZING_ROUNDS {
            let available = length.saturating_sub(content - start);
            let total_buckets = available / (DIR_DEPTH * avg_obj_size);
            if total_buckets == 0 {
                return Err(GeometryError::TooSmall { start, length });
            }
            segments = total_buckets.div_ceil(MAX_BUCKETS_PER_SEGMENT);
            buckets = total_buckets.div_ceil(segments);

            let header_blocks = (34 + segments).div_ceil(4096);
            let dir_blocks = (5 * buckets * segments).div_ceil(1024);
            content = start + 2 * STORE_BLOCK_SIZE * (header_blocks + dir_blocks + 1);
        }

        Ok(Self {
            segments,
            buckets_per_segment: buckets,
            directory_offset: Self::directory_after(start, segments),
            content_offset: content,
        })
    }

    /// Geometry with explicit dimensions and offsets.
    pub fn with_layout(
        segments: u64,
        buckets_per_segment: u64,
        directory_offset: u64,
        content_offset: u64,
    ) -> Self {
        Self {
            segments,
            buckets_per_segment,
            directory_offset,
            content_offset,
        }
    }

    /// Offset of the directory that follows a header copy at `header_offset`.
    pub fn directory_after(header_offset: u64, segments: u64) -> u64 {
        align_up(
            header_offset + STRIPE_HEADER_SIZE as u64 + 2 * segments,
            STORE_BLOCK_SIZE,
        )
    }

    pub fn entries_per_segment(&self) -> u64 {
        self.buckets_per_segment * DIR_DEPTH
    }

    pub fn total_buckets(&self) -> u64 {
        self.segments * self.buckets_per_segment
    }

    pub fn total_entries(&self) -> u64 {
        self.total_buckets() * DIR_DEPTH
    }

    /// Byte length of one directory copy.
    pub fn directory_len(&self) -> u64 {
        self.total_entries() * DIR_ENTRY_SIZE as u64
    }

    /// Offset of the second header copy (generation B).
    pub fn copy_b_header_offset(&self) -> u64 {
        let end_of_a = align_up(self.directory_offset + self.directory_len(), STORE_BLOCK_SIZE);
        align_up(end_of_a + STRIPE_HEADER_SIZE as u64, STORE_BLOCK_SIZE)
    }

    /// This geometry with the directory moved behind the header copy at `header_offset`.
    pub fn relocated(&self, header_offset: u64) -> Self {
        Self {
            directory_offset: Self::directory_after(header_offset, self.segments),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_AVG_OBJECT_SIZE;

    #[test]
    fn test_small_stripe_geometry() {
        let start = 0x4000;
        let length = 128 * 1024 * 1024;
        let g = StripeGeometry::for_stripe(start, length, DEFAULT_AVG_OBJECT_SIZE).unwrap();

        assert_eq!(g.segments, 1);
        assert!(g.buckets_per_segment > 0);
        assert!(g.buckets_per_segment <= MAX_BUCKETS_PER_SEGMENT);
        assert_eq!(g.directory_offset % STORE_BLOCK_SIZE, 0);
        assert!(g.directory_offset > start);
        // Both directory copies sit before the content.
        assert!(g.copy_b_header_offset() < g.content_offset);
        assert!(g.content_offset < start + length);
    }

    #[test]
    fn test_large_stripe_splits_segments() {
        let length = 64 * 1024 * 1024 * 1024u64;
        let g = StripeGeometry::for_stripe(0, length, DEFAULT_AVG_OBJECT_SIZE).unwrap();
        assert!(g.segments > 1);
        assert!(g.buckets_per_segment <= MAX_BUCKETS_PER_SEGMENT);
        assert_eq!(g.entries_per_segment(), g.buckets_per_segment * 4);
    }

    #[test]
    fn test_too_small() {
        assert_eq!(
            StripeGeometry::for_stripe(0, 100, DEFAULT_AVG_OBJECT_SIZE),
            Err(GeometryError::TooSmall {
                start: 0,
                length: 100
            })
        );
        assert_eq!(
            StripeGeometry::for_stripe(0, 1 << 30, 0),
            Err(GeometryError::ZeroObjectSize)
        );
    }

    #[test]
    fn test_relocated_keeps_dimensions() {
        let g = StripeGeometry::for_stripe(0, 1 << 28, DEFAULT_AVG_OBJECT_SIZE).unwrap();
        let b = g.relocated(g.copy_b_header_offset());
        assert_eq!(b.segments, g.segments);
        assert_eq!(b.content_offset, g.content_offset);
        assert!(b.directory_offset > g.directory_offset);
    }
}
