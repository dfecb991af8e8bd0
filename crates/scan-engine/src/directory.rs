//! In-memory model of a stripe's hash-bucket directory.
//!
//! The directory is decoded once and never mutated. Segments are stored
//! back to back; bucket `b` of a segment starts at local index `b * 4`, and
//! `next` pointers are local indices into the same segment.

use scan_format::{DirEntry, StripeGeometry, DIR_DEPTH, DIR_ENTRY_SIZE};
use tracing::instrument;

use crate::source::{read_window, ByteSource};
use crate::Result;

#[derive(Debug, Clone)]
pub struct Directory {
    geometry: StripeGeometry,
    entries: Vec<DirEntry>,
    bad_slots: u64,
}

impl Directory {
    /// Decode a directory region. Slots that are missing or fail to decode
    /// become unused entries and are counted.
    pub fn from_bytes(bytes: &[u8], geometry: StripeGeometry) -> Self {
        let total = geometry.total_entries() as usize;
        let mut dir = Self {
            geometry,
            entries: Vec::with_capacity(total),
            bad_slots: 0,
        };
        dir.decode_slots(bytes, total);
        dir
    }

    /// Read the directory at `geometry.directory_offset`, one segment at a time.
    ///
    /// A segment that lies past the end of the source is kept as unused
    /// slots; any other read failure is returned.
    #[instrument(skip(source), level = "debug")]
    pub fn read<S: ByteSource + ?Sized>(source: &S, geometry: StripeGeometry) -> Result<Self> {
        let per_segment = geometry.entries_per_segment() as usize;
        let segment_bytes = per_segment * DIR_ENTRY_SIZE;
        let mut dir = Self {
            geometry,
            entries: Vec::with_capacity(geometry.total_entries() as usize),
            bad_slots: 0,
        };

        for segment in 0..geometry.segments {
            let offset = geometry.directory_offset + segment * segment_bytes as u64;
            match read_window(source, offset, segment_bytes)? {
                Some(bytes) => dir.decode_slots(&bytes, per_segment),
                None => {
                    scan_config::log_scan_warn!(
                        "Directory segment past end of source",
                        segment = segment,
                        offset = offset
                    );
                    dir.decode_slots(&[], per_segment);
                }
            }
        }

        Ok(dir)
    }

    fn decode_slots(&mut self, bytes: &[u8], count: usize) {
        for slot in 0..count {
            let at = slot * DIR_ENTRY_SIZE;
            let decoded = bytes
                .get(at..at + DIR_ENTRY_SIZE)
                .map(DirEntry::decode);
            match decoded {
                Some(Ok(entry)) => self.entries.push(entry),
                _ => {
                    self.bad_slots += 1;
                    self.entries.push(DirEntry::default());
                }
            }
        }
    }

    pub fn geometry(&self) -> &StripeGeometry {
        &self.geometry
    }

    pub fn segments(&self) -> usize {
        self.geometry.segments as usize
    }

    pub fn buckets_per_segment(&self) -> usize {
        self.geometry.buckets_per_segment as usize
    }

    /// Entries per segment; also the step bound for any chain walk.
    pub fn segment_len(&self) -> usize {
        self.geometry.entries_per_segment() as usize
    }

    /// All entries of one segment.
    pub fn segment(&self, segment: usize) -> Option<&[DirEntry]> {
        if segment >= self.segments() {
            return None;
        }
        let len = self.segment_len();
        self.entries.get(segment * len..(segment + 1) * len)
    }

    /// First entry of a bucket's chain.
    pub fn bucket_head(&self, segment: usize, bucket: usize) -> Option<&DirEntry> {
        if bucket >= self.buckets_per_segment() {
            return None;
        }
        self.entry_at(segment, bucket * DIR_DEPTH as usize)
    }

    /// Entry at a segment-local index, the space `next` pointers address.
    pub fn entry_at(&self, segment: usize, index: usize) -> Option<&DirEntry> {
        self.segment(segment)?.get(index)
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn bad_slots(&self) -> u64 {
        self.bad_slots
    }

    pub fn unused_count(&self) -> u64 {
        self.entries.iter().filter(|e| e.is_unused()).count() as u64
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::source::MemorySource;

    /// Geometry of a tiny directory starting at offset 0.
    pub(crate) fn tiny_geometry(segments: u64, buckets: u64) -> StripeGeometry {
        StripeGeometry::with_layout(segments, buckets, 0, 0)
    }

    /// Encode `entries` (segment, local index, entry) into a directory image.
    pub(crate) fn directory_bytes(
        geometry: &StripeGeometry,
        entries: &[(usize, usize, DirEntry)],
    ) -> Vec<u8> {
        let mut bytes = vec![0u8; geometry.directory_len() as usize];
        let per_segment = geometry.entries_per_segment() as usize;
        for (segment, index, entry) in entries {
            let at = (segment * per_segment + index) * DIR_ENTRY_SIZE;
            bytes[at..at + DIR_ENTRY_SIZE].copy_from_slice(&entry.encode());
        }
        bytes
    }

    fn head(offset: u64, next: u16) -> DirEntry {
        DirEntry {
            length: 4096,
            offset,
            head: true,
            next,
            ..Default::default()
        }
    }

    #[test]
    fn test_addressing() {
        let g = tiny_geometry(2, 3);
        let bytes = directory_bytes(&g, &[(0, 4, head(512, 0)), (1, 8, head(1024, 0))]);
        let dir = Directory::from_bytes(&bytes, g);

        assert_eq!(dir.segment_len(), 12);
        assert_eq!(dir.bucket_head(0, 1).unwrap().offset, 512);
        assert_eq!(dir.bucket_head(1, 2).unwrap().offset, 1024);
        assert!(dir.bucket_head(0, 3).is_none());
        assert!(dir.entry_at(2, 0).is_none());
        assert!(dir.entry_at(0, 12).is_none());
        assert_eq!(dir.bad_slots(), 0);
        assert_eq!(dir.unused_count(), 22);
    }

    #[test]
    fn test_short_region_degrades_to_unused() {
        let g = tiny_geometry(1, 2);
        let mut bytes = directory_bytes(&g, &[(0, 0, head(512, 0))]);
        bytes.truncate(35);
        let dir = Directory::from_bytes(&bytes, g);

        assert_eq!(dir.entries().len(), 8);
        assert_eq!(dir.bad_slots(), 5);
        assert!(dir.bucket_head(0, 0).unwrap().is_head());
        assert!(dir.entry_at(0, 7).unwrap().is_unused());
    }

    #[test]
    fn test_read_from_source_at_offset() {
        let g = StripeGeometry::with_layout(2, 1, 8192, 0);
        let bytes = directory_bytes(&g, &[(1, 0, head(2048, 0))]);
        let mut src = MemorySource::zeroed(8192);
        src.write_at(8192, &bytes);

        let dir = Directory::read(&src, g).unwrap();
        assert_eq!(dir.bad_slots(), 0);
        assert_eq!(dir.bucket_head(1, 0).unwrap().offset, 2048);
    }

    #[test]
    fn test_read_truncated_source() {
        let g = StripeGeometry::with_layout(2, 1, 0, 0);
        let bytes = directory_bytes(&g, &[(0, 0, head(2048, 0))]);
        // Only the first segment is present.
        let src = MemorySource::new(bytes[..40].to_vec());

        let dir = Directory::read(&src, g).unwrap();
        assert_eq!(dir.bad_slots(), 4);
        assert!(dir.bucket_head(0, 0).unwrap().is_head());
    }
}
