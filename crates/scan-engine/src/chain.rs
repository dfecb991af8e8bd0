//! Bucket and fragment chain traversal.
//!
//! `next` values are untrusted. Every walk is an index lookup with an
//! explicit bounds check, and every walk gives up after as many steps as
//! the segment has entries.

use std::collections::BTreeMap;

use scan_format::{DecodeError, DirEntry, Doc, DocKey, DIR_DEPTH, DOC_HEADER_SIZE};

use crate::directory::Directory;
use crate::source::{read_window, ByteSource};
use crate::{ChainError, Result};

/// Lazy walk of one bucket's collision chain.
///
/// Yields `(local_index, entry)` for every used entry. Unused entries are
/// skipped but their `next` is still followed.
#[derive(Debug, Clone)]
pub struct BucketWalk<'a> {
    dir: &'a Directory,
    segment: usize,
    cursor: Option<usize>,
    steps: usize,
}

pub fn walk_bucket(dir: &Directory, segment: usize, bucket: usize) -> BucketWalk<'_> {
    let start = (bucket < dir.buckets_per_segment() && segment < dir.segments())
        .then_some(bucket * DIR_DEPTH as usize);
    BucketWalk {
        dir,
        segment,
        cursor: start,
        steps: 0,
    }
}

impl Iterator for BucketWalk<'_> {
    type Item = std::result::Result<(usize, DirEntry), ChainError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let index = self.cursor?;
            let limit = self.dir.segment_len();

            self.steps += 1;
            if self.steps > limit {
                self.cursor = None;
                return Some(Err(ChainError::Cycle {
                    segment: self.segment,
                    limit,
                }));
            }

            let Some(entry) = self.dir.entry_at(self.segment, index) else {
                self.cursor = None;
                return Some(Err(ChainError::OutOfRange {
                    segment: self.segment,
                    index,
                    len: limit,
                }));
            };

            self.cursor = (entry.next != 0).then_some(entry.next as usize);
            if !entry.is_unused() {
                return Some(Ok((index, *entry)));
            }
        }
    }
}

/// Why a fragment chain stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEnd {
    /// Reached `next == 0`.
    Terminated,
    /// Reached the head entry of another object at this local index.
    NextHead(usize),
    /// A `next` pointer was out of range or looped.
    Broken(ChainError),
    /// The `Doc` at this content offset failed to decode.
    BadDoc { offset: u64, error: DecodeError },
    /// The `Doc` at this offset lies past the end of the source.
    Unreadable { offset: u64 },
}

/// Fragments of one object, in chain order, starting at its head.
#[derive(Debug, Clone)]
pub struct FragmentChain {
    pub segment: usize,
    pub head_index: usize,
    pub head: DirEntry,
    pub fragments: Vec<(DirEntry, Doc)>,
    /// Stored protocol header of the head `Doc`.
    pub header_blob: Vec<u8>,
    pub end: ChainEnd,
}

impl FragmentChain {
    pub fn head_doc(&self) -> Option<&Doc> {
        self.fragments.first().map(|(_, doc)| doc)
    }

    pub fn key(&self) -> Option<DocKey> {
        self.head_doc().map(|doc| doc.keys)
    }

    /// Whether the chain ended where a well-formed chain ends.
    pub fn is_complete(&self) -> bool {
        !self.fragments.is_empty()
            && matches!(self.end, ChainEnd::Terminated | ChainEnd::NextHead(_))
    }

    /// Sum of the payload bytes of every fragment read.
    pub fn payload_bytes(&self) -> u64 {
        self.fragments.iter().map(|(_, doc)| doc.payload_len()).sum()
    }

    /// Object size: the head's `total_length`, or the fragment payloads when it is zero.
    pub fn object_size(&self) -> u64 {
        match self.head_doc() {
            Some(doc) if doc.total_length != 0 => doc.total_length,
            _ => self.payload_bytes(),
        }
    }
}

enum DocRead {
    Doc(Doc),
    Stop(ChainEnd),
}

fn read_doc<S: ByteSource + ?Sized>(source: &S, offset: u64) -> Result<DocRead> {
    let Some(raw) = read_window(source, offset, DOC_HEADER_SIZE)? else {
        return Ok(DocRead::Stop(ChainEnd::Unreadable { offset }));
    };
    Ok(match Doc::decode(&raw) {
        Ok(doc) => DocRead::Doc(doc),
        Err(error) => DocRead::Stop(ChainEnd::BadDoc { offset, error }),
    })
}

/// Walk the fragments of the object whose head sits at `head_index`.
///
/// Content offsets in the directory are relative to `content_offset`. The
/// head's header blob is only read once its `Doc` has passed the magic
/// check, and only when `hlen` fits inside both the fragment and the head
/// entry's length bound. Decode failures end
/// the chain and are reported through [`FragmentChain::end`]; I/O failures
/// other than reading past the end are returned.
pub fn walk_fragment_chain<S: ByteSource + ?Sized>(
    dir: &Directory,
    source: &S,
    content_offset: u64,
    segment: usize,
    head_index: usize,
) -> Result<FragmentChain> {
    let limit = dir.segment_len();
    let Some(head) = dir.entry_at(segment, head_index).copied() else {
        return Ok(FragmentChain {
            segment,
            head_index,
            head: DirEntry::default(),
            fragments: Vec::new(),
            header_blob: Vec::new(),
            end: ChainEnd::Broken(ChainError::OutOfRange {
                segment,
                index: head_index,
                len: limit,
            }),
        });
    };

    let mut chain = FragmentChain {
        segment,
        head_index,
        head,
        fragments: Vec::new(),
        header_blob: Vec::new(),
        end: ChainEnd::Terminated,
    };

    let head_offset = content_offset + head.offset;
    let head_doc = match read_doc(source, head_offset)? {
        DocRead::Doc(doc) => doc,
        DocRead::Stop(end) => {
            chain.end = end;
            return Ok(chain);
        }
    };

    let hlen = head_doc.hlen as usize;
    let bound = (head_doc.length as usize).min(head.length as usize);
    if hlen > 0 && DOC_HEADER_SIZE + hlen <= bound {
        if let Some(blob) = read_window(source, head_offset + DOC_HEADER_SIZE as u64, hlen)? {
            chain.header_blob = blob;
        }
    }
    chain.fragments.push((head, head_doc));

    let mut cursor = head.next as usize;
    let mut steps = 1;
    while cursor != 0 {
        steps += 1;
        if steps > limit {
            chain.end = ChainEnd::Broken(ChainError::Cycle { segment, limit });
            break;
        }

        let Some(entry) = dir.entry_at(segment, cursor).copied() else {
            chain.end = ChainEnd::Broken(ChainError::OutOfRange {
                segment,
                index: cursor,
                len: limit,
            });
            break;
        };

        if entry.is_head() {
            chain.end = if cursor == head_index {
                ChainEnd::Broken(ChainError::Cycle { segment, limit })
            } else {
                ChainEnd::NextHead(cursor)
            };
            break;
        }

        if !entry.is_unused() {
            match read_doc(source, content_offset + entry.offset)? {
                DocRead::Doc(doc) => chain.fragments.push((entry, doc)),
                DocRead::Stop(end) => {
                    chain.end = end;
                    break;
                }
            }
        }
        cursor = entry.next as usize;
    }

    Ok(chain)
}

/// Group chains by base key, keeping directory order inside each group.
///
/// Chains whose head `Doc` could not be read carry no key and are left out.
pub fn group_alternates<I>(chains: I) -> BTreeMap<u64, Vec<FragmentChain>>
where
    I: IntoIterator<Item = FragmentChain>,
{
    let mut groups: BTreeMap<u64, Vec<FragmentChain>> = BTreeMap::new();
    for chain in chains {
        if let Some(key) = chain.key() {
            groups.entry(key.base()).or_default().push(chain);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::tests::{directory_bytes, tiny_geometry};
    use crate::source::MemorySource;
    use scan_format::{DOC_CORRUPT_MAGIC, DOC_MAGIC};

    fn entry(offset: u64, head: bool, next: u16) -> DirEntry {
        DirEntry {
            length: 8192,
            offset,
            head,
            next,
            ..Default::default()
        }
    }

    fn doc(base: u64, length: u32, total: u64, hlen: u32) -> Doc {
        Doc {
            magic: DOC_MAGIC,
            length,
            total_length: total,
            keys: DocKey([base, 1, 2, 3]),
            hlen,
            ..Default::default()
        }
    }

    fn directory(buckets: u64, entries: &[(usize, DirEntry)]) -> Directory {
        let g = tiny_geometry(1, buckets);
        let placed: Vec<_> = entries.iter().map(|(i, e)| (0, *i, *e)).collect();
        Directory::from_bytes(&directory_bytes(&g, &placed), g)
    }

    #[test]
    fn test_bucket_walk_skips_unused_but_follows_next() {
        let dir = directory(
            2,
            &[
                (0, entry(512, true, 5)),
                (5, entry(0, false, 6)),
                (6, entry(1024, false, 0)),
            ],
        );
        let walked: Vec<_> = walk_bucket(&dir, 0, 0).map(|r| r.unwrap().0).collect();
        assert_eq!(walked, vec![0, 6]);

        assert_eq!(walk_bucket(&dir, 0, 1).count(), 0);
        assert_eq!(walk_bucket(&dir, 0, 2).count(), 0);
    }

    #[test]
    fn test_bucket_walk_cycle_terminates() {
        // 0 -> 2 -> 3 -> 2 ...
        let dir = directory(
            1,
            &[
                (0, entry(512, true, 2)),
                (2, entry(1024, false, 3)),
                (3, entry(1536, false, 2)),
            ],
        );
        let items: Vec<_> = walk_bucket(&dir, 0, 0).collect();
        assert!(items.len() <= dir.segment_len() + 1);
        assert_eq!(
            items.last().unwrap(),
            &Err(ChainError::Cycle {
                segment: 0,
                limit: 4
            })
        );
    }

    #[test]
    fn test_bucket_walk_out_of_range() {
        let dir = directory(1, &[(0, entry(512, true, 40))]);
        let items: Vec<_> = walk_bucket(&dir, 0, 0).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1],
            Err(ChainError::OutOfRange {
                segment: 0,
                index: 40,
                len: 4
            })
        );
    }

    #[test]
    fn test_fragment_chain_reads_fragments_and_blob() {
        let dir = directory(
            2,
            &[(0, entry(0x1000, true, 3)), (3, entry(0x2000, false, 0))],
        );
        let mut src = MemorySource::zeroed(0x3000);
        src.write_at(0x1000, &doc(7, 72 + 16 + 100, 300, 16).encode());
        src.write_at(0x1000 + 72, b"GET http://a.b/c");
        src.write_at(0x2000, &doc(7, 72 + 200, 300, 0).encode());

        let chain = walk_fragment_chain(&dir, &src, 0, 0, 0).unwrap();
        assert_eq!(chain.fragments.len(), 2);
        assert_eq!(chain.end, ChainEnd::Terminated);
        assert!(chain.is_complete());
        assert_eq!(chain.header_blob, b"GET http://a.b/c");
        assert_eq!(chain.payload_bytes(), 300);
        assert_eq!(chain.object_size(), 300);
    }

    #[test]
    fn test_fragment_chain_stops_at_next_head() {
        let dir = directory(
            1,
            &[(0, entry(0x400, true, 2)), (2, entry(0x800, true, 0))],
        );
        let mut src = MemorySource::zeroed(0x1000);
        src.write_at(0x400, &doc(1, 72, 10, 0).encode());

        let chain = walk_fragment_chain(&dir, &src, 0, 0, 0).unwrap();
        assert_eq!(chain.fragments.len(), 1);
        assert_eq!(chain.end, ChainEnd::NextHead(2));
        assert!(chain.is_complete());
    }

    #[test]
    fn test_fragment_chain_cycle_terminates() {
        let dir = directory(
            1,
            &[
                (0, entry(0x400, true, 1)),
                (1, entry(0x800, false, 2)),
                (2, entry(0x800, false, 1)),
            ],
        );
        let mut src = MemorySource::zeroed(0x1000);
        src.write_at(0x400, &doc(1, 72, 0, 0).encode());
        src.write_at(0x800, &doc(1, 72 + 8, 0, 0).encode());

        let chain = walk_fragment_chain(&dir, &src, 0, 0, 0).unwrap();
        assert!(chain.fragments.len() <= dir.segment_len());
        assert!(matches!(chain.end, ChainEnd::Broken(ChainError::Cycle { .. })));
        assert!(!chain.is_complete());
    }

    /// Records every window requested from the wrapped source.
    struct RecordingSource {
        inner: MemorySource,
        reads: std::sync::Mutex<Vec<(u64, usize)>>,
    }

    impl ByteSource for RecordingSource {
        fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
            self.reads.lock().unwrap().push((offset, len));
            self.inner.read_at(offset, len)
        }

        fn len(&self) -> u64 {
            self.inner.len()
        }
    }

    #[test]
    fn test_bad_magic_does_not_read_header_blob() {
        let dir = directory(1, &[(0, entry(0x400, true, 0))]);
        let mut bad = doc(1, 72 + 64, 64, 64);
        bad.magic = 0x0BAD_F00D;
        let mut inner = MemorySource::zeroed(0x1000);
        inner.write_at(0x400, &bad.encode());
        let src = RecordingSource {
            inner,
            reads: Default::default(),
        };

        let chain = walk_fragment_chain(&dir, &src, 0, 0, 0).unwrap();
        assert!(chain.fragments.is_empty());
        assert!(chain.header_blob.is_empty());
        assert_eq!(
            chain.end,
            ChainEnd::BadDoc {
                offset: 0x400,
                error: DecodeError::BadMagic(0x0BAD_F00D)
            }
        );
        assert_eq!(*src.reads.lock().unwrap(), vec![(0x400, DOC_HEADER_SIZE)]);
    }

    #[test]
    fn test_header_blob_bounded_by_entry_length() {
        let mut head = entry(0x400, true, 0);
        head.length = 4096;
        let dir = directory(1, &[(0, head)]);
        let huge = doc(1, u32::MAX, 0, 0xF000_0000);
        let mut inner = MemorySource::zeroed(0x2000);
        inner.write_at(0x400, &huge.encode());
        let src = RecordingSource {
            inner,
            reads: Default::default(),
        };

        let chain = walk_fragment_chain(&dir, &src, 0, 0, 0).unwrap();
        assert_eq!(chain.fragments.len(), 1);
        assert!(chain.header_blob.is_empty());
        assert_eq!(*src.reads.lock().unwrap(), vec![(0x400, DOC_HEADER_SIZE)]);
    }

    #[test]
    fn test_corrupt_doc_ends_chain() {
        let dir = directory(
            1,
            &[(0, entry(0x400, true, 1)), (1, entry(0x800, false, 0))],
        );
        let mut src = MemorySource::zeroed(0x1000);
        src.write_at(0x400, &doc(1, 72, 0, 0).encode());
        let mut corrupt = doc(1, 72, 0, 0);
        corrupt.magic = DOC_CORRUPT_MAGIC;
        src.write_at(0x800, &corrupt.encode());

        let chain = walk_fragment_chain(&dir, &src, 0, 0, 0).unwrap();
        assert_eq!(chain.fragments.len(), 1);
        assert_eq!(
            chain.end,
            ChainEnd::BadDoc {
                offset: 0x800,
                error: DecodeError::Corrupt
            }
        );
    }

    #[test]
    fn test_unreadable_head() {
        let dir = directory(1, &[(0, entry(0x4000, true, 0))]);
        let src = MemorySource::zeroed(0x100);
        let chain = walk_fragment_chain(&dir, &src, 0, 0, 0).unwrap();
        assert_eq!(chain.end, ChainEnd::Unreadable { offset: 0x4000 });
        assert!(chain.key().is_none());
    }

    #[test]
    fn test_group_alternates_by_base_key() {
        let dir = directory(
            2,
            &[(0, entry(0x400, true, 0)), (4, entry(0x800, true, 0))],
        );
        let mut src = MemorySource::zeroed(0x1000);
        src.write_at(0x400, &doc(9, 72, 5, 0).encode());
        let mut alt = doc(9, 72, 6, 0);
        alt.keys.0[1] = 42;
        src.write_at(0x800, &alt.encode());

        let chains = vec![
            walk_fragment_chain(&dir, &src, 0, 0, 0).unwrap(),
            walk_fragment_chain(&dir, &src, 0, 0, 4).unwrap(),
        ];
        let groups = group_alternates(chains);
        assert_eq!(groups.len(), 1);
        let group = &groups[&9];
        assert_eq!(group.len(), 2);
        assert_eq!(group[0].head_index, 0);
        assert_eq!(group[1].head_index, 4);
    }
}
