//! Stripe-level object enumeration.
//!
//! A [`StripeScan`] borrows an immutable [`Directory`] and a byte source.
//! Its iterators hold no state beyond their own cursor, so calling
//! [`StripeScan::heads`] or [`StripeScan::chains`] again restarts the walk.

use scan_config::PhaseSetting;
use scan_format::{DirEntry, DocKey, StripeHeader, CACHE_BLOCK_SIZE, DOC_HEADER_SIZE};
use serde::Serialize;
use tracing::instrument;

use crate::chain::{
    group_alternates, walk_bucket, walk_fragment_chain, BucketWalk, ChainEnd, FragmentChain,
};
use crate::directory::Directory;
use crate::http::{HeaderParser, RequestUrl, UrlScanParser, UNKNOWN_HOST};
use crate::source::ByteSource;
use crate::{ChainError, Diagnostic, DiagnosticKind, Result, ScanSummary};

static DEFAULT_PARSER: UrlScanParser = UrlScanParser;

/// Which directory generation to surface.
///
/// The engine keeps two generations of each directory and marks every entry
/// with the one that wrote it. Which generation is authoritative mid-write
/// is left to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PhaseFilter {
    /// Entries of both generations.
    #[default]
    All,
    /// Only entries carrying this phase bit.
    Only(bool),
    /// Only entries whose phase matches the stripe header's.
    MatchStripe,
    /// Entries on the live side of the stripe's validity limit.
    ///
    /// The limit, in cache blocks, is `agg_pos - content_offset`, advanced by
    /// `write_pos` when the stripe header's phase bit is set. In-phase entries
    /// must sit below it, out-of-phase entries at or above it.
    Valid,
}

impl PhaseFilter {
    /// Without a stripe header the header-relative filters accept everything.
    pub fn accepts(
        &self,
        entry: &DirEntry,
        header: Option<&StripeHeader>,
        content_offset: u64,
    ) -> bool {
        match (self, header) {
            (PhaseFilter::All, _) => true,
            (PhaseFilter::Only(phase), _) => entry.phase == *phase,
            (PhaseFilter::MatchStripe, Some(h)) => entry.phase == h.phase,
            (PhaseFilter::Valid, Some(h)) => {
                let block = entry.offset / CACHE_BLOCK_SIZE;
                let limit = validity_limit(h, content_offset);
                if entry.phase == h.phase {
                    block < limit
                } else {
                    block >= limit
                }
            }
            (PhaseFilter::MatchStripe | PhaseFilter::Valid, None) => true,
        }
    }
}

fn validity_limit(header: &StripeHeader, content_offset: u64) -> u64 {
    let mut limit = header.agg_pos.saturating_sub(content_offset);
    if header.phase {
        limit = limit.saturating_add(header.write_pos);
    }
    limit / CACHE_BLOCK_SIZE
}

impl From<PhaseSetting> for PhaseFilter {
    fn from(setting: PhaseSetting) -> Self {
        match setting {
            PhaseSetting::All => PhaseFilter::All,
            PhaseSetting::Zero => PhaseFilter::Only(false),
            PhaseSetting::One => PhaseFilter::Only(true),
            PhaseSetting::Stripe => PhaseFilter::MatchStripe,
            PhaseSetting::Valid => PhaseFilter::Valid,
        }
    }
}

/// One cached object: a head chain plus the count of its alternates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalObject {
    pub key: DocKey,
    pub url: Option<RequestUrl>,
    /// Lowercased origin host, or [`UNKNOWN_HOST`].
    pub host: String,
    /// Bytes of the object, counted once regardless of alternates.
    pub size: u64,
    /// Other chains sharing this object's base key.
    pub alternates: usize,
    pub fragments: usize,
    pub phase: bool,
    pub pinned: bool,
    /// False when the chain ended at a bad pointer or an unreadable fragment.
    pub complete: bool,
    pub stripe: usize,
}

/// A head entry found while walking bucket chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadRef {
    pub segment: usize,
    pub index: usize,
    pub entry: DirEntry,
}

/// A bucket chain that could not be walked to its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketFault {
    pub segment: usize,
    pub bucket: usize,
    pub error: ChainError,
}

/// One step of [`StripeScan::chains`].
#[derive(Debug, Clone)]
pub enum Walked {
    Chain(FragmentChain),
    Fault(BucketFault),
}

/// Everything one stripe scan produced.
#[derive(Debug, Clone, Default)]
pub struct StripeCatalog {
    pub stripe: usize,
    pub objects: Vec<LogicalObject>,
    pub diagnostics: Vec<Diagnostic>,
    pub summary: ScanSummary,
}

/// Lazy iterator over the head entries of every bucket chain in a directory.
///
/// A head reachable from more than one chain is reported once.
pub struct Heads<'a> {
    dir: &'a Directory,
    filter: PhaseFilter,
    header: Option<StripeHeader>,
    content_offset: u64,
    segment: usize,
    bucket: usize,
    walk: Option<BucketWalk<'a>>,
    seen: Vec<bool>,
}

impl Iterator for Heads<'_> {
    type Item = std::result::Result<HeadRef, BucketFault>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(walk) = self.walk.as_mut() {
                match walk.next() {
                    Some(Ok((index, entry))) => {
                        if !entry.is_head()
                            || !self
                                .filter
                                .accepts(&entry, self.header.as_ref(), self.content_offset)
                        {
                            continue;
                        }
                        if std::mem::replace(&mut self.seen[index], true) {
                            continue;
                        }
                        return Some(Ok(HeadRef {
                            segment: self.segment,
                            index,
                            entry,
                        }));
                    }
                    Some(Err(error)) => {
                        return Some(Err(BucketFault {
                            segment: self.segment,
                            bucket: self.bucket,
                            error,
                        }))
                    }
                    None => {
                        self.walk = None;
                        self.bucket += 1;
                    }
                }
            }

            if self.segment >= self.dir.segments() {
                return None;
            }
            if self.bucket >= self.dir.buckets_per_segment() {
                self.segment += 1;
                self.bucket = 0;
                self.seen.fill(false);
                continue;
            }
            self.walk = Some(walk_bucket(self.dir, self.segment, self.bucket));
        }
    }
}

/// Lazy iterator over the fragment chain of every head.
pub struct Chains<'s, 'a, S: ?Sized> {
    scan: &'s StripeScan<'a, S>,
    heads: Heads<'a>,
}

impl<S: ByteSource + ?Sized> Iterator for Chains<'_, '_, S> {
    type Item = Result<Walked>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(match self.heads.next()? {
            Ok(head) => walk_fragment_chain(
                self.scan.dir,
                self.scan.source,
                self.scan.content_offset,
                head.segment,
                head.index,
            )
            .map(Walked::Chain),
            Err(fault) => Ok(Walked::Fault(fault)),
        })
    }
}

/// Enumeration of one stripe's objects.
pub struct StripeScan<'a, S: ?Sized> {
    dir: &'a Directory,
    source: &'a S,
    content_offset: u64,
    stripe: usize,
    header: Option<StripeHeader>,
    phase: PhaseFilter,
    parser: &'a dyn HeaderParser,
}

impl<'a, S: ByteSource + ?Sized> StripeScan<'a, S> {
    pub fn new(dir: &'a Directory, source: &'a S, content_offset: u64) -> Self {
        Self {
            dir,
            source,
            content_offset,
            stripe: 0,
            header: None,
            phase: PhaseFilter::All,
            parser: &DEFAULT_PARSER,
        }
    }

    /// Index reported in diagnostics and objects.
    pub fn stripe(mut self, index: usize) -> Self {
        self.stripe = index;
        self
    }

    /// Header copy the directory was read behind; enables the header-relative phase filters.
    pub fn stripe_header(mut self, header: StripeHeader) -> Self {
        self.header = Some(header);
        self
    }

    pub fn phase_filter(mut self, phase: PhaseFilter) -> Self {
        self.phase = phase;
        self
    }

    pub fn header_parser(mut self, parser: &'a dyn HeaderParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn heads(&self) -> Heads<'a> {
        Heads {
            dir: self.dir,
            filter: self.phase,
            header: self.header,
            content_offset: self.content_offset,
            segment: 0,
            bucket: 0,
            walk: None,
            seen: vec![false; self.dir.segment_len()],
        }
    }

    /// Fragment chain of every head, in directory order.
    pub fn chains(&self) -> Chains<'_, 'a, S> {
        Chains {
            scan: self,
            heads: self.heads(),
        }
    }

    /// Objects of the stripe, alternates grouped.
    pub fn objects(&self) -> Result<std::vec::IntoIter<LogicalObject>> {
        Ok(self.catalog()?.objects.into_iter())
    }

    /// Scan the whole stripe, collecting objects, diagnostics and counts.
    #[instrument(skip(self), fields(stripe = self.stripe), level = "debug")]
    pub fn catalog(&self) -> Result<StripeCatalog> {
        let mut catalog = StripeCatalog {
            stripe: self.stripe,
            summary: ScanSummary {
                stripes: 1,
                entries: self.dir.entries().len() as u64,
                unused: self.dir.unused_count(),
                bad_slots: self.dir.bad_slots(),
                ..Default::default()
            },
            ..Default::default()
        };

        let mut chains = Vec::new();
        for item in self.chains() {
            match item? {
                Walked::Fault(fault) => self.report(
                    &mut catalog,
                    DiagnosticKind::Bucket {
                        bucket: fault.bucket,
                        error: fault.error,
                    },
                ),
                Walked::Chain(chain) => {
                    catalog.summary.heads += 1;
                    if let Some(kind) = self.end_diagnostic(&chain) {
                        self.report(&mut catalog, kind);
                    }
                    if chain.fragments.is_empty() {
                        catalog.summary.degraded += 1;
                        continue;
                    }
                    chains.push(chain);
                }
            }
        }

        for group in group_alternates(chains).into_values() {
            if let Some(object) = self.build_object(group, &mut catalog) {
                catalog.objects.push(object);
            }
        }
        catalog.summary.objects = catalog.objects.len() as u64;

        scan_config::log_scan_debug!(
            "Stripe enumerated",
            stripe = self.stripe,
            objects = catalog.summary.objects,
            degraded = catalog.summary.degraded,
            diagnostics = catalog.diagnostics.len()
        );
        Ok(catalog)
    }

    fn report(&self, catalog: &mut StripeCatalog, kind: DiagnosticKind) {
        catalog.summary.record(&kind);
        catalog.diagnostics.push(Diagnostic {
            stripe: self.stripe,
            kind,
        });
    }

    fn end_diagnostic(&self, chain: &FragmentChain) -> Option<DiagnosticKind> {
        match &chain.end {
            ChainEnd::Terminated | ChainEnd::NextHead(_) => None,
            ChainEnd::Broken(error) => Some(DiagnosticKind::Fragment {
                offset: self.content_offset + chain.head.offset,
                error: *error,
            }),
            ChainEnd::BadDoc { offset, error } => Some(match error.magic() {
                Some(magic) => DiagnosticKind::Magic {
                    offset: *offset,
                    error: magic,
                },
                None => DiagnosticKind::Doc {
                    offset: *offset,
                    error: *error,
                },
            }),
            ChainEnd::Unreadable { offset } => Some(DiagnosticKind::Unreadable {
                offset: *offset,
                len: DOC_HEADER_SIZE,
            }),
        }
    }

    /// The first chain in directory order stands for the group.
    fn build_object(
        &self,
        group: Vec<FragmentChain>,
        catalog: &mut StripeCatalog,
    ) -> Option<LogicalObject> {
        let alternates = group.len().saturating_sub(1);
        let primary = group.into_iter().next()?;
        let head_doc = *primary.head_doc()?;

        let (url, host) = match self.parser.parse(&primary.header_blob) {
            Ok(url) => {
                let host = url.host.clone();
                (Some(url), host)
            }
            Err(error) => {
                self.report(
                    catalog,
                    DiagnosticKind::Parse {
                        key: head_doc.keys,
                        error,
                    },
                );
                (None, UNKNOWN_HOST.to_string())
            }
        };

        let complete = primary.is_complete();
        if !complete {
            catalog.summary.degraded += 1;
        }

        Some(LogicalObject {
            key: head_doc.keys,
            url,
            host,
            size: primary.object_size(),
            alternates,
            fragments: primary.fragments.len(),
            phase: primary.head.phase,
            pinned: primary.head.pinned || head_doc.pinned != 0,
            complete,
            stripe: self.stripe,
        })
    }
}

/// Enumerate every object of one stripe with default settings.
pub fn enumerate_stripe<S: ByteSource + ?Sized>(
    dir: &Directory,
    source: &S,
    content_offset: u64,
) -> Result<StripeCatalog> {
    StripeScan::new(dir, source, content_offset).catalog()
}
