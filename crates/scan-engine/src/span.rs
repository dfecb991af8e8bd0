//! Spans, stripes and span-wide enumeration.
//!
//! A span is one storage extent. Its header at `0x2000` lists the stripes
//! carved out of it; each stripe carries two header copies, each followed by
//! a directory generation, and a shared content region.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use scan_config::{log_scan_debug, log_scan_info, log_scan_warn, ScanSettings, StripePlacement};
use scan_format::{
    CacheType, DiskHeader, SpanBlockHeader, StripeGeometry, StripeHeader,
    DEFAULT_AVG_OBJECT_SIZE, DISK_HEADER_OFFSET, DISK_HEADER_SIZE, SPAN_BLOCK_HEADER_SIZE,
    STRIPE_HEADER_SIZE,
};
use serde::Serialize;
use tracing::instrument;

use crate::directory::Directory;
use crate::enumerate::{LogicalObject, PhaseFilter, StripeCatalog, StripeScan};
use crate::http::{HeaderParser, UrlScanParser};
use crate::pool::{create_thread_pool, Throttle};
use crate::source::{read_exact, read_window, ByteSource};
use crate::{Diagnostic, DiagnosticKind, Result, ScanError, ScanSummary};

/// Identity of a span for caching; the path it was opened from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SpanId(pub String);

impl From<&Path> for SpanId {
    fn from(path: &Path) -> Self {
        SpanId(path.display().to_string())
    }
}

impl From<&str> for SpanId {
    fn from(s: &str) -> Self {
        SpanId(s.to_string())
    }
}

impl std::fmt::Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a stripe lives inside its span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StripeExtent {
    /// Position among the span's stripes.
    pub index: usize,
    /// Byte offset from the start of the span.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
    pub volume: u32,
    pub cache_type: CacheType,
}

/// Which header copy a stripe was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeaderCopy {
    A,
    B,
}

/// A stripe whose header has been read and validated.
#[derive(Debug, Clone)]
pub struct Stripe {
    pub extent: StripeExtent,
    pub header: StripeHeader,
    pub geometry: StripeGeometry,
    pub copy: HeaderCopy,
}

impl Stripe {
    /// Read both header copies and pick the authoritative one.
    ///
    /// Copy B wins when its magic is valid and its `sync_serial` is newer
    /// than copy A's (or copy A is unreadable). The chosen copy must be at
    /// least format 24.0. A stripe reaching past the end of the source fails
    /// as a read past the end.
    #[instrument(skip(source), level = "debug")]
    pub fn locate<S: ByteSource + ?Sized>(
        source: &S,
        extent: StripeExtent,
        avg_object_size: u64,
    ) -> Result<Self> {
        if extent.offset.saturating_add(extent.length) > source.len() {
            return Err(ScanError::Io {
                offset: extent.offset,
                len: extent.length as usize,
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stripe extends past the end of the span",
                ),
            });
        }
        let geometry = StripeGeometry::for_stripe(extent.offset, extent.length, avg_object_size)?;

        let raw_a = read_exact(source, extent.offset, STRIPE_HEADER_SIZE)?;
        let copy_a = StripeHeader::decode(&raw_a);

        let b_offset = geometry.copy_b_header_offset();
        let copy_b = read_window(source, b_offset, STRIPE_HEADER_SIZE)?
            .and_then(|raw| StripeHeader::decode(&raw).ok());

        let (header, geometry, copy) = match (copy_a, copy_b) {
            (Ok(a), Some(b)) if b.sync_serial > a.sync_serial => {
                (b, geometry.relocated(b_offset), HeaderCopy::B)
            }
            (Ok(a), _) => (a, geometry, HeaderCopy::A),
            (Err(_), Some(b)) => (b, geometry.relocated(b_offset), HeaderCopy::B),
            (Err(e), None) => return Err(e.into()),
        };
        header.check_version()?;

        log_scan_debug!(
            "Stripe located",
            stripe = extent.index,
            version = tracing::field::display(header.version()),
            copy = tracing::field::debug(copy),
            segments = geometry.segments
        );

        Ok(Self {
            extent,
            header,
            geometry,
            copy,
        })
    }

    pub fn content_offset(&self) -> u64 {
        self.geometry.content_offset
    }

    /// Read the directory generation behind the chosen header copy.
    pub fn directory<S: ByteSource + ?Sized>(&self, source: &S) -> Result<Directory> {
        Directory::read(source, self.geometry)
    }
}

/// A storage extent and the stripes placed on it.
#[derive(Debug, Clone)]
pub struct Span {
    pub id: SpanId,
    /// Present when the layout was read from the span itself.
    pub header: Option<DiskHeader>,
    pub stripes: Vec<StripeExtent>,
}

impl Span {
    /// Read the span header and its stripe table. Free blocks are skipped.
    #[instrument(skip(source), level = "debug")]
    pub fn discover<S: ByteSource + ?Sized>(source: &S, id: SpanId) -> Result<Self> {
        let raw = read_exact(source, DISK_HEADER_OFFSET, DISK_HEADER_SIZE)?;
        let header = DiskHeader::decode(&raw)?;

        let table_offset = DISK_HEADER_OFFSET + DISK_HEADER_SIZE as u64;
        let table_len = header.diskvol_blocks as usize * SPAN_BLOCK_HEADER_SIZE;
        if table_offset + table_len as u64 > source.len() {
            return Err(ScanError::Io {
                offset: table_offset,
                len: table_len,
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "span block table runs past the end of the span",
                ),
            });
        }
        let table = read_exact(source, table_offset, table_len)?;

        let mut stripes = Vec::new();
        for raw in table.chunks_exact(SPAN_BLOCK_HEADER_SIZE) {
            let block = SpanBlockHeader::decode(raw)?;
            if block.free {
                log_scan_debug!("Skipping free span block", offset = block.offset);
                continue;
            }
            stripes.push(StripeExtent {
                index: stripes.len(),
                offset: block.offset,
                length: block.byte_len(),
                volume: block.number.max(0) as u32,
                cache_type: block.cache_type,
            });
        }

        log_scan_info!(
            "Span discovered",
            span = tracing::field::display(&id),
            stripes = stripes.len(),
            volumes = header.volumes
        );

        Ok(Self {
            id,
            header: Some(header),
            stripes,
        })
    }

    /// A span whose stripe placement is already known.
    pub fn from_layout(id: SpanId, placements: &[StripePlacement]) -> Self {
        let stripes = placements
            .iter()
            .enumerate()
            .map(|(index, p)| StripeExtent {
                index,
                offset: p.offset,
                length: p.length,
                volume: p.volume,
                cache_type: CacheType::Http,
            })
            .collect();
        Self {
            id,
            header: None,
            stripes,
        }
    }

    pub fn volumes(&self) -> BTreeSet<u32> {
        self.stripes.iter().map(|s| s.volume).collect()
    }

    pub fn stripes_of(&self, volume: u32) -> impl Iterator<Item = &StripeExtent> {
        self.stripes.iter().filter(move |s| s.volume == volume)
    }
}

/// Knobs shared by every stripe scan of a span.
#[derive(Clone)]
pub struct ScanOptions {
    pub avg_object_size: u64,
    pub phase: PhaseFilter,
    pub parser: Arc<dyn HeaderParser>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            avg_object_size: DEFAULT_AVG_OBJECT_SIZE,
            phase: PhaseFilter::All,
            parser: Arc::new(UrlScanParser),
        }
    }
}

impl From<&ScanSettings> for ScanOptions {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            avg_object_size: settings.avg_object_size(),
            phase: settings.phase().into(),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for ScanOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOptions")
            .field("avg_object_size", &self.avg_object_size)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// Per-stripe outcome inside a span catalog.
#[derive(Debug, Clone, Serialize)]
pub struct StripeReport {
    pub extent: StripeExtent,
    pub summary: ScanSummary,
}

/// Everything a span scan produced.
#[derive(Debug, Clone, Default)]
pub struct SpanCatalog {
    pub span: SpanId,
    pub stripes: Vec<StripeReport>,
    pub objects: Vec<LogicalObject>,
    pub diagnostics: Vec<Diagnostic>,
    pub summary: ScanSummary,
}

impl SpanCatalog {
    pub fn new(span: SpanId) -> Self {
        Self {
            span,
            ..Default::default()
        }
    }

    fn absorb(&mut self, extent: StripeExtent, stripe: StripeCatalog) {
        self.summary.merge(&stripe.summary);
        self.stripes.push(StripeReport {
            extent,
            summary: stripe.summary,
        });
        self.objects.extend(stripe.objects);
        self.diagnostics.extend(stripe.diagnostics);
    }

    /// Bytes allotted to each volume on this span.
    pub fn volume_bytes(&self) -> BTreeMap<u32, u64> {
        let mut out = BTreeMap::new();
        for report in &self.stripes {
            *out.entry(report.extent.volume).or_insert(0) += report.extent.length;
        }
        out
    }
}

/// Scan one stripe. Failures confined to the stripe skip it with a diagnostic.
pub fn scan_stripe<S: ByteSource + ?Sized>(
    source: &S,
    extent: &StripeExtent,
    options: &ScanOptions,
) -> Result<StripeCatalog> {
    let stripe = match Stripe::locate(source, *extent, options.avg_object_size) {
        Ok(stripe) => stripe,
        Err(e) if e.is_local() => {
            log_scan_warn!(
                "Skipping stripe",
                stripe = extent.index,
                offset = extent.offset,
                reason = tracing::field::display(&e)
            );
            let kind = DiagnosticKind::StripeSkipped {
                reason: e.to_string(),
            };
            let mut summary = ScanSummary {
                stripes: 1,
                ..Default::default()
            };
            summary.record(&kind);
            return Ok(StripeCatalog {
                stripe: extent.index,
                objects: Vec::new(),
                diagnostics: vec![Diagnostic {
                    stripe: extent.index,
                    kind,
                }],
                summary,
            });
        }
        Err(e) => return Err(e),
    };

    let dir = stripe.directory(source)?;
    StripeScan::new(&dir, source, stripe.content_offset())
        .stripe(extent.index)
        .stripe_header(stripe.header)
        .phase_filter(options.phase)
        .header_parser(options.parser.as_ref())
        .catalog()
}

/// Stripe catalogs of a span, one at a time, in placement order.
pub fn stripe_catalogs<'a, S: ByteSource + ?Sized>(
    span: &'a Span,
    source: &'a S,
    options: &'a ScanOptions,
) -> impl Iterator<Item = Result<StripeCatalog>> + 'a {
    span.stripes
        .iter()
        .map(move |extent| scan_stripe(source, extent, options))
}

/// Enumerate every stripe of every volume on a span.
///
/// Stripes are scanned on a pool no larger than `throttle` allows; results
/// are merged after all workers finish. The first escalated I/O error is
/// returned.
#[instrument(skip(source, options, throttle), fields(span_id = %span.id), level = "debug")]
pub fn enumerate_span<S, T>(
    span: &Span,
    source: &S,
    options: &ScanOptions,
    throttle: &T,
) -> Result<SpanCatalog>
where
    S: ByteSource + ?Sized,
    T: Throttle + ?Sized,
{
    let pool = create_thread_pool(throttle)?;
    let results: Vec<Result<StripeCatalog>> = pool.install(|| {
        span.stripes
            .par_iter()
            .map(|extent| scan_stripe(source, extent, options))
            .collect()
    });

    let mut catalog = SpanCatalog::new(span.id.clone());
    for (extent, result) in span.stripes.iter().zip(results) {
        catalog.absorb(*extent, result?);
    }
    catalog.summary.objects = catalog.objects.len() as u64;

    log_scan_info!(
        "Span enumerated",
        span = tracing::field::display(&span.id),
        stripes = catalog.summary.stripes,
        skipped = catalog.summary.skipped_stripes,
        objects = catalog.summary.objects,
        degraded = catalog.summary.degraded
    );
    Ok(catalog)
}
