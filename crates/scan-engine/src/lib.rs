//! # scan-engine
//!
//! Offline object enumeration over a proxy cache image.
//!
//! Reads a span through a [`ByteSource`], locates its stripes, walks each
//! stripe's directory buckets and fragment chains, and reports the logical
//! objects it finds together with per-host usage.
//!
//! ## Pipeline
//!
//! ```text
//! Span::discover ─► Stripe::locate ─► Directory::read
//!                                         │
//!                     walk_bucket ◄───────┤
//!                 walk_fragment_chain ◄───┘
//!                         │
//!               group_alternates ─► LogicalObject ─► UsageReport
//! ```
//!
//! Stripes of a span are scanned in parallel on a bounded rayon pool.
//! Per-record failures become [`Diagnostic`]s; only I/O failures that are not
//! a read past the end of the image abort a span.

pub mod cache;
pub mod chain;
pub mod directory;
pub mod enumerate;
mod error;
pub mod http;
pub mod pool;
pub mod session;
pub mod source;
pub mod span;
pub mod usage;

pub use cache::ResultCache;
pub use chain::{walk_bucket, walk_fragment_chain, ChainEnd, FragmentChain};
pub use directory::Directory;
pub use enumerate::{enumerate_stripe, LogicalObject, PhaseFilter, StripeCatalog, StripeScan};
pub use error::{
    ChainError, Diagnostic, DiagnosticKind, ParseError, Result, ScanError, ScanSummary,
};
pub use http::{HeaderParser, RequestUrl, UrlScanParser, UNKNOWN_HOST};
pub use pool::{default_thread_count, FixedThrottle, Throttle};
pub use session::ScanSession;
pub use source::{open_span, ByteSource, FileSource, MemorySource, MmapSource};
pub use span::{
    enumerate_span, scan_stripe, stripe_catalogs, ScanOptions, Span, SpanCatalog, SpanId,
    Stripe, StripeExtent,
};
pub use usage::{aggregate_by_host, percentages, HostShare, UsageReport};
