use std::io;
use std::path::PathBuf;

use scan_config::ConfigError;
use scan_format::{DecodeError, DocKey, GeometryError, MagicError, VersionError};
use thiserror::Error;

/// A `next` pointer that cannot be followed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain in segment {segment} exceeded {limit} steps (cycle)")]
    Cycle { segment: usize, limit: usize },

    #[error("next index {index} out of range for segment {segment} of {len} entries")]
    OutOfRange {
        segment: usize,
        index: usize,
        len: usize,
    },
}

/// A stored protocol header that yielded no usable request URL.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("header blob is empty")]
    Empty,

    #[error("no request URL in header blob")]
    NoUrl,

    #[error("request URL has no host: {0}")]
    NoHost(String),

    #[error("invalid port in {0}")]
    BadPort(String),
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("cannot open span {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error reading {len} bytes at {offset:#x}: {source}")]
    Io {
        offset: u64,
        len: usize,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build stripe worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl ScanError {
    /// Whether the failure is confined to the stripe being read.
    ///
    /// Reads past the end of the source count as local: the image is
    /// truncated, the device is still reachable.
    pub fn is_local(&self) -> bool {
        match self {
            ScanError::Io { source, .. } => source.kind() == io::ErrorKind::UnexpectedEof,
            ScanError::Version(_) | ScanError::Decode(_) | ScanError::Geometry(_) => true,
            ScanError::Open { .. } | ScanError::Config(_) | ScanError::Pool(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

/// What went wrong with one entry, object or stripe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A bucket chain could not be followed to its end.
    Bucket { bucket: usize, error: ChainError },
    /// A fragment chain stopped at a bad pointer.
    Fragment { offset: u64, error: ChainError },
    /// A `Doc` header failed its magic check.
    Magic { offset: u64, error: MagicError },
    /// A `Doc` header failed to decode for another reason.
    Doc { offset: u64, error: DecodeError },
    /// A window lies past the end of the source.
    Unreadable { offset: u64, len: usize },
    /// The head's protocol header yielded no URL.
    Parse { key: DocKey, error: ParseError },
    /// The whole stripe was skipped.
    StripeSkipped { reason: String },
}

/// A degraded record, tagged with the stripe it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub stripe: usize,
    pub kind: DiagnosticKind,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stripe {}: ", self.stripe)?;
        match &self.kind {
            DiagnosticKind::Bucket { bucket, error } => write!(f, "bucket {}: {}", bucket, error),
            DiagnosticKind::Fragment { offset, error } => {
                write!(f, "fragment chain at {:#x}: {}", offset, error)
            }
            DiagnosticKind::Magic { offset, error } => write!(f, "doc at {:#x}: {}", offset, error),
            DiagnosticKind::Doc { offset, error } => write!(f, "doc at {:#x}: {}", offset, error),
            DiagnosticKind::Unreadable { offset, len } => {
                write!(f, "{} bytes at {:#x} lie past the end of the source", len, offset)
            }
            DiagnosticKind::Parse { key, error } => write!(f, "object {}: {}", key, error),
            DiagnosticKind::StripeSkipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// Counts of everything a scan looked at and everything it had to degrade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ScanSummary {
    pub stripes: u64,
    pub skipped_stripes: u64,
    pub entries: u64,
    pub unused: u64,
    pub bad_slots: u64,
    pub heads: u64,
    pub objects: u64,
    /// Objects omitted or marked incomplete.
    pub degraded: u64,
    pub corrupt_docs: u64,
    pub bad_magic: u64,
    pub bad_docs: u64,
    pub chain_errors: u64,
    pub unreadable: u64,
    pub parse_failures: u64,
}

impl ScanSummary {
    pub fn merge(&mut self, other: &ScanSummary) {
        self.stripes += other.stripes;
        self.skipped_stripes += other.skipped_stripes;
        self.entries += other.entries;
        self.unused += other.unused;
        self.bad_slots += other.bad_slots;
        self.heads += other.heads;
        self.objects += other.objects;
        self.degraded += other.degraded;
        self.corrupt_docs += other.corrupt_docs;
        self.bad_magic += other.bad_magic;
        self.bad_docs += other.bad_docs;
        self.chain_errors += other.chain_errors;
        self.unreadable += other.unreadable;
        self.parse_failures += other.parse_failures;
    }

    /// Count a diagnostic under its category.
    pub(crate) fn record(&mut self, kind: &DiagnosticKind) {
        match kind {
            DiagnosticKind::Bucket { .. } | DiagnosticKind::Fragment { .. } => {
                self.chain_errors += 1
            }
            DiagnosticKind::Magic {
                error: MagicError::Corrupt,
                ..
            } => self.corrupt_docs += 1,
            DiagnosticKind::Magic {
                error: MagicError::BadMagic(_),
                ..
            } => self.bad_magic += 1,
            DiagnosticKind::Doc { .. } => self.bad_docs += 1,
            DiagnosticKind::Unreadable { .. } => self.unreadable += 1,
            DiagnosticKind::Parse { .. } => self.parse_failures += 1,
            DiagnosticKind::StripeSkipped { .. } => self.skipped_stripes += 1,
        }
    }
}
