//! Storage layout input: spans, volumes and explicit stripe placement.
//!
//! This is the already-structured form of the cache engine's storage and
//! volume declarations. Volume sizes given as a share of total capacity are
//! resolved to bytes here.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

const MEGABYTE: u64 = 1 << 20;

/// Kind of storage backing a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    File,
    Device,
    Memory,
}

/// One stripe's placement inside a span, when known up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripePlacement {
    /// Byte offset of the stripe from the start of the span.
    pub offset: u64,
    /// Stripe length in bytes.
    pub length: u64,
    /// Volume the stripe belongs to.
    pub volume: u32,
}

/// A physical storage extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanConfig {
    pub path: PathBuf,
    /// Total size in bytes; `0` means "ask the device".
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub kind: SpanKind,
    /// Explicit stripe placement. Empty means read it from the span header.
    #[serde(default)]
    pub stripes: Vec<StripePlacement>,
}

/// Declared volume size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSize", into = "RawSize")]
pub enum VolumeSize {
    Bytes(u64),
    Percent(u8),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawSize {
    Bytes(u64),
    Text(String),
}

impl TryFrom<RawSize> for VolumeSize {
    type Error = ConfigError;

    fn try_from(raw: RawSize) -> Result<Self, Self::Error> {
        match raw {
            RawSize::Bytes(n) => Ok(VolumeSize::Bytes(n)),
            RawSize::Text(s) => s.parse(),
        }
    }
}

impl From<VolumeSize> for RawSize {
    fn from(size: VolumeSize) -> Self {
        match size {
            VolumeSize::Bytes(n) => RawSize::Bytes(n),
            VolumeSize::Percent(p) => RawSize::Text(format!("{}%", p)),
        }
    }
}

impl FromStr for VolumeSize {
    type Err = ConfigError;

    /// Parses `"50%"`, `"512K"`, `"256M"`, `"2G"`, `"1T"`, or a bare number of megabytes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_lowercase();
        let invalid = || ConfigError::InvalidSize(s.to_string());

        if let Some(pct) = text.strip_suffix('%') {
            let pct: u8 = pct.trim().parse().map_err(|_| invalid())?;
            if pct > 100 {
                return Err(invalid());
            }
            return Ok(VolumeSize::Percent(pct));
        }

        let (digits, unit) = match text.char_indices().last() {
            Some((i, 'k')) => (&text[..i], 1u64 << 10),
            Some((i, 'm')) => (&text[..i], MEGABYTE),
            Some((i, 'g')) => (&text[..i], 1u64 << 30),
            Some((i, 't')) => (&text[..i], 1u64 << 40),
            _ => (text.as_str(), MEGABYTE),
        };
        let n: u64 = digits.trim().parse().map_err(|_| invalid())?;
        n.checked_mul(unit).map(VolumeSize::Bytes).ok_or_else(invalid)
    }
}

fn default_volume_type() -> String {
    "http".to_string()
}

/// A logical partition of total cache capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub id: u32,
    #[serde(rename = "type", default = "default_volume_type")]
    pub cache_type: String,
    pub size: VolumeSize,
}

/// A volume with its size resolved to bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedVolume {
    pub id: u32,
    pub cache_type: String,
    pub bytes: u64,
}

/// Storage section of the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub spans: Vec<SpanConfig>,
    pub volumes: Vec<VolumeConfig>,
}

impl StorageConfig {
    /// Sum of the declared span sizes.
    pub fn total_capacity(&self) -> u64 {
        self.spans.iter().map(|s| s.size).sum()
    }

    /// Resolve every volume to an absolute byte size against `total_capacity`.
    pub fn resolve_volumes(&self, total_capacity: u64) -> Result<Vec<ResolvedVolume>, ConfigError> {
        let mut seen = BTreeSet::new();
        let mut percent_total = 0u32;
        let mut out = Vec::with_capacity(self.volumes.len());

        for vol in &self.volumes {
            if !seen.insert(vol.id) {
                return Err(ConfigError::DuplicateVolume(vol.id));
            }

            let bytes = match vol.size {
                VolumeSize::Bytes(n) => n,
                VolumeSize::Percent(pct) => {
                    if total_capacity == 0 {
                        return Err(ConfigError::NoCapacity(vol.id));
                    }
                    percent_total += pct as u32;
                    if percent_total > 100 {
                        return Err(ConfigError::OverAllocated(vol.id));
                    }
                    (total_capacity as u128 * pct as u128 / 100) as u64
                }
            };

            out.push(ResolvedVolume {
                id: vol.id,
                cache_type: vol.cache_type.clone(),
                bytes,
            });
        }

        Ok(out)
    }
}
