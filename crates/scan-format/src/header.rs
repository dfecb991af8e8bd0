//! Span and stripe headers.

use serde::Serialize;

use crate::le::{put_u16, put_u32, put_u64, u16_at, u32_at, u64_at};
use crate::{
    DecodeError, VersionError, DISK_HEADER_MAGIC, DISK_HEADER_SIZE, MIN_VERSION_MAJOR,
    MIN_VERSION_MINOR, SPAN_BLOCK_HEADER_SIZE, STORE_BLOCK_SIZE, STRIPE_HEADER_SIZE, STRIPE_MAGIC,
};

fn check_len(record: &'static str, raw: &[u8], expected: usize) -> Result<(), DecodeError> {
    if raw.len() != expected {
        return Err(DecodeError::WrongSize {
            record,
            expected,
            actual: raw.len(),
        });
    }
    Ok(())
}

/// Content type a stripe was allocated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CacheType {
    None,
    Http,
    Rtsp,
    Other(u8),
}

impl From<u8> for CacheType {
    fn from(v: u8) -> Self {
        match v {
            0 => CacheType::None,
            1 => CacheType::Http,
            2 => CacheType::Rtsp,
            other => CacheType::Other(other),
        }
    }
}

impl CacheType {
    fn bits(self) -> u32 {
        match self {
            CacheType::None => 0,
            CacheType::Http => 1,
            CacheType::Rtsp => 2,
            CacheType::Other(v) => v as u32 & 0x7,
        }
    }
}

impl std::fmt::Display for CacheType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheType::None => write!(f, "none"),
            CacheType::Http => write!(f, "http"),
            CacheType::Rtsp => write!(f, "rtsp"),
            CacheType::Other(v) => write!(f, "type-{}", v),
        }
    }
}

/// Header copy at the start of each stripe directory generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StripeHeader {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    /// Creation time, seconds since the Unix epoch.
    pub create_time: i64,
    pub write_pos: u64,
    pub last_write_pos: u64,
    pub agg_pos: u64,
    pub generation: u32,
    /// Directory phase the engine was writing when this copy was synced.
    pub phase: bool,
    pub cycle: u32,
    pub sync_serial: u32,
    pub write_serial: u32,
    pub dirty: u32,
    pub sector_size: u32,
}

impl StripeHeader {
    /// Decode and validate the magic of one header copy.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        check_len("stripe", raw, STRIPE_HEADER_SIZE)?;

        let magic = u32_at(raw, 0);
        if magic != STRIPE_MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }

        Ok(Self {
            magic,
            version_major: u16_at(raw, 4),
            version_minor: u16_at(raw, 6),
            create_time: u64_at(raw, 8) as i64,
            write_pos: u64_at(raw, 16),
            last_write_pos: u64_at(raw, 24),
            agg_pos: u64_at(raw, 32),
            generation: u32_at(raw, 40),
            phase: u32_at(raw, 44) != 0,
            cycle: u32_at(raw, 48),
            sync_serial: u32_at(raw, 52),
            write_serial: u32_at(raw, 56),
            dirty: u32_at(raw, 60),
            sector_size: u32_at(raw, 64),
        })
    }

    pub fn encode(&self) -> [u8; STRIPE_HEADER_SIZE] {
        let mut out = [0u8; STRIPE_HEADER_SIZE];
        put_u32(&mut out, 0, self.magic);
        put_u16(&mut out, 4, self.version_major);
        put_u16(&mut out, 6, self.version_minor);
        put_u64(&mut out, 8, self.create_time as u64);
        put_u64(&mut out, 16, self.write_pos);
        put_u64(&mut out, 24, self.last_write_pos);
        put_u64(&mut out, 32, self.agg_pos);
        put_u32(&mut out, 40, self.generation);
        put_u32(&mut out, 44, self.phase as u32);
        put_u32(&mut out, 48, self.cycle);
        put_u32(&mut out, 52, self.sync_serial);
        put_u32(&mut out, 56, self.write_serial);
        put_u32(&mut out, 60, self.dirty);
        put_u32(&mut out, 64, self.sector_size);
        out
    }

    /// Reject stripes written by a format older than 24.0.
    pub fn check_version(&self) -> Result<(), VersionError> {
        if (self.version_major, self.version_minor) < (MIN_VERSION_MAJOR, MIN_VERSION_MINOR) {
            return Err(VersionError {
                major: self.version_major,
                minor: self.version_minor,
                min_major: MIN_VERSION_MAJOR,
                min_minor: MIN_VERSION_MINOR,
            });
        }
        Ok(())
    }

    pub fn version(&self) -> String {
        format!("{}.{}", self.version_major, self.version_minor)
    }
}

/// Span header found at [`crate::DISK_HEADER_OFFSET`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiskHeader {
    pub volumes: u32,
    pub free: u32,
    pub used: u32,
    /// Number of span block headers that follow.
    pub diskvol_blocks: u32,
    pub blocks: u64,
}

impl DiskHeader {
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        check_len("disk", raw, DISK_HEADER_SIZE)?;

        let magic = u32_at(raw, 0);
        if magic != DISK_HEADER_MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }

        Ok(Self {
            volumes: u32_at(raw, 4),
            free: u32_at(raw, 8),
            used: u32_at(raw, 12),
            diskvol_blocks: u32_at(raw, 16),
            blocks: u64_at(raw, 24),
        })
    }

    pub fn encode(&self) -> [u8; DISK_HEADER_SIZE] {
        let mut out = [0u8; DISK_HEADER_SIZE];
        put_u32(&mut out, 0, DISK_HEADER_MAGIC);
        put_u32(&mut out, 4, self.volumes);
        put_u32(&mut out, 8, self.free);
        put_u32(&mut out, 12, self.used);
        put_u32(&mut out, 16, self.diskvol_blocks);
        put_u64(&mut out, 24, self.blocks);
        out
    }
}

/// Placement of one stripe inside a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpanBlockHeader {
    /// Byte offset of the stripe from the start of the span.
    pub offset: u64,
    /// Stripe length in store blocks.
    pub length: u64,
    /// Volume number the stripe belongs to.
    pub number: i32,
    pub cache_type: CacheType,
    pub free: bool,
}

impl SpanBlockHeader {
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        check_len("span block", raw, SPAN_BLOCK_HEADER_SIZE)?;

        let type_free = u32_at(raw, 20);
        Ok(Self {
            offset: u64_at(raw, 0),
            length: u64_at(raw, 8),
            number: u32_at(raw, 16) as i32,
            cache_type: CacheType::from((type_free & 0x7) as u8),
            free: type_free & 0x8 != 0,
        })
    }

    pub fn encode(&self) -> [u8; SPAN_BLOCK_HEADER_SIZE] {
        let mut out = [0u8; SPAN_BLOCK_HEADER_SIZE];
        put_u64(&mut out, 0, self.offset);
        put_u64(&mut out, 8, self.length);
        put_u32(&mut out, 16, self.number as u32);
        put_u32(&mut out, 20, self.cache_type.bits() | ((self.free as u32) << 3));
        out
    }

    /// Stripe length in bytes.
    pub fn byte_len(&self) -> u64 {
        self.length.saturating_mul(STORE_BLOCK_SIZE)
    }
}
