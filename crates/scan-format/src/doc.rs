use serde::Serialize;

use crate::le::{put_u32, put_u64, u32_at, u64_at};
use crate::{DecodeError, DOC_CORRUPT_MAGIC, DOC_HEADER_SIZE, DOC_MAGIC};

/// The four 64-bit content keys carried by a `Doc`.
///
/// `0` identifies the base object (shared by all alternates of a URL);
/// the rest distinguish alternates and earliest-fragment lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DocKey(pub [u64; 4]);

impl DocKey {
    /// Key of the base object.
    #[inline]
    pub fn base(&self) -> u64 {
        self.0[0]
    }

    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(32);
        for k in self.0 {
            bytes.extend_from_slice(&k.to_le_bytes());
        }
        hex::encode(bytes)
    }
}

impl std::fmt::Display for DocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Fixed header preceding every stored fragment.
///
/// Only produced by [`Doc::decode`] after the magic has been validated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Doc {
    pub magic: u32,
    /// Length of this fragment, header and header blob included.
    pub length: u32,
    /// Length of the whole object across all fragments (payload only).
    pub total_length: u64,
    pub keys: DocKey,
    /// Bytes of stored protocol header following this header.
    pub hlen: u32,
    pub doc_type: u8,
    pub version_major: u8,
    pub version_minor: u8,
    pub sync_serial: u32,
    pub write_serial: u32,
    /// Pin expiry marker (non-zero while pinned).
    pub pinned: u32,
    pub checksum: u32,
}

impl Doc {
    /// Decode a header from exactly [`DOC_HEADER_SIZE`] bytes.
    ///
    /// The magic is checked before any other field is read.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.len() != DOC_HEADER_SIZE {
            return Err(DecodeError::WrongSize {
                record: "doc",
                expected: DOC_HEADER_SIZE,
                actual: raw.len(),
            });
        }

        match u32_at(raw, 0) {
            DOC_MAGIC => {}
            DOC_CORRUPT_MAGIC => return Err(DecodeError::Corrupt),
            other => return Err(DecodeError::BadMagic(other)),
        }

        Ok(Self {
            magic: DOC_MAGIC,
            length: u32_at(raw, 4),
            total_length: u64_at(raw, 8),
            keys: DocKey([
                u64_at(raw, 16),
                u64_at(raw, 24),
                u64_at(raw, 32),
                u64_at(raw, 40),
            ]),
            hlen: u32_at(raw, 48),
            doc_type: raw[52],
            version_major: raw[53],
            version_minor: raw[54],
            sync_serial: u32_at(raw, 56),
            write_serial: u32_at(raw, 60),
            pinned: u32_at(raw, 64),
            checksum: u32_at(raw, 68),
        })
    }

    /// Encode into the on-disk layout.
    pub fn encode(&self) -> [u8; DOC_HEADER_SIZE] {
        let mut out = [0u8; DOC_HEADER_SIZE];
        put_u32(&mut out, 0, self.magic);
        put_u32(&mut out, 4, self.length);
        put_u64(&mut out, 8, self.total_length);
        for (i, k) in self.keys.0.iter().enumerate() {
            put_u64(&mut out, 16 + i * 8, *k);
        }
        put_u32(&mut out, 48, self.hlen);
        out[52] = self.doc_type;
        out[53] = self.version_major;
        out[54] = self.version_minor;
        put_u32(&mut out, 56, self.sync_serial);
        put_u32(&mut out, 60, self.write_serial);
        put_u32(&mut out, 64, self.pinned);
        put_u32(&mut out, 68, self.checksum);
        out
    }

    /// Payload bytes carried by this fragment (excluding both headers).
    pub fn payload_len(&self) -> u64 {
        (self.length as u64).saturating_sub(DOC_HEADER_SIZE as u64 + self.hlen as u64)
    }

    pub fn version(&self) -> String {
        format!("{}.{}", self.version_major, self.version_minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Doc {
        Doc {
            magic: DOC_MAGIC,
            length: 4096,
            total_length: 10_000,
            keys: DocKey([1, 2, 3, 4]),
            hlen: 128,
            doc_type: 1,
            version_major: 24,
            version_minor: 2,
            sync_serial: 9,
            write_serial: 10,
            pinned: 0,
            checksum: 0xABCD,
        }
    }

    #[test]
    fn test_decode_valid() {
        let doc = sample();
        let decoded = Doc::decode(&doc.encode()).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(decoded.keys.base(), 1);
        assert_eq!(decoded.payload_len(), 4096 - 72 - 128);
        assert_eq!(decoded.version(), "24.2");
    }

    #[test]
    fn test_wrong_size() {
        let err = Doc::decode(&[0u8; 71]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::WrongSize {
                expected: 72,
                actual: 71,
                ..
            }
        ));
    }

    #[test]
    fn test_corrupt_magic_is_never_bad_magic() {
        let mut raw = sample().encode();
        raw[..4].copy_from_slice(&DOC_CORRUPT_MAGIC.to_le_bytes());
        assert_eq!(Doc::decode(&raw), Err(DecodeError::Corrupt));
        assert_eq!(
            Doc::decode(&raw).unwrap_err().magic(),
            Some(crate::MagicError::Corrupt)
        );
    }

    #[test]
    fn test_bad_magic_carries_value() {
        let mut raw = sample().encode();
        raw[..4].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        assert_eq!(Doc::decode(&raw), Err(DecodeError::BadMagic(0x1234_5678)));
    }

    #[test]
    fn test_key_hex() {
        let key = DocKey([1, 0, 0, 0]);
        let hex = key.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("0100000000000000"));
    }
}
