//! The 32-byte framed file header (spec §4.2.3, §6.2).
//!
//! Grounded on `original_source/fruina/backends/shared_fs.py`'s
//! `HEADER_STRUCT = struct.Struct("!8sHBIxQQ")`: magic, version, flags,
//! TTL-in-milliseconds, one reserved/padding byte, metadata length, data
//! offset — all network byte order (big-endian).

use fruina_core::error::{Error, Result};
use std::collections::BTreeMap;

pub const MAGIC: [u8; 8] = *b"FRUINA!!";
pub const HEADER_SIZE: u64 = 32;
pub const ALIGNMENT: u64 = 4096;
pub const FLAG_SEALED: u8 = 0x01;
pub const CURRENT_VERSION: u16 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub flags: u8,
    pub ttl_ms: u32,
    pub meta_len: u64,
    pub data_offset: u64,
}

impl Header {
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.flags & FLAG_SEALED != 0
    }

    /// Packs the header into its fixed 32-byte wire representation.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_be_bytes());
        buf[10] = self.flags;
        buf[11..15].copy_from_slice(&self.ttl_ms.to_be_bytes());
        // buf[15] is the reserved/padding byte ("x" in the Python format).
        buf[16..24].copy_from_slice(&self.meta_len.to_be_bytes());
        buf[24..32].copy_from_slice(&self.data_offset.to_be_bytes());
        buf
    }

    /// Parses a 32-byte header, rejecting anything whose magic doesn't match.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(Error::Protocol("shared-fs header truncated".into()));
        }
        if buf[0..8] != MAGIC {
            return Err(Error::Protocol("shared-fs header magic mismatch".into()));
        }
        let version = u16::from_be_bytes(buf[8..10].try_into().unwrap());
        let flags = buf[10];
        let ttl_ms = u32::from_be_bytes(buf[11..15].try_into().unwrap());
        let meta_len = u64::from_be_bytes(buf[16..24].try_into().unwrap());
        let data_offset = u64::from_be_bytes(buf[24..32].try_into().unwrap());
        Ok(Self {
            version,
            flags,
            ttl_ms,
            meta_len,
            data_offset,
        })
    }
}

/// Computes the 4096-aligned data offset for a metadata block of
/// `meta_len` bytes, matching
/// `data_offset = (raw_header_size + ALIGNMENT - 1) & ~(ALIGNMENT - 1)`.
#[must_use]
pub fn aligned_data_offset(meta_len: u64) -> u64 {
    let raw = HEADER_SIZE + meta_len;
    (raw + ALIGNMENT - 1) / ALIGNMENT * ALIGNMENT
}

/// Serializes `meta` to JSON for the metadata block.
pub fn encode_meta(meta: &BTreeMap<String, serde_json::Value>) -> Result<Vec<u8>> {
    serde_json::to_vec(meta).map_err(|e| Error::Protocol(e.to_string()))
}

/// Parses the metadata block back into a map. An empty block decodes to an
/// empty map rather than an error, matching the Python backend's
/// `get_meta`'s `{}` default.
pub fn decode_meta(bytes: &[u8]) -> Result<BTreeMap<String, serde_json::Value>> {
    if bytes.is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_slice(bytes).map_err(|e| Error::Protocol(e.to_string()))
}

/// Extracts `meta["ttl"]` in seconds, if present and numeric, matching
/// `SharedFSPeer.seal`'s `meta.get('ttl')` lookup.
#[must_use]
pub fn object_ttl_seconds(meta: &BTreeMap<String, serde_json::Value>) -> Option<f64> {
    meta.get("ttl").and_then(serde_json::Value::as_f64)
}
