//! The wire protocol (spec §6.3): four verbs as length-prefixed JSON
//! messages over a local stream socket.
//!
//! Grounded on `original_source/packice/transport/uds.py`'s request/response
//! dictionaries (`{"command": ..., ...}` / `{"status": ..., ...}`), but
//! framed with an explicit `u32` big-endian length prefix rather than
//! relying on a single `recv(4096)` — the spec requires a real frame
//! boundary, not a size guess.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

/// One of the three access intents a caller can request over the wire.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Create,
    Read,
    Write,
}

impl From<Intent> for fruina_core::lease::AccessType {
    fn from(intent: Intent) -> Self {
        match intent {
            Intent::Create => Self::Create,
            Intent::Read => Self::Read,
            Intent::Write => Self::Write,
        }
    }
}

impl From<fruina_core::lease::AccessType> for Intent {
    fn from(access: fruina_core::lease::AccessType) -> Self {
        match access {
            fruina_core::lease::AccessType::Create => Self::Create,
            fruina_core::lease::AccessType::Read => Self::Read,
            fruina_core::lease::AccessType::Write => Self::Write,
        }
    }
}

/// A path-typed or shared-FS-typed handle as it appears in a response's
/// `handles` array (spec §6.3: "Path-typed handles travel in the JSON
/// body"). File-descriptor handles never appear here — they travel in the
/// socket's ancillary data instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireHandle {
    Path(String),
    SharedFs {
        #[serde(rename = "type")]
        kind: String,
        path: String,
        data_offset: u64,
    },
}

/// A request frame's body, tagged on `verb` exactly as the four verbs are
/// named in spec §6.3.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum Request {
    Acquire {
        #[serde(skip_serializing_if = "Option::is_none")]
        object_id: Option<String>,
        intent: Intent,
        #[serde(skip_serializing_if = "Option::is_none")]
        ttl_seconds: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        meta: Option<BTreeMap<String, Value>>,
    },
    Seal {
        lease_id: String,
    },
    Discard {
        lease_id: String,
    },
    Release {
        lease_id: String,
    },
    Renew {
        lease_id: String,
    },
}

/// A response frame's body. `Ok` covers every verb: `acquire` populates
/// every optional field, the other three leave them `None` (and therefore
/// absent from the serialized JSON).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        lease_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        object_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        intent: Option<Intent>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ttl_seconds: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        meta: Option<BTreeMap<String, Value>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        handles: Option<Vec<WireHandle>>,
    },
    Error {
        message: String,
    },
}

impl Response {
    #[must_use]
    pub fn plain_ok() -> Self {
        Self::Ok {
            lease_id: None,
            object_id: None,
            intent: None,
            ttl_seconds: None,
            meta: None,
            handles: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Writes one length-prefixed frame: a 4-byte big-endian length followed by
/// `payload`. Used for request frames and for fd-less response frames; the
/// FD-carrying acquire response is framed the same way but sent through
/// `uds::sendmsg_with_fds` so the ancillary data rides along with it.
pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(payload)?;
    Ok(())
}

/// Reads one length-prefixed frame's raw bytes.
pub fn read_frame<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Builds one frame (length prefix + payload) in a single buffer, for
/// callers that need the whole thing as one slice (the FD-carrying acquire
/// response, sent through a single `sendmsg` so the ancillary data lands on
/// the same read as the length prefix).
pub fn encode_frame(payload: &[u8]) -> io::Result<Vec<u8>> {
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
