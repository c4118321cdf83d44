use crate::blob::Blob;
use crate::error::Result;
use crate::ids::ObjectId;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ObjectState {
    Creating,
    Sealed,
}

/// Identity + state + backing blobs + opaque metadata (spec §3).
pub struct Object {
    object_id: ObjectId,
    blobs: Vec<Box<dyn Blob>>,
    meta: BTreeMap<String, Value>,
    state: ObjectState,
    sealed_size: Option<u64>,
}

impl Object {
    pub(crate) fn new(
        object_id: ObjectId,
        blobs: Vec<Box<dyn Blob>>,
        meta: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            object_id,
            blobs,
            meta,
            state: ObjectState::Creating,
            sealed_size: None,
        }
    }

    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    #[must_use]
    pub fn state(&self) -> ObjectState {
        self.state
    }

    #[must_use]
    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    #[must_use]
    pub fn sealed_size(&self) -> Option<u64> {
        self.sealed_size
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.state == ObjectState::Sealed
    }

    #[must_use]
    pub fn blobs(&self) -> &[Box<dyn Blob>] {
        &self.blobs
    }

    pub fn blobs_mut(&mut self) -> &mut [Box<dyn Blob>] {
        &mut self.blobs
    }

    /// Freezes the object's bytes. Idempotent on the object itself — a
    /// second seal through a still-valid CREATE lease on an already-sealed
    /// object is a success no-op (spec §4.1 tie-break); the peer, not this
    /// method, decides whether the *lease* is still allowed to call it.
    pub(crate) fn seal(&mut self) -> Result<()> {
        if self.state == ObjectState::Sealed {
            return Ok(());
        }
        let mut total = 0u64;
        for blob in &mut self.blobs {
            blob.seal()?;
            total += blob.len()?;
        }
        self.sealed_size = Some(total);
        self.state = ObjectState::Sealed;
        Ok(())
    }

    pub(crate) fn delete(&mut self) -> Result<()> {
        for blob in &mut self.blobs {
            blob.delete()?;
        }
        Ok(())
    }
}
