//! The client-visible object handle (spec §6.1).
//!
//! Grounded on `original_source/packice/interface/client.py::Object`: a
//! thin wrapper tying a lease to its reconstructed blob view, with
//! `seal`/`discard`/`release` forwarding to the peer and a guaranteed
//! release on every exit path (the `__enter__`/`__exit__` context-manager
//! parity, supplemented per SPEC_FULL.md §11).

use crate::view;
use fruina_core::blob::{BlobView, Handle};
use fruina_core::error::{Error, Result};
use fruina_core::ids::{LeaseId, ObjectId};
use fruina_core::lease::AccessType;
use fruina_core::peer::Peer;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::sync::Arc;

/// A live lease on one object, plus its reconstructed data-plane view.
/// Releases its lease on drop regardless of how the scope is exited (spec
/// §7: "the client's `Object` guarantees that `close()` always runs").
pub struct Object {
    peer: Arc<dyn Peer>,
    lease_id: LeaseId,
    object_id: ObjectId,
    access: AccessType,
    meta: BTreeMap<String, Value>,
    sealed_size: Option<u64>,
    handle: Handle,
    view: Option<Box<dyn BlobView>>,
    released: bool,
}

impl Object {
    pub(crate) fn new(
        peer: Arc<dyn Peer>,
        lease_id: LeaseId,
        object_id: ObjectId,
        access: AccessType,
        meta: BTreeMap<String, Value>,
        sealed_size: Option<u64>,
        handle: Handle,
    ) -> Result<Self> {
        let writable = matches!(access, AccessType::Create);
        let view = view::from_handle(handle.clone(), writable)?;
        Ok(Self {
            peer,
            lease_id,
            object_id,
            access,
            meta,
            sealed_size,
            handle,
            view: Some(view),
            released: false,
        })
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.object_id
    }

    #[must_use]
    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }

    #[must_use]
    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    /// Looks up a single metadata key, mirroring `Object.get_meta`.
    #[must_use]
    pub fn get_meta(&self, key: &str) -> Option<&Value> {
        self.meta.get(key)
    }

    #[must_use]
    pub fn sealed_size(&self) -> Option<u64> {
        self.sealed_size
    }

    /// The mapped memory region: read-write for a CREATE lease, read-only
    /// otherwise (spec §6.1).
    pub fn buffer(&mut self) -> Result<&[u8]> {
        let writable = matches!(self.access, AccessType::Create);
        self.view_mut()?.memory_region(writable)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.view_mut()?.write(data)
    }

    pub fn truncate(&mut self, size: u64) -> Result<()> {
        self.view_mut()?.truncate(size)
    }

    fn view_mut(&mut self) -> Result<&mut Box<dyn BlobView>> {
        self.view
            .as_mut()
            .ok_or_else(|| Error::Protocol("object already closed".into()))
    }

    /// Duplicates the underlying handle into an independent, buffered
    /// `std::fs::File`, for callers that want ordinary file I/O instead of
    /// the raw mapped buffer (spec §11, supplemented from
    /// `packice/interface/client.py::Object.open`).
    pub fn open_file(&self) -> Result<File> {
        let writable = matches!(self.access, AccessType::Create);
        match &self.handle {
            Handle::FileDescriptor { fd } => {
                let dup = fruina_core::fdutil::dup(*fd)?;
                Ok(File::from(dup))
            }
            Handle::FilesystemPath { path } => Ok(OpenOptions::new()
                .read(true)
                .write(writable)
                .open(path)?),
            Handle::SharedFs { path, data_offset } => {
                let mut file = OpenOptions::new().read(true).write(writable).open(path)?;
                file.seek(SeekFrom::Start(*data_offset))?;
                Ok(file)
            }
        }
    }

    /// Flushes and unmaps the client view, then seals the object on the
    /// peer (spec §6.1: "flushes and unmaps the client view before
    /// forwarding").
    pub fn seal(&mut self) -> Result<()> {
        if let Some(view) = self.view.as_mut() {
            view.seal()?;
        }
        self.peer.seal(self.lease_id)
    }

    /// Deletes the object by discarding this CREATE/WRITE lease (spec
    /// §6.1's `delete` helper routes through here via `Client::delete`).
    pub fn discard(mut self) -> Result<()> {
        self.close_view();
        let result = self.peer.discard(self.lease_id);
        self.released = true;
        result
    }

    /// Releases the lease without touching the object (spec: "terminate a
    /// lease without touching the object").
    pub fn close(mut self) {
        self.close_view();
        self.peer.release(self.lease_id);
        self.released = true;
    }

    fn close_view(&mut self) {
        if let Some(mut view) = self.view.take() {
            let _ = view.close();
        }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        if !self.released {
            self.close_view();
            self.peer.release(self.lease_id);
            self.released = true;
        }
    }
}
