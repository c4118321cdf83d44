//! The client facade (spec §6.1).
//!
//! Grounded on `original_source/packice/interface/client.py::Client` and
//! its module-level `connect()` helper. `Client` itself is a thin wrapper
//! over `Arc<dyn Peer>` — it works identically whether that peer is
//! in-process (`fruina_core::peer::{memory_peer, filesystem_peer}`), a
//! shared-filesystem peer, a tiered peer, or `fruina_transport::UdsClient`
//! talking to a remote process, since all four satisfy the same `Peer`
//! trait (spec §9: "Peer... as objects satisfying an interface").

use crate::object::Object;
use fruina_core::error::Result;
use fruina_core::ids::ObjectId;
use fruina_core::lease::AccessType;
use fruina_core::peer::{memory_peer, Peer};
use fruina_core::registry;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Thin façade over a peer (spec §6.1). Cheap to clone: internally just an
/// `Arc<dyn Peer>`.
#[derive(Clone)]
pub struct Client {
    peer: Arc<dyn Peer>,
}

impl Client {
    #[must_use]
    pub fn new(peer: Arc<dyn Peer>) -> Self {
        Self { peer }
    }

    #[must_use]
    pub fn peer(&self) -> &Arc<dyn Peer> {
        &self.peer
    }

    fn acquire(
        &self,
        object_id: Option<ObjectId>,
        access: AccessType,
        ttl: Option<Duration>,
        meta: Option<BTreeMap<String, Value>>,
    ) -> Result<Object> {
        let acquired = self.peer.acquire(object_id, access, ttl, meta)?;
        Object::new(
            self.peer.clone(),
            acquired.lease_id,
            acquired.object_id,
            acquired.access,
            acquired.meta,
            acquired.sealed_size,
            acquired
                .handles
                .into_iter()
                .next()
                .ok_or_else(|| fruina_core::error::Error::Protocol("acquire returned no handles".into()))?,
        )
    }

    /// Creates a new object. If `size` is given, truncates the freshly
    /// allocated blob to that size immediately (spec §6.1).
    pub fn create(&self, size: Option<u64>, meta: Option<BTreeMap<String, Value>>) -> Result<Object> {
        self.create_with_ttl(None, size, meta, None)
    }

    /// As [`Client::create`], but with an explicit `object_id` and lease
    /// TTL — the full generality `acquire(CREATE)` exposes at the peer
    /// layer (spec §4.1).
    pub fn create_with_ttl(
        &self,
        object_id: Option<ObjectId>,
        size: Option<u64>,
        meta: Option<BTreeMap<String, Value>>,
        ttl: Option<Duration>,
    ) -> Result<Object> {
        let mut obj = self.acquire(object_id, AccessType::Create, ttl, meta)?;
        if let Some(size) = size {
            obj.truncate(size)?;
        }
        Ok(obj)
    }

    /// Gets an existing, sealed object for reading (spec §6.1).
    pub fn get(&self, object_id: ObjectId) -> Result<Object> {
        self.acquire(Some(object_id), AccessType::Read, None, None)
    }

    /// Deletes an object: acquires a WRITE lease, then discards it (spec
    /// §6.1).
    pub fn delete(&self, object_id: ObjectId) -> Result<()> {
        let obj = self.acquire(Some(object_id), AccessType::Write, None, None)?;
        obj.discard()
    }

    /// Scoped acquisition: `f` runs with the freshly acquired object and
    /// the lease is released on every exit path — normal return, `Err`
    /// return, or unwind — via `Object`'s `Drop` impl (spec §6.1: "Object
    /// also supports scoped acquisition with guaranteed release on all
    /// exit paths").
    pub fn with_object<F, R>(
        &self,
        object_id: Option<ObjectId>,
        access: AccessType,
        ttl: Option<Duration>,
        meta: Option<BTreeMap<String, Value>>,
        f: F,
    ) -> Result<R>
    where
        F: FnOnce(&mut Object) -> Result<R>,
    {
        let mut obj = self.acquire(object_id, access, ttl, meta)?;
        f(&mut obj)
    }
}

/// Connects to a peer by address, mirroring `packice.interface.client.
/// connect`:
///
/// - `None` — a fresh, isolated in-memory peer.
/// - `Some("memory://name")` — a named peer shared within this process,
///   backed by [`fruina_core::registry`] (`"memory://"` alone means
///   `"default"`, matching the Python original).
/// - `Some(path)` — any other string is a local-socket path, connected to
///   via [`fruina_transport::UdsClient`].
#[must_use]
pub fn connect(target: Option<&str>) -> Client {
    let Some(target) = target else {
        return Client::new(Arc::new(memory_peer()));
    };
    if let Some(name) = target.strip_prefix("memory://") {
        let name = if name.is_empty() { "default" } else { name };
        let peer = registry::get_or_create(name, || Arc::new(memory_peer()));
        return Client::new(peer);
    }
    Client::new(Arc::new(fruina_transport::UdsClient::new(Path::new(target))))
}

/// Connects directly to an already-constructed peer (in-process, shared
/// filesystem, tiered, or otherwise), skipping the address-parsing
/// convenience of [`connect`].
#[must_use]
pub fn connect_peer(peer: Arc<dyn Peer>) -> Client {
    Client::new(peer)
}
