//! Peer core: the object/lease state machine (spec §4.1).
//!
//! Grounded line-for-line on `original_source/fruina/core/peer.py::Peer`:
//! same operation table, same tie-breaks (unknown-lease release is a
//! no-op, expired leases are swept lazily at the head of `acquire`, seal
//! is idempotent on the object but still checked against the lease's own
//! access type).

use crate::blob::{Blob, Handle};
use crate::error::{Error, Result};
use crate::ids::{LeaseId, ObjectId};
use crate::lease::{AccessType, Lease};
use crate::object::{Object, ObjectState};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// What a successful `acquire` hands back to the caller: enough to
/// reconstruct a client-side view without the caller touching the peer's
/// internal tables again.
pub struct Acquired {
    pub lease_id: LeaseId,
    pub object_id: ObjectId,
    pub access: AccessType,
    pub meta: BTreeMap<String, Value>,
    pub sealed_size: Option<u64>,
    pub handles: Vec<Handle>,
}

/// The contract every peer variant (in-process, shared-filesystem,
/// tiered) speaks (spec §4.1, §6.1). A `&dyn Peer` is itself usable
/// wherever a peer is expected, which is how the tiered peer composes two
/// peers behind one interface (spec §9).
pub trait Peer: Send + Sync {
    fn acquire(
        &self,
        object_id: Option<ObjectId>,
        access: AccessType,
        ttl: Option<Duration>,
        meta: Option<BTreeMap<String, Value>>,
    ) -> Result<Acquired>;

    fn seal(&self, lease_id: LeaseId) -> Result<()>;
    fn discard(&self, lease_id: LeaseId) -> Result<()>;
    fn release(&self, lease_id: LeaseId);
    fn renew(&self, lease_id: LeaseId) -> Result<()>;
}

/// Factory for the Blob backing a newly created object. `FileSystemPeer`
/// and `MemoryPeer` are both this struct with different factories;
/// `fruina-sharedfs` and `fruina-tiered` implement `Peer` independently
/// since their storage model doesn't fit a single in-memory blob table.
pub type BlobFactory = Box<dyn Fn(ObjectId) -> Result<Box<dyn Blob>> + Send + Sync>;

struct State {
    objects: BTreeMap<ObjectId, Object>,
    leases: BTreeMap<LeaseId, Lease>,
}

/// An in-process peer: objects and leases live in a `Mutex`-guarded table,
/// blobs are produced by a pluggable factory (anonymous-memory or plain
/// filesystem, see `backends::{memory,fs}`).
pub struct InProcessPeer {
    blob_factory: BlobFactory,
    state: Mutex<State>,
}

impl InProcessPeer {
    #[must_use]
    pub fn new(blob_factory: BlobFactory) -> Self {
        Self {
            blob_factory,
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                leases: BTreeMap::new(),
            }),
        }
    }

    fn cleanup_expired_leases(state: &mut State) {
        let expired: Vec<LeaseId> = state
            .leases
            .iter()
            .filter(|(_, l)| l.is_expired())
            .map(|(id, _)| *id)
            .collect();
        for lid in expired {
            state.leases.remove(&lid);
        }
    }

    fn get_active_lease<'a>(state: &'a mut State, lease_id: LeaseId) -> Result<&'a Lease> {
        let expired = state
            .leases
            .get(&lease_id)
            .map(Lease::is_expired)
            .unwrap_or(false);
        if expired {
            state.leases.remove(&lease_id);
        }
        state
            .leases
            .get(&lease_id)
            .ok_or(Error::Expired(lease_id))
    }
}

impl Peer for InProcessPeer {
    #[tracing::instrument(skip(self, meta))]
    fn acquire(
        &self,
        object_id: Option<ObjectId>,
        access: AccessType,
        ttl: Option<Duration>,
        meta: Option<BTreeMap<String, Value>>,
    ) -> Result<Acquired> {
        let mut state = self.state.lock().unwrap();
        Self::cleanup_expired_leases(&mut state);

        let object_id = match object_id {
            Some(id) => id,
            None => {
                if matches!(access, AccessType::Read | AccessType::Write) {
                    return Err(Error::Protocol(format!(
                        "cannot acquire {access:?} lease without object_id"
                    )));
                }
                ObjectId::new()
            }
        };

        match access {
            AccessType::Create => {
                if state.objects.contains_key(&object_id) {
                    return Err(Error::Conflict(object_id));
                }
                let blob = (self.blob_factory)(object_id)?;
                let object = Object::new(object_id, vec![blob], meta.unwrap_or_default());
                state.objects.insert(object_id, object);
            }
            AccessType::Read => {
                let object = state.objects.get(&object_id).ok_or(Error::NotFound(object_id))?;
                if !object.is_sealed() {
                    return Err(Error::NotSealed(object_id));
                }
            }
            AccessType::Write => {
                if !state.objects.contains_key(&object_id) {
                    return Err(Error::NotFound(object_id));
                }
            }
        }

        let lease = Lease::new(object_id, access, ttl);
        let lease_id = lease.lease_id();
        state.leases.insert(lease_id, lease);

        let object = state.objects.get(&object_id).expect("object just inserted or verified");
        let handles = object
            .blobs()
            .iter()
            .map(|b| b.handle())
            .collect::<Result<Vec<_>>>()?;

        Ok(Acquired {
            lease_id,
            object_id,
            access,
            meta: object.meta().clone(),
            sealed_size: object.sealed_size(),
            handles,
        })
    }

    #[tracing::instrument(skip(self))]
    fn seal(&self, lease_id: LeaseId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let lease = Self::get_active_lease(&mut state, lease_id)?;
        if lease.access() != AccessType::Create {
            return Err(Error::BadLease(lease_id));
        }
        let object_id = lease.object_id();
        let object = state
            .objects
            .get_mut(&object_id)
            .ok_or(Error::NotFound(object_id))?;
        object.seal()
    }

    #[tracing::instrument(skip(self))]
    fn discard(&self, lease_id: LeaseId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let lease = Self::get_active_lease(&mut state, lease_id)?;
        if !matches!(lease.access(), AccessType::Create | AccessType::Write) {
            return Err(Error::BadLease(lease_id));
        }
        let object_id = lease.object_id();
        if let Some(mut object) = state.objects.remove(&object_id) {
            object.delete()?;
        }
        state.leases.remove(&lease_id);
        Ok(())
    }

    fn release(&self, lease_id: LeaseId) {
        let mut state = self.state.lock().unwrap();
        state.leases.remove(&lease_id);
    }

    fn renew(&self, lease_id: LeaseId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let lease = state.leases.get_mut(&lease_id).ok_or(Error::Expired(lease_id))?;
        lease.renew();
        Ok(())
    }
}

/// `InProcessPeer` backed by `backends::memory::MemoryBlob`.
#[must_use]
pub fn memory_peer() -> InProcessPeer {
    InProcessPeer::new(Box::new(|object_id| {
        Ok(Box::new(crate::backends::memory::MemoryBlob::new(&object_id.to_string())?) as Box<dyn Blob>)
    }))
}

/// `InProcessPeer` backed by `backends::fs::FileBlob`, storing each
/// object's blob file in its own file under `root`.
#[must_use]
pub fn filesystem_peer(root: std::path::PathBuf) -> InProcessPeer {
    InProcessPeer::new(Box::new(move |object_id| {
        let path = root.join(object_id.to_string());
        Ok(Box::new(crate::backends::fs::FileBlob::new(path)?) as Box<dyn Blob>)
    }))
}
