//! Composite hot/cold peer with LRU eviction (spec §4.4).
//!
//! Grounded on `original_source/fruina/peers/tiered.py::TieredPeer`: try
//! hot then cold on read/write, always create in hot, evict
//! least-recently-used objects to cold once hot is at capacity. The
//! Python original reaches into `hot.leases[lease_id]` directly to learn
//! a lease's object id for LRU bookkeeping, which only works because of
//! duck typing; `Peer` here returns `Acquired` (with `object_id`) from
//! every acquire, so this port tracks `lease_id -> (object_id, tier)`
//! itself instead of reaching into the composed peers' private state
//! (documented as an Open Question resolution in `DESIGN.md`).

use fruina_core::blob::Handle;
use fruina_core::error::{Error, Result};
use fruina_core::ids::{LeaseId, ObjectId};
use fruina_core::lease::AccessType;
use fruina_core::peer::{Acquired, Peer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum Tier {
    Hot,
    Cold,
}

struct Inner {
    /// Front = least recently used, back = most recently used (spec §4.4).
    lru: VecDeque<ObjectId>,
    lease_tier: HashMap<LeaseId, (ObjectId, Tier)>,
}

/// Composite peer: an LRU-bounded hot tier backed by `hot`, overflowing
/// into an unbounded cold tier backed by `cold`. No cold->hot read
/// promotion (spec §9, resolved Open Question).
pub struct TieredPeer {
    hot: Box<dyn Peer>,
    cold: Box<dyn Peer>,
    max_items: usize,
    inner: Mutex<Inner>,
}

impl TieredPeer {
    #[must_use]
    pub fn new(hot: Box<dyn Peer>, cold: Box<dyn Peer>, max_items: usize) -> Self {
        assert!(max_items > 0, "a tiered peer needs hot capacity for at least one object");
        Self {
            hot,
            cold,
            max_items,
            inner: Mutex::new(Inner {
                lru: VecDeque::new(),
                lease_tier: HashMap::new(),
            }),
        }
    }

    /// Snapshot of the object ids currently resident in the hot tier, in
    /// LRU order (front = least recently used). Exposed for tests and
    /// diagnostics.
    #[must_use]
    pub fn hot_ids(&self) -> Vec<ObjectId> {
        self.inner.lock().unwrap().lru.iter().copied().collect()
    }

    fn touch(lru: &mut VecDeque<ObjectId>, object_id: ObjectId) {
        if let Some(pos) = lru.iter().position(|id| *id == object_id) {
            lru.remove(pos);
        }
        lru.push_back(object_id);
    }

    fn ensure_capacity(&self, inner: &mut Inner) -> Result<()> {
        while inner.lru.len() >= self.max_items {
            let victim = inner.lru.pop_front().expect("len >= max_items > 0");
            self.evict_to_cold(victim, inner)?;
        }
        Ok(())
    }

    /// Moves one object's bytes from hot to cold, then drops it from hot.
    /// Runs synchronously on the create path (spec §4.4, "backpressure on
    /// creates"); the caller already holds `inner`'s lock, so concurrent
    /// creates serialize here.
    fn evict_to_cold(&self, object_id: ObjectId, inner: &mut Inner) -> Result<()> {
        let read = match self.hot.acquire(Some(object_id), AccessType::Read, None, None) {
            Ok(acquired) => acquired,
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let bytes = read_handle_bytes(&read.handles[0])?;
        self.hot.release(read.lease_id);

        let created = self.cold.acquire(
            Some(object_id),
            AccessType::Create,
            None,
            Some(read.meta.clone()),
        )?;
        write_handle_bytes(&created.handles[0], &bytes)?;
        self.cold.seal(created.lease_id)?;
        self.cold.release(created.lease_id);

        let write = self.hot.acquire(Some(object_id), AccessType::Write, None, None)?;
        self.hot.discard(write.lease_id)?;

        inner.lease_tier.retain(|_, (id, tier)| !(*id == object_id && *tier == Tier::Hot));
        Ok(())
    }

    fn route_read_write(
        &self,
        object_id: Option<ObjectId>,
        access: AccessType,
        ttl: Option<Duration>,
        meta: Option<BTreeMap<String, Value>>,
        inner: &mut Inner,
    ) -> Result<Acquired> {
        match self.hot.acquire(object_id, access, ttl, meta.clone()) {
            Ok(acquired) => {
                Self::touch(&mut inner.lru, acquired.object_id);
                inner
                    .lease_tier
                    .insert(acquired.lease_id, (acquired.object_id, Tier::Hot));
                return Ok(acquired);
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let acquired = self.cold.acquire(object_id, access, ttl, meta)?;
        inner
            .lease_tier
            .insert(acquired.lease_id, (acquired.object_id, Tier::Cold));
        Ok(acquired)
    }
}

impl Peer for TieredPeer {
    #[tracing::instrument(skip(self, meta))]
    fn acquire(
        &self,
        object_id: Option<ObjectId>,
        access: AccessType,
        ttl: Option<Duration>,
        meta: Option<BTreeMap<String, Value>>,
    ) -> Result<Acquired> {
        let mut inner = self.inner.lock().unwrap();
        match access {
            AccessType::Read | AccessType::Write => {
                self.route_read_write(object_id, access, ttl, meta, &mut inner)
            }
            AccessType::Create => {
                self.ensure_capacity(&mut inner)?;
                let acquired = self.hot.acquire(object_id, access, ttl, meta)?;
                Self::touch(&mut inner.lru, acquired.object_id);
                inner
                    .lease_tier
                    .insert(acquired.lease_id, (acquired.object_id, Tier::Hot));
                Ok(acquired)
            }
        }
    }

    fn seal(&self, lease_id: LeaseId) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        match inner.lease_tier.get(&lease_id) {
            Some((_, Tier::Hot)) => self.hot.seal(lease_id),
            Some((_, Tier::Cold)) => self.cold.seal(lease_id),
            None => self.hot.seal(lease_id).or_else(|_| self.cold.seal(lease_id)),
        }
    }

    fn discard(&self, lease_id: LeaseId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let tier = inner.lease_tier.get(&lease_id).copied();
        match tier {
            Some((object_id, Tier::Hot)) => {
                self.hot.discard(lease_id)?;
                inner.lease_tier.remove(&lease_id);
                if let Some(pos) = inner.lru.iter().position(|id| *id == object_id) {
                    inner.lru.remove(pos);
                }
                Ok(())
            }
            Some((_, Tier::Cold)) => {
                self.cold.discard(lease_id)?;
                inner.lease_tier.remove(&lease_id);
                Ok(())
            }
            None => {
                self.hot.discard(lease_id).or_else(|_| self.cold.discard(lease_id))
            }
        }
    }

    fn release(&self, lease_id: LeaseId) {
        self.hot.release(lease_id);
        self.cold.release(lease_id);
        self.inner.lock().unwrap().lease_tier.remove(&lease_id);
    }

    fn renew(&self, lease_id: LeaseId) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        match inner.lease_tier.get(&lease_id) {
            Some((_, Tier::Hot)) => self.hot.renew(lease_id),
            Some((_, Tier::Cold)) => self.cold.renew(lease_id),
            None => self.hot.renew(lease_id).or_else(|_| self.cold.renew(lease_id)),
        }
    }
}

/// Reads a handle's full byte content in-process, for eviction's hot->cold
/// copy. Mirrors what a client-side `BlobView` does when reconstructing a
/// blob from a handle (`fruina-transport`/`fruina-client`), duplicated
/// locally here since the tiered peer composes two same-process peers and
/// has no transport boundary to cross.
fn read_handle_bytes(handle: &Handle) -> Result<Vec<u8>> {
    use std::io::{Read, Seek, SeekFrom};
    match handle {
        Handle::FileDescriptor { fd } => {
            use std::os::fd::FromRawFd;
            let mut file = unsafe { std::fs::File::from_raw_fd(*fd) };
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            Ok(buf)
        }
        Handle::FilesystemPath { path } => Ok(std::fs::read(path)?),
        Handle::SharedFs { path, data_offset } => {
            let mut file = std::fs::File::open(path)?;
            file.seek(SeekFrom::Start(*data_offset))?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Writes `data` through a handle, for eviction's hot->cold copy.
fn write_handle_bytes(handle: &Handle, data: &[u8]) -> Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    match handle {
        Handle::FileDescriptor { fd } => {
            use std::os::fd::FromRawFd;
            let mut file = unsafe { std::fs::File::from_raw_fd(*fd) };
            file.write_all(data)?;
            Ok(())
        }
        Handle::FilesystemPath { path } => {
            std::fs::write(path, data)?;
            Ok(())
        }
        Handle::SharedFs { path, data_offset } => {
            let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
            file.seek(SeekFrom::Start(*data_offset))?;
            file.write_all(data)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fruina_core::peer::{filesystem_peer, memory_peer};
    use tempfile::tempdir;

    fn small_tiered(max_items: usize) -> (TieredPeer, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let hot = Box::new(memory_peer());
        let cold = Box::new(filesystem_peer(dir.path().to_path_buf()));
        (TieredPeer::new(hot, cold, max_items), dir)
    }

    #[test]
    fn eviction_moves_oldest_object_to_cold() {
        let (tiered, _dir) = small_tiered(2);

        let mut ids = Vec::new();
        for payload in [b"one".as_slice(), b"two", b"three"] {
            let created = tiered.acquire(None, AccessType::Create, None, None).unwrap();
            write_handle_bytes(&created.handles[0], payload).unwrap();
            tiered.seal(created.lease_id).unwrap();
            tiered.release(created.lease_id);
            ids.push(created.object_id);
        }

        let hot = tiered.hot_ids();
        assert_eq!(hot, vec![ids[1], ids[2]]);

        let read = tiered.acquire(Some(ids[0]), AccessType::Read, None, None).unwrap();
        assert_eq!(read_handle_bytes(&read.handles[0]).unwrap(), b"one");
    }

    #[test]
    fn read_after_eviction_does_not_promote_to_hot() {
        let (tiered, _dir) = small_tiered(1);
        let first = tiered.acquire(None, AccessType::Create, None, None).unwrap();
        write_handle_bytes(&first.handles[0], b"first").unwrap();
        tiered.seal(first.lease_id).unwrap();
        tiered.release(first.lease_id);

        let second = tiered.acquire(None, AccessType::Create, None, None).unwrap();
        write_handle_bytes(&second.handles[0], b"second").unwrap();
        tiered.seal(second.lease_id).unwrap();
        tiered.release(second.lease_id);

        // first.object_id was evicted to cold by the second create.
        let read = tiered.acquire(Some(first.object_id), AccessType::Read, None, None).unwrap();
        tiered.release(read.lease_id);

        assert_eq!(tiered.hot_ids(), vec![second.object_id]);
    }

    #[test]
    fn read_of_unknown_object_is_not_found() {
        let (tiered, _dir) = small_tiered(4);
        let err = tiered
            .acquire(Some(ObjectId::new()), AccessType::Read, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn cold_tier_can_be_a_shared_fs_peer() {
        let dir = tempdir().unwrap();
        let hot = Box::new(memory_peer());
        let cold = Box::new(fruina_sharedfs::SharedFsPeer::new(dir.path()).unwrap());
        let tiered = TieredPeer::new(hot, cold, 1);

        let first = tiered.acquire(None, AccessType::Create, Some(Duration::from_secs(60)), None).unwrap();
        write_handle_bytes(&first.handles[0], b"first").unwrap();
        tiered.seal(first.lease_id).unwrap();
        tiered.release(first.lease_id);

        let second = tiered.acquire(None, AccessType::Create, Some(Duration::from_secs(60)), None).unwrap();
        write_handle_bytes(&second.handles[0], b"second").unwrap();
        tiered.seal(second.lease_id).unwrap();
        tiered.release(second.lease_id);

        let read = tiered.acquire(Some(first.object_id), AccessType::Read, None, None).unwrap();
        assert_eq!(read_handle_bytes(&read.handles[0]).unwrap(), b"first");
        tiered.release(read.lease_id);
    }

    #[test]
    fn seal_via_read_lease_fails_bad_lease() {
        let (tiered, _dir) = small_tiered(4);
        let created = tiered.acquire(None, AccessType::Create, None, None).unwrap();
        tiered.seal(created.lease_id).unwrap();
        let read = tiered
            .acquire(Some(created.object_id), AccessType::Read, None, None)
            .unwrap();
        let err = tiered.seal(read.lease_id).unwrap_err();
        assert!(matches!(err, Error::BadLease(_)));
    }
}
