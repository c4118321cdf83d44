//! The shared-filesystem peer (spec §4.3).
//!
//! Grounded on `original_source/fruina/peers/shared_fs.py::SharedFSPeer`:
//! `leases/` holds in-progress (CREATING) objects, `data/` holds sealed
//! ones, and the rename from one to the other on seal is the publication
//! linearization point another peer process observes (spec §5, ordering
//! guarantee 2).

use crate::blob::SharedFsBlob;
use crate::gc::Gc;
use fruina_core::blob::Blob;
use fruina_core::error::{Error, Result};
use fruina_core::ids::{LeaseId, ObjectId};
use fruina_core::lease::AccessType;
use fruina_core::peer::{Acquired, Peer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct LeaseEntry {
    object_id: ObjectId,
    access: AccessType,
    ttl: Option<Duration>,
    #[allow(dead_code)] // kept for parity with the spec's Lease data model
    created_at: Instant,
    last_renewed_at: Instant,
    /// Set for a CREATE lease whose object hasn't been sealed yet: the path
    /// under `leases/` holding its in-progress file. Cleared once sealed.
    pending_path: Option<PathBuf>,
    meta: BTreeMap<String, Value>,
}

impl LeaseEntry {
    fn is_expired(&self) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => self.last_renewed_at.elapsed() > ttl,
        }
    }
}

/// Peer variant backed by a directory shared between processes (spec
/// §4.3). `leases/` and `data/` are created under `root` on construction.
pub struct SharedFsPeer {
    leases_dir: PathBuf,
    data_dir: PathBuf,
    leases: Mutex<BTreeMap<LeaseId, LeaseEntry>>,
    gc: Mutex<Option<Gc>>,
}

impl SharedFsPeer {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let leases_dir = root.join("leases");
        let data_dir = root.join("data");
        std::fs::create_dir_all(&leases_dir)?;
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            leases_dir,
            data_dir,
            leases: Mutex::new(BTreeMap::new()),
            gc: Mutex::new(None),
        })
    }

    /// Starts the background TTL sweep (spec §4.3, "Garbage collection").
    /// A no-op if maintenance is already running.
    pub fn start_maintenance(&self, interval: Duration) {
        let mut gc = self.gc.lock().unwrap();
        if gc.is_some() {
            return;
        }
        *gc = Some(Gc::start(
            self.leases_dir.clone(),
            self.data_dir.clone(),
            interval,
        ));
    }

    pub fn stop_maintenance(&self) {
        self.gc.lock().unwrap().take();
    }

    fn data_path(&self, object_id: ObjectId) -> PathBuf {
        self.data_dir.join(object_id.to_string())
    }

    /// Whether `object_id` already names a known object: sealed (present
    /// under `data/`) or still being created by some process (a
    /// `<object_id>.*` file under `leases/`).
    fn object_known(&self, object_id: ObjectId) -> Result<bool> {
        if self.data_path(object_id).exists() {
            return Ok(true);
        }
        let prefix = format!("{object_id}.");
        for entry in std::fs::read_dir(&self.leases_dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn cleanup_expired(leases: &mut BTreeMap<LeaseId, LeaseEntry>) {
        let expired: Vec<LeaseId> = leases
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(id, _)| *id)
            .collect();
        for lid in expired {
            if let Some(entry) = leases.remove(&lid) {
                if let Some(path) = entry.pending_path {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
    }
}

impl Peer for SharedFsPeer {
    #[tracing::instrument(skip(self, meta))]
    fn acquire(
        &self,
        object_id: Option<ObjectId>,
        access: AccessType,
        ttl: Option<Duration>,
        meta: Option<BTreeMap<String, Value>>,
    ) -> Result<Acquired> {
        let mut leases = self.leases.lock().unwrap();
        Self::cleanup_expired(&mut leases);

        let object_id = object_id.unwrap_or_else(ObjectId::new);

        let (blob, pending_path, resolved_meta): (SharedFsBlob, Option<PathBuf>, BTreeMap<String, Value>) =
            match access {
                AccessType::Create => {
                    if self.object_known(object_id)? {
                        return Err(Error::Conflict(object_id));
                    }
                    let lease_id_placeholder = LeaseId::new();
                    let lease_path = self
                        .leases_dir
                        .join(format!("{object_id}.{lease_id_placeholder}"));
                    let meta = meta.unwrap_or_default();
                    let ttl_ms = ttl.map(|d| d.as_millis() as u32).unwrap_or(0);
                    let blob = SharedFsBlob::create(&lease_path, &meta, ttl_ms)?;
                    return self.finish_acquire(
                        lease_id_placeholder,
                        object_id,
                        access,
                        ttl,
                        meta,
                        Some(lease_path),
                        blob,
                        &mut leases,
                    );
                }
                AccessType::Read => {
                    let path = self.data_path(object_id);
                    if !path.exists() {
                        return Err(Error::NotFound(object_id));
                    }
                    let blob = SharedFsBlob::open(&path, false)?;
                    let meta = blob.meta()?;
                    (blob, None, meta)
                }
                AccessType::Write => {
                    let path = self.data_path(object_id);
                    if !path.exists() {
                        return Err(Error::NotFound(object_id));
                    }
                    let blob = SharedFsBlob::open(&path, true)?;
                    let meta = blob.meta()?;
                    (blob, None, meta)
                }
            };

        let lease_id = LeaseId::new();
        self.finish_acquire(lease_id, object_id, access, ttl, resolved_meta, pending_path, blob, &mut leases)
    }

    #[tracing::instrument(skip(self))]
    fn seal(&self, lease_id: LeaseId) -> Result<()> {
        let mut leases = self.leases.lock().unwrap();
        let entry = leases.get(&lease_id).ok_or(Error::Expired(lease_id))?;
        if entry.is_expired() {
            leases.remove(&lease_id);
            return Err(Error::Expired(lease_id));
        }
        if entry.access != AccessType::Create {
            return Err(Error::BadLease(lease_id));
        }
        let Some(pending_path) = entry.pending_path.clone() else {
            // Already sealed through this exact lease: object-level
            // idempotence, lease untouched (spec §4.1 tie-break).
            return Ok(());
        };
        let object_ttl_ms = crate::format::object_ttl_seconds(&entry.meta)
            .map(|secs| (secs * 1000.0) as u32)
            .unwrap_or(0);
        let object_id = entry.object_id;

        let mut blob = SharedFsBlob::open(&pending_path, true)?;
        blob.seal_with_ttl(Some(object_ttl_ms))?;
        drop(blob);
        std::fs::rename(&pending_path, self.data_path(object_id))?;

        let entry = leases.get_mut(&lease_id).expect("checked above");
        entry.pending_path = None;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn discard(&self, lease_id: LeaseId) -> Result<()> {
        let mut leases = self.leases.lock().unwrap();
        let entry = leases.get(&lease_id).ok_or(Error::Expired(lease_id))?;
        if entry.is_expired() {
            leases.remove(&lease_id);
            return Err(Error::Expired(lease_id));
        }
        if !matches!(entry.access, AccessType::Create | AccessType::Write) {
            return Err(Error::BadLease(lease_id));
        }
        match entry.access {
            AccessType::Create => {
                if let Some(path) = &entry.pending_path {
                    let _ = std::fs::remove_file(path);
                } else {
                    let _ = std::fs::remove_file(self.data_path(entry.object_id));
                }
            }
            AccessType::Write => {
                let _ = std::fs::remove_file(self.data_path(entry.object_id));
            }
            AccessType::Read => unreachable!("checked above"),
        }
        leases.remove(&lease_id);
        Ok(())
    }

    fn release(&self, lease_id: LeaseId) {
        let mut leases = self.leases.lock().unwrap();
        if let Some(entry) = leases.remove(&lease_id) {
            // Releasing an un-sealed CREATE lease abandons the in-progress
            // object, matching `SharedFSPeer.release`'s CREATE-path cleanup.
            if let Some(path) = entry.pending_path {
                let _ = std::fs::remove_file(path);
            }
        }
    }

    fn renew(&self, lease_id: LeaseId) -> Result<()> {
        let mut leases = self.leases.lock().unwrap();
        let entry = leases.get_mut(&lease_id).ok_or(Error::Expired(lease_id))?;
        entry.last_renewed_at = Instant::now();
        if let Some(path) = &entry.pending_path {
            touch(path);
        }
        Ok(())
    }
}

impl SharedFsPeer {
    #[allow(clippy::too_many_arguments)]
    fn finish_acquire(
        &self,
        lease_id: LeaseId,
        object_id: ObjectId,
        access: AccessType,
        ttl: Option<Duration>,
        meta: BTreeMap<String, Value>,
        pending_path: Option<PathBuf>,
        blob: SharedFsBlob,
        leases: &mut BTreeMap<LeaseId, LeaseEntry>,
    ) -> Result<Acquired> {
        let handle = blob.handle()?;
        let sealed_size = if access == AccessType::Create {
            None
        } else {
            Some(blob.len()?)
        };
        let now = Instant::now();
        leases.insert(
            lease_id,
            LeaseEntry {
                object_id,
                access,
                ttl,
                created_at: now,
                last_renewed_at: now,
                pending_path,
                meta: meta.clone(),
            },
        );
        Ok(Acquired {
            lease_id,
            object_id,
            access,
            meta,
            sealed_size,
            handles: vec![handle],
        })
    }
}

fn touch(path: &Path) {
    if let Ok(file) = std::fs::OpenOptions::new().write(true).open(path) {
        let _ = file.set_modified(std::time::SystemTime::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_seal_read_roundtrip() {
        let dir = tempdir().unwrap();
        let peer = SharedFsPeer::new(dir.path()).unwrap();

        let created = peer
            .acquire(None, AccessType::Create, Some(Duration::from_secs(60)), None)
            .unwrap();
        let blob_path = match &created.handles[0] {
            Handle::SharedFs { path, .. } => path.clone(),
            _ => panic!("expected shared-fs handle"),
        };
        let mut blob = SharedFsBlob::open(&blob_path, true).unwrap();
        blob.write(b"Hello, Shared World!").unwrap();
        drop(blob);

        peer.seal(created.lease_id).unwrap();
        peer.release(created.lease_id);

        let read = peer
            .acquire(Some(created.object_id), AccessType::Read, None, None)
            .unwrap();
        let read_path = match &read.handles[0] {
            Handle::SharedFs { path, .. } => path.clone(),
            _ => panic!("expected shared-fs handle"),
        };
        let blob = SharedFsBlob::open(&read_path, false).unwrap();
        assert_eq!(blob.read(None, 0).unwrap(), b"Hello, Shared World!");
    }

    #[test]
    fn two_peers_share_a_directory() {
        let dir = tempdir().unwrap();
        let peer_a = SharedFsPeer::new(dir.path()).unwrap();
        let peer_b = SharedFsPeer::new(dir.path()).unwrap();

        let mut meta = BTreeMap::new();
        meta.insert("author".to_string(), Value::String("demo".into()));
        let created = peer_a
            .acquire(None, AccessType::Create, Some(Duration::from_secs(60)), Some(meta))
            .unwrap();
        let path = match &created.handles[0] {
            Handle::SharedFs { path, .. } => path.clone(),
            _ => unreachable!(),
        };
        let mut blob = SharedFsBlob::open(&path, true).unwrap();
        blob.write(b"Hello, Shared World!").unwrap();
        drop(blob);
        peer_a.seal(created.lease_id).unwrap();

        let read = peer_b
            .acquire(Some(created.object_id), AccessType::Read, None, None)
            .unwrap();
        assert_eq!(read.meta.get("author").unwrap(), "demo");
        let path = match &read.handles[0] {
            Handle::SharedFs { path, .. } => path.clone(),
            _ => unreachable!(),
        };
        let blob = SharedFsBlob::open(&path, false).unwrap();
        assert_eq!(blob.read(None, 0).unwrap(), b"Hello, Shared World!");
    }

    #[test]
    fn create_with_known_id_conflicts() {
        let dir = tempdir().unwrap();
        let peer = SharedFsPeer::new(dir.path()).unwrap();
        let created = peer.acquire(None, AccessType::Create, Some(Duration::from_secs(60)), None).unwrap();
        let err = peer
            .acquire(Some(created.object_id), AccessType::Create, Some(Duration::from_secs(60)), None)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn read_of_unsealed_object_is_not_found() {
        let dir = tempdir().unwrap();
        let peer = SharedFsPeer::new(dir.path()).unwrap();
        let created = peer.acquire(None, AccessType::Create, Some(Duration::from_secs(60)), None).unwrap();
        let err = peer
            .acquire(Some(created.object_id), AccessType::Read, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn seal_is_idempotent_through_same_lease() {
        let dir = tempdir().unwrap();
        let peer = SharedFsPeer::new(dir.path()).unwrap();
        let created = peer.acquire(None, AccessType::Create, Some(Duration::from_secs(60)), None).unwrap();
        peer.seal(created.lease_id).unwrap();
        assert!(peer.seal(created.lease_id).is_ok());
    }

    #[test]
    fn discard_via_write_lease_removes_sealed_object() {
        let dir = tempdir().unwrap();
        let peer = SharedFsPeer::new(dir.path()).unwrap();
        let created = peer.acquire(None, AccessType::Create, Some(Duration::from_secs(60)), None).unwrap();
        let object_id = created.object_id;
        peer.seal(created.lease_id).unwrap();
        peer.release(created.lease_id);

        let write = peer.acquire(Some(object_id), AccessType::Write, Some(Duration::from_secs(60)), None).unwrap();
        peer.discard(write.lease_id).unwrap();

        let err = peer.acquire(Some(object_id), AccessType::Read, None, None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn release_of_unsealed_create_abandons_the_file() {
        let dir = tempdir().unwrap();
        let peer = SharedFsPeer::new(dir.path()).unwrap();
        let created = peer.acquire(None, AccessType::Create, Some(Duration::from_secs(60)), None).unwrap();
        let path = match &created.handles[0] {
            Handle::SharedFs { path, .. } => path.clone(),
            _ => unreachable!(),
        };
        assert!(path.exists());
        peer.release(created.lease_id);
        assert!(!path.exists());
    }

    use fruina_core::blob::Handle;
}
