//! TTL/mtime garbage collector for the shared-filesystem peer (spec §4.3,
//! "Garbage collection").
//!
//! Grounded on `original_source/fruina/peers/shared_fs.py::
//! SharedFSPeer._maintenance_loop`/`_cleanup_zombies`: a single background
//! thread walks `leases/` and `data/`, reads each file's TTL out of its
//! header, and unlinks anything whose `now - mtime` exceeds it. A file
//! whose header can't be parsed (partial write, corruption) is treated as
//! TTL = 1 hour rather than crashing the loop or leaking it forever (spec
//! §11, supplemented from the same function).

use fruina_core::error::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crate::format::{self, Header};

/// Fallback TTL applied to a file whose header can't be parsed.
pub const GC_FALLBACK_TTL: Duration = Duration::from_secs(3600);

fn read_ttl(path: &Path) -> Duration {
    match std::fs::File::open(path).and_then(|mut f| {
        use std::io::Read;
        let mut buf = [0u8; format::HEADER_SIZE as usize];
        f.read_exact(&mut buf).map(|()| buf)
    }) {
        Ok(buf) => match Header::from_bytes(&buf) {
            Ok(header) => Duration::from_millis(u64::from(header.ttl_ms)),
            Err(_) => GC_FALLBACK_TTL,
        },
        Err(_) => GC_FALLBACK_TTL,
    }
}

/// Scans one directory once, removing files past their TTL. TTL = 0 means
/// "lives forever" and is never reaped.
fn sweep_dir(dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };
    let now = SystemTime::now();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let ttl = read_ttl(&path);
        if ttl.is_zero() {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let Ok(mtime) = meta.modified() else { continue };
        let Ok(age) = now.duration_since(mtime) else { continue };
        if age > ttl {
            tracing::info!(path = %path.display(), ttl_secs = ttl.as_secs(), "removing expired shared-fs file");
            let _ = std::fs::remove_file(&path);
        }
    }
    Ok(())
}

/// One pass over both `leases/` and `data/` under `root`.
pub fn sweep_once(leases_dir: &Path, data_dir: &Path) -> Result<()> {
    sweep_dir(leases_dir)?;
    sweep_dir(data_dir)?;
    Ok(())
}

/// A background maintenance thread; dropping it stops and joins the
/// thread, matching `SharedFSPeer.stop_maintenance`'s join-on-stop
/// semantics.
pub struct Gc {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Gc {
    /// Starts a thread that sweeps `leases_dir`/`data_dir` every `interval`
    /// until stopped.
    #[must_use]
    pub fn start(leases_dir: PathBuf, data_dir: PathBuf, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let handle = std::thread::Builder::new()
            .name("fruina-sharedfs-gc".to_string())
            .spawn(move || {
                while !stop_clone.load(Ordering::Relaxed) {
                    if let Err(err) = sweep_once(&leases_dir, &data_dir) {
                        tracing::warn!(%err, "shared-fs gc sweep failed");
                    }
                    std::thread::sleep(interval);
                }
            })
            .expect("failed to spawn fruina-sharedfs-gc thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::SharedFsBlob;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn sweep_removes_file_past_ttl() {
        let dir = tempdir().unwrap();
        let leases = dir.path().join("leases");
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();

        let path = data.join("obj-1");
        let mut blob = SharedFsBlob::create(&path, &BTreeMap::new(), 1).unwrap();
        blob.write(b"x").unwrap();
        drop(blob);

        // Backdate the mtime well past the 1ms TTL.
        let past = SystemTime::now() - Duration::from_secs(10);
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(past).unwrap();

        sweep_once(&leases, &data).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn sweep_leaves_zero_ttl_files_alone() {
        let dir = tempdir().unwrap();
        let leases = dir.path().join("leases");
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();

        let path = data.join("obj-2");
        let blob = SharedFsBlob::create(&path, &BTreeMap::new(), 0).unwrap();
        drop(blob);

        sweep_once(&leases, &data).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn corrupt_header_gets_fallback_ttl_not_crash() {
        let dir = tempdir().unwrap();
        let leases = dir.path().join("leases");
        let data = dir.path().join("data");
        std::fs::create_dir_all(&data).unwrap();

        let path = data.join("garbage");
        std::fs::write(&path, b"not a fruina header at all").unwrap();

        // A fresh file's mtime is "now", well under the 1h fallback TTL.
        assert!(sweep_once(&leases, &data).is_ok());
        assert!(path.exists());
    }
}
