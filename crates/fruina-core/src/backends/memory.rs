//! Anonymous-memory blob backend (spec §4.2.1).
//!
//! Grounded on `original_source/fruina/backends/memory.py::MemBlob`: an
//! anonymous kernel-visible memory object created with `memfd_create`,
//! exposed to the owning process as a regular file and to other processes
//! as a duplicable file descriptor.

use crate::blob::{Blob, Handle, MappedRegion};
use crate::error::{Error, Result};
use crate::fdutil;
use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

pub struct MemoryBlob {
    file: File,
    sealed: bool,
}

impl MemoryBlob {
    pub fn new(name: &str) -> Result<Self> {
        let cname = CString::new(name).map_err(|_| Error::Protocol("invalid blob name".into()))?;
        let fd = unsafe { libc::memfd_create(cname.as_ptr(), libc::MFD_CLOEXEC) };
        let file = if fd >= 0 {
            unsafe { File::from_raw_fd(fd) }
        } else {
            // Kernels without memfd_create (pre-3.17, or seccomp-filtered)
            // fall back to an unlinked tempfile, matching the Python
            // backend's `tempfile.TemporaryFile` fallback path.
            tempfile::tempfile()?
        };
        Ok(Self {
            file,
            sealed: false,
        })
    }
}

impl Blob for MemoryBlob {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.sealed {
            return Err(Error::Sealed(crate::ids::ObjectId::new()));
        }
        Ok(self.file.write(data)?)
    }

    fn read(&self, size: Option<usize>, offset: u64) -> Result<Vec<u8>> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = match size {
            Some(n) => {
                let mut buf = vec![0u8; n];
                let read = file.read(&mut buf)?;
                buf.truncate(read);
                buf
            }
            None => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                buf
            }
        };
        buf.shrink_to_fit();
        Ok(buf)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        if self.sealed {
            return Err(Error::Sealed(crate::ids::ObjectId::new()));
        }
        Ok(self.file.set_len(size)?)
    }

    fn memory_region(&self, writable: bool) -> Result<MappedRegion> {
        if self.len()? == 0 {
            return Ok(MappedRegion::Immutable(empty_mmap()?));
        }
        if writable && !self.sealed {
            let mmap = unsafe { memmap2::MmapOptions::new().map_mut(&self.file)? };
            Ok(MappedRegion::Mutable(mmap))
        } else {
            let mmap = unsafe { memmap2::MmapOptions::new().map(&self.file)? };
            Ok(MappedRegion::Immutable(mmap))
        }
    }

    fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Ok(());
        }
        self.file.flush()?;
        self.sealed = true;
        Ok(())
    }

    fn handle(&self) -> Result<Handle> {
        let dup = fdutil::dup(self.file.as_raw_fd())?;
        Ok(Handle::FileDescriptor { fd: owned_into_raw(dup) })
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.file.flush()?)
    }

    fn delete(&mut self) -> Result<()> {
        // Anonymous memory has no directory entry to unlink; dropping the
        // file is sufficient once the last fd (ours and any duplicates)
        // closes.
        Ok(())
    }

    fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

fn owned_into_raw(owned: OwnedFd) -> std::os::fd::RawFd {
    use std::os::fd::IntoRawFd;
    owned.into_raw_fd()
}

fn empty_mmap() -> Result<memmap2::Mmap> {
    // memmap2 refuses to map a zero-length file; represent an empty blob
    // as a private anonymous mapping of length 1, truncated to empty by
    // the caller checking `len()` first. Callers must treat a zero-length
    // blob specially rather than dereference this placeholder.
    Ok(memmap2::MmapOptions::new().len(1).map_anon()?.make_read_only()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrips() {
        let mut blob = MemoryBlob::new("test-blob").unwrap();
        blob.write(b"hello fruina").unwrap();
        let data = blob.read(None, 0).unwrap();
        assert_eq!(data, b"hello fruina");
    }

    #[test]
    fn write_after_seal_fails() {
        let mut blob = MemoryBlob::new("test-blob").unwrap();
        blob.write(b"frozen").unwrap();
        blob.seal().unwrap();
        assert!(blob.write(b"more").is_err());
    }

    #[test]
    fn seal_is_idempotent() {
        let mut blob = MemoryBlob::new("test-blob").unwrap();
        blob.write(b"x").unwrap();
        blob.seal().unwrap();
        assert!(blob.seal().is_ok());
    }

    #[test]
    fn handle_fd_is_a_duplicate() {
        let blob = MemoryBlob::new("test-blob").unwrap();
        let handle = blob.handle().unwrap();
        match handle {
            Handle::FileDescriptor { fd } => assert_ne!(fd, blob.file.as_raw_fd()),
            _ => panic!("expected FileDescriptor handle"),
        }
    }

    #[test]
    fn truncate_changes_len() {
        let mut blob = MemoryBlob::new("test-blob").unwrap();
        blob.truncate(100).unwrap();
        assert_eq!(blob.len().unwrap(), 100);
    }
}
