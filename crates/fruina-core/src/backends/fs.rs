//! Plain filesystem blob backend (spec §4.2.2).
//!
//! Grounded on `original_source/fruina/backends/fs.py::FileBlob`: one
//! regular file per blob, handle is the path, `seal()` flushes and reopens
//! the file read-only.

use crate::blob::{Blob, Handle, MappedRegion};
use crate::error::Result;
use crate::ids::ObjectId;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct FileBlob {
    path: PathBuf,
    file: File,
    sealed: bool,
}

impl FileBlob {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            sealed: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Blob for FileBlob {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.sealed {
            return Err(crate::error::Error::Sealed(ObjectId::new()));
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
            return Err(crate::error::Error::Sealed(ObjectId::new()));
        }
        self.file.set_len(size)?;
        self.file.flush()?;
        Ok(())
    }

    fn memory_region(&self, writable: bool) -> Result<MappedRegion> {
        if self.len()? == 0 {
            let mmap = memmap2::MmapOptions::new()
                .len(1)
                .map_anon()?
                .make_read_only()?;
            return Ok(MappedRegion::Immutable(mmap));
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
        self.file = File::open(&self.path)?;
        self.sealed = true;
        Ok(())
    }

    fn handle(&self) -> Result<Handle> {
        Ok(Handle::FilesystemPath {
            path: self.path.clone(),
        })
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.file.flush()?)
    }

    fn delete(&mut self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn is_sealed(&self) -> bool {
        self.sealed
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempdir().unwrap();
        let mut blob = FileBlob::new(dir.path().join("obj")).unwrap();
        blob.write(b"hello disk").unwrap();
        assert_eq!(blob.read(None, 0).unwrap(), b"hello disk");
    }

    #[test]
    fn seal_reopens_read_only_but_readable() {
        let dir = tempdir().unwrap();
        let mut blob = FileBlob::new(dir.path().join("obj")).unwrap();
        blob.write(b"frozen bytes").unwrap();
        blob.seal().unwrap();
        assert!(blob.write(b"more").is_err());
        assert_eq!(blob.read(None, 0).unwrap(), b"frozen bytes");
    }

    #[test]
    fn delete_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obj");
        let mut blob = FileBlob::new(&path).unwrap();
        blob.write(b"x").unwrap();
        blob.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn handle_carries_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obj");
        let blob = FileBlob::new(&path).unwrap();
        match blob.handle().unwrap() {
            Handle::FilesystemPath { path: p } => assert_eq!(p, path),
            _ => panic!("expected FilesystemPath handle"),
        }
    }
}
