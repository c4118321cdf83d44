//! Shared-filesystem framed blob (spec §4.2.3).
//!
//! Grounded on `original_source/fruina/backends/shared_fs.py::SharedFSBlob`:
//! one file holds a 32-byte header, a JSON metadata block, alignment
//! padding, then the data region; all read/write/truncate offsets are
//! relative to `data_offset`.

use crate::format::{self, Header, ALIGNMENT, CURRENT_VERSION, FLAG_SEALED};
use fruina_core::blob::{Blob, Handle, MappedRegion};
use fruina_core::error::{Error, Result};
use fruina_core::ids::ObjectId;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct SharedFsBlob {
    path: PathBuf,
    file: File,
    header: Header,
    sealed: bool,
}

impl SharedFsBlob {
    /// Writes a fresh framed file at `path`: header + JSON metadata +
    /// zero padding up to the next 4096-byte boundary, then leaves the
    /// cursor at `data_offset` ready for writes.
    pub fn create(
        path: impl Into<PathBuf>,
        meta: &BTreeMap<String, serde_json::Value>,
        ttl_ms: u32,
    ) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let meta_bytes = format::encode_meta(meta)?;
        let data_offset = format::aligned_data_offset(meta_bytes.len() as u64);
        let header = Header {
            version: CURRENT_VERSION,
            flags: 0,
            ttl_ms,
            meta_len: meta_bytes.len() as u64,
            data_offset,
        };

        file.write_all(&header.to_bytes())?;
        file.write_all(&meta_bytes)?;
        let padding = data_offset - format::HEADER_SIZE - meta_bytes.len() as u64;
        if padding > 0 {
            file.write_all(&vec![0u8; padding as usize])?;
        }
        file.flush()?;

        Ok(Self {
            path,
            file,
            header,
            sealed: false,
        })
    }

    /// Opens an existing framed file, parsing its header to learn the data
    /// offset and seal state.
    pub fn open(path: impl Into<PathBuf>, writable: bool) -> Result<Self> {
        let path = path.into();
        let mut file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)?;
        let header = read_header(&file)?;
        let sealed = header.is_sealed();
        file.seek(SeekFrom::Start(header.data_offset))?;
        Ok(Self {
            path,
            file,
            header,
            sealed,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn data_offset(&self) -> u64 {
        self.header.data_offset
    }

    /// Reads back the JSON metadata block.
    pub fn meta(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(format::HEADER_SIZE))?;
        let mut buf = vec![0u8; self.header.meta_len as usize];
        file.read_exact(&mut buf)?;
        format::decode_meta(&buf)
    }

    #[must_use]
    pub fn ttl_ms(&self) -> u32 {
        self.header.ttl_ms
    }

    fn rewrite_header(&mut self, flags: u8, ttl_ms: u32) -> Result<()> {
        self.header.flags = flags;
        self.header.ttl_ms = ttl_ms;
        let pos = self.file.stream_position()?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.to_bytes())?;
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    /// Seals the blob, optionally replacing the TTL with `new_ttl_ms`
    /// (spec §4.3's seal path: object TTL from `meta["ttl"]` overwrites the
    /// lease-TTL the file was created with).
    pub fn seal_with_ttl(&mut self, new_ttl_ms: Option<u32>) -> Result<()> {
        if self.sealed {
            return Ok(());
        }
        let ttl = new_ttl_ms.unwrap_or(self.header.ttl_ms);
        self.rewrite_header(self.header.flags | FLAG_SEALED, ttl)?;
        self.sealed = true;
        Ok(())
    }
}

fn read_header(file: &File) -> Result<Header> {
    let mut file = file.try_clone()?;
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; format::HEADER_SIZE as usize];
    file.read_exact(&mut buf)?;
    Header::from_bytes(&buf)
}

impl Blob for SharedFsBlob {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.sealed {
            return Err(Error::Sealed(ObjectId::new()));
        }
        Ok(self.file.write(data)?)
    }

    fn read(&self, size: Option<usize>, offset: u64) -> Result<Vec<u8>> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(self.header.data_offset + offset))?;
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
            return Err(Error::Sealed(ObjectId::new()));
        }
        self.file.set_len(self.header.data_offset + size)?;
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
            let mmap = unsafe {
                memmap2::MmapOptions::new()
                    .offset(self.header.data_offset)
                    .map_mut(&self.file)?
            };
            Ok(MappedRegion::Mutable(mmap))
        } else {
            let mmap = unsafe {
                memmap2::MmapOptions::new()
                    .offset(self.header.data_offset)
                    .map(&self.file)?
            };
            Ok(MappedRegion::Immutable(mmap))
        }
    }

    fn seal(&mut self) -> Result<()> {
        self.seal_with_ttl(None)
    }

    fn handle(&self) -> Result<Handle> {
        Ok(Handle::SharedFs {
            path: self.path.clone(),
            data_offset: self.header.data_offset,
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
        let total = self.file.metadata()?.len();
        Ok(total.saturating_sub(self.header.data_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta_with_ttl(seconds: f64) -> BTreeMap<String, serde_json::Value> {
        let mut meta = BTreeMap::new();
        meta.insert("ttl".to_string(), serde_json::Value::from(seconds));
        meta
    }

    #[test]
    fn create_write_read_roundtrips_data_region() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obj.lease");
        let mut blob = SharedFsBlob::create(&path, &BTreeMap::new(), 5_000).unwrap();
        blob.write(b"hello shared world").unwrap();
        assert_eq!(blob.read(None, 0).unwrap(), b"hello shared world");
    }

    #[test]
    fn data_offset_is_4096_aligned() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obj.lease");
        let blob = SharedFsBlob::create(&path, &meta_with_ttl(60.0), 5_000).unwrap();
        assert_eq!(blob.data_offset() % ALIGNMENT, 0);
    }

    #[test]
    fn seal_sets_flag_and_new_ttl() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obj.lease");
        let mut blob = SharedFsBlob::create(&path, &meta_with_ttl(2.0), 5_000).unwrap();
        blob.write(b"x").unwrap();
        blob.seal_with_ttl(Some(2_000)).unwrap();
        assert!(blob.is_sealed());
        assert_eq!(blob.ttl_ms(), 2_000);
        assert!(blob.write(b"y").is_err());
    }

    #[test]
    fn reopen_after_seal_sees_sealed_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obj.lease");
        let mut blob = SharedFsBlob::create(&path, &BTreeMap::new(), 5_000).unwrap();
        blob.write(b"frozen").unwrap();
        blob.seal().unwrap();
        drop(blob);

        let reopened = SharedFsBlob::open(&path, false).unwrap();
        assert!(reopened.is_sealed());
        assert_eq!(reopened.read(None, 0).unwrap(), b"frozen");
    }

    #[test]
    fn meta_roundtrips_across_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obj.lease");
        let meta = meta_with_ttl(30.0);
        let blob = SharedFsBlob::create(&path, &meta, 1_000).unwrap();
        drop(blob);

        let reopened = SharedFsBlob::open(&path, false).unwrap();
        assert_eq!(reopened.meta().unwrap(), meta);
    }
}
