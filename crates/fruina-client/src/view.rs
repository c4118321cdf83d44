//! Client-side blob-view reconstruction (spec §4.5, §9 "ownership of
//! handles").
//!
//! Grounded on `original_source/packice/interface/client.py::
//! Object._reconstruct_blob`: a handle's wire shape alone decides how to
//! open it (`int` -> FD view, `str` -> path view, `dict` -> shared-FS
//! view). This module is the Rust counterpart, built against
//! `fruina_core::blob::{BlobView, Handle}` so it works whether the handle
//! came from an in-process peer or from `fruina-transport`'s socket.

use fruina_core::blob::{BlobView, Handle, MappedRegion};
use fruina_core::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{FromRawFd, RawFd};
use std::path::PathBuf;

/// Builds the right `BlobView` for `handle`. `writable` should mirror the
/// lease's access type: `true` for CREATE (and the WRITE delete path),
/// `false` for READ.
pub fn from_handle(handle: Handle, writable: bool) -> Result<Box<dyn BlobView>> {
    match handle {
        Handle::FileDescriptor { fd } => Ok(Box::new(FdView::new(fd, writable))),
        Handle::FilesystemPath { path } => Ok(Box::new(PathView::open(path, writable)?)),
        Handle::SharedFs { path, data_offset } => {
            Ok(Box::new(SharedFsView::open(path, data_offset, writable)?))
        }
    }
}

fn read_at(file: &File, size: Option<usize>, offset: u64) -> Result<Vec<u8>> {
    let mut file = file.try_clone()?;
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

/// View over an anonymous-memory blob received as a raw file descriptor.
/// The descriptor is already a duplicate owned by this process (by the
/// in-process peer's `handle()` or by the transport's `recvmsg`), so
/// dropping this view's `File` is the correct close.
pub struct FdView {
    file: File,
    writable: bool,
    mapped: Option<MappedRegion>,
}

impl FdView {
    #[must_use]
    pub fn new(fd: RawFd, writable: bool) -> Self {
        Self {
            file: unsafe { File::from_raw_fd(fd) },
            writable,
            mapped: None,
        }
    }
}

impl BlobView for FdView {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(Error::Protocol("view is read-only".into()));
        }
        self.mapped = None;
        Ok(self.file.write(data)?)
    }

    fn read(&self, size: Option<usize>, offset: u64) -> Result<Vec<u8>> {
        read_at(&self.file, size, offset)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        if !self.writable {
            return Err(Error::Protocol("view is read-only".into()));
        }
        self.mapped = None;
        Ok(self.file.set_len(size)?)
    }

    fn memory_region(&mut self, writable: bool) -> Result<&[u8]> {
        let want_mut = writable && self.writable;
        let len = self.file.metadata()?.len();
        self.mapped = None;
        if len == 0 {
            return Ok(&[]);
        } else if want_mut {
            let mmap = unsafe { memmap2::MmapOptions::new().map_mut(&self.file)? };
            self.mapped = Some(MappedRegion::Mutable(mmap));
        } else {
            let mmap = unsafe { memmap2::MmapOptions::new().map(&self.file)? };
            self.mapped = Some(MappedRegion::Immutable(mmap));
        }
        Ok(self.mapped.as_ref().unwrap().as_slice())
    }

    fn seal(&mut self) -> Result<()> {
        self.mapped = None;
        Ok(self.file.flush()?)
    }

    fn close(&mut self) -> Result<()> {
        self.mapped = None;
        Ok(())
    }
}

/// View over a plain filesystem blob, opened directly from its path.
pub struct PathView {
    file: File,
    writable: bool,
    mapped: Option<MappedRegion>,
}

impl PathView {
    pub fn open(path: PathBuf, writable: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(&path)?;
        Ok(Self {
            file,
            writable,
            mapped: None,
        })
    }
}

impl BlobView for PathView {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(Error::Protocol("view is read-only".into()));
        }
        self.mapped = None;
        Ok(self.file.write(data)?)
    }

    fn read(&self, size: Option<usize>, offset: u64) -> Result<Vec<u8>> {
        read_at(&self.file, size, offset)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        if !self.writable {
            return Err(Error::Protocol("view is read-only".into()));
        }
        self.mapped = None;
        self.file.set_len(size)?;
        self.file.flush()?;
        Ok(())
    }

    fn memory_region(&mut self, writable: bool) -> Result<&[u8]> {
        let want_mut = writable && self.writable;
        let len = self.file.metadata()?.len();
        self.mapped = None;
        if len == 0 {
            return Ok(&[]);
        } else if want_mut {
            let mmap = unsafe { memmap2::MmapOptions::new().map_mut(&self.file)? };
            self.mapped = Some(MappedRegion::Mutable(mmap));
        } else {
            let mmap = unsafe { memmap2::MmapOptions::new().map(&self.file)? };
            self.mapped = Some(MappedRegion::Immutable(mmap));
        }
        Ok(self.mapped.as_ref().unwrap().as_slice())
    }

    fn seal(&mut self) -> Result<()> {
        self.mapped = None;
        Ok(self.file.flush()?)
    }

    fn close(&mut self) -> Result<()> {
        self.mapped = None;
        Ok(())
    }
}

/// View over a shared-filesystem framed blob: a plain file, but every
/// offset is relative to `data_offset` rather than the start of the file
/// (spec §4.2.3: "all offsets relative to `data_offset`").
pub struct SharedFsView {
    file: File,
    data_offset: u64,
    writable: bool,
    mapped: Option<MappedRegion>,
}

impl SharedFsView {
    pub fn open(path: PathBuf, data_offset: u64, writable: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(&path)?;
        Ok(Self {
            file,
            data_offset,
            writable,
            mapped: None,
        })
    }

    fn data_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len().saturating_sub(self.data_offset))
    }
}

impl BlobView for SharedFsView {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(Error::Protocol("view is read-only".into()));
        }
        self.mapped = None;
        self.file.seek(SeekFrom::Start(self.data_offset))?;
        Ok(self.file.write(data)?)
    }

    fn read(&self, size: Option<usize>, offset: u64) -> Result<Vec<u8>> {
        read_at(&self.file, size, self.data_offset + offset)
    }

    fn truncate(&mut self, size: u64) -> Result<()> {
        if !self.writable {
            return Err(Error::Protocol("view is read-only".into()));
        }
        self.mapped = None;
        self.file.set_len(self.data_offset + size)?;
        self.file.flush()?;
        Ok(())
    }

    fn memory_region(&mut self, writable: bool) -> Result<&[u8]> {
        let want_mut = writable && self.writable;
        self.mapped = None;
        if self.data_len()? == 0 {
            return Ok(&[]);
        } else if want_mut {
            let mmap = unsafe {
                memmap2::MmapOptions::new()
                    .offset(self.data_offset)
                    .map_mut(&self.file)?
            };
            self.mapped = Some(MappedRegion::Mutable(mmap));
        } else {
            let mmap = unsafe {
                memmap2::MmapOptions::new()
                    .offset(self.data_offset)
                    .map(&self.file)?
            };
            self.mapped = Some(MappedRegion::Immutable(mmap));
        }
        Ok(self.mapped.as_ref().unwrap().as_slice())
    }

    fn seal(&mut self) -> Result<()> {
        self.mapped = None;
        Ok(self.file.flush()?)
    }

    fn close(&mut self) -> Result<()> {
        self.mapped = None;
        Ok(())
    }
}
