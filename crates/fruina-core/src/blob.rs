use crate::error::Result;
use std::os::fd::RawFd;
use std::path::PathBuf;

/// The transferable reference to a blob's bytes, carried across a process
/// boundary by the transport (§4.5, §6.3).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Handle {
    /// An anonymous-memory blob, referenced by file descriptor. The `fd`
    /// field is a placeholder at the JSON layer; the real descriptor
    /// travels out-of-band in the transport's ancillary data and is
    /// substituted in after `recvmsg`.
    FileDescriptor { fd: RawFd },
    /// A plain file on a filesystem reachable by both peer and client.
    FilesystemPath { path: PathBuf },
    /// A shared-filesystem framed blob: file path plus the byte offset
    /// where the data region begins.
    SharedFs { path: PathBuf, data_offset: u64 },
}

/// A memory-mapped view of a blob's bytes. Wraps `memmap2`'s read-only and
/// read-write mapping types behind one handle since a blob's writability
/// depends on its lease's access type, decided only at call time.
pub enum MappedRegion {
    Immutable(memmap2::Mmap),
    Mutable(memmap2::MmapMut),
}

impl MappedRegion {
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Immutable(mmap) => mmap,
            Self::Mutable(mmap) => mmap,
        }
    }

    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match self {
            Self::Immutable(_) => None,
            Self::Mutable(mmap) => Some(mmap),
        }
    }
}

/// Server-side owner of a byte region. One Blob backs one Object.
pub trait Blob: Send + Sync {
    fn write(&mut self, data: &[u8]) -> Result<usize>;
    fn read(&self, size: Option<usize>, offset: u64) -> Result<Vec<u8>>;
    fn truncate(&mut self, size: u64) -> Result<()>;
    fn memory_region(&self, writable: bool) -> Result<MappedRegion>;
    fn seal(&mut self) -> Result<()>;
    fn handle(&self) -> Result<Handle>;
    fn close(&mut self) -> Result<()>;
    fn delete(&mut self) -> Result<()>;
    fn is_sealed(&self) -> bool;
    fn len(&self) -> Result<u64>;
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Client-side reconstruction of a blob from a handle received over the
/// transport. Owns whatever resources it mapped/opened and releases them
/// on drop.
pub trait BlobView: Send + Sync {
    fn write(&mut self, data: &[u8]) -> Result<usize>;
    fn read(&self, size: Option<usize>, offset: u64) -> Result<Vec<u8>>;
    fn truncate(&mut self, size: u64) -> Result<()>;
    fn memory_region(&mut self, writable: bool) -> Result<&[u8]>;
    fn seal(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}
