//! Shared-filesystem peer: the framed on-disk blob format, the peer
//! variant that reads/writes it under a shared directory, and the TTL
//! garbage collector (spec §4.2.3, §4.3).

pub mod blob;
pub mod format;
pub mod gc;
pub mod peer;

pub use blob::SharedFsBlob;
pub use gc::Gc;
pub use peer::SharedFsPeer;
