//! Small FD-duplication helpers.
//!
//! `frankenterm-filedescriptor` covers this ground in the teacher repo, but
//! its vendored copy in this retrieval pack is missing the `unix`/`windows`
//! submodules its `lib.rs` depends on, so it was not usable as a
//! dependency. This module covers just what Fruina needs: duplicating a
//! raw descriptor so a handle can be handed to another owner (a transport
//! response, a client-side view) without the original's lifetime being
//! tied to the copy.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Duplicates a raw file descriptor. The duplicate is a distinct kernel
/// object referencing the same underlying file description; closing one
/// never invalidates the other (spec §9, "ownership of handles").
pub fn dup(fd: RawFd) -> io::Result<OwnedFd> {
    let dup_fd = unsafe { libc::dup(fd) };
    if dup_fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(dup_fd) })
}

/// Duplicates the descriptor owned by `owned`, leaving it untouched.
pub fn dup_owned(owned: &OwnedFd) -> io::Result<OwnedFd> {
    dup(owned.as_raw_fd())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::IntoRawFd;

    #[test]
    fn dup_produces_independent_fd() {
        let file = tempfile::tempfile().unwrap();
        let owned: OwnedFd = file.into();
        let original_fd = owned.as_raw_fd();

        let duped = dup_owned(&owned).unwrap();
        assert_ne!(duped.as_raw_fd(), original_fd);

        // Closing the duplicate must not affect the original.
        drop(duped);
        let still_good = dup_owned(&owned);
        assert!(still_good.is_ok());
        let _ = owned.into_raw_fd();
    }

    #[test]
    fn dup_of_invalid_fd_errors() {
        assert!(dup(-1).is_err());
    }
}
