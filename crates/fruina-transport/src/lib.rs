//! Local-socket, FD-passing control-plane transport (spec §4.5, §6.3).
//! `wire` defines the framing and message shapes; `uds` implements the
//! Unix-domain-socket server and client, including `SCM_RIGHTS` descriptor
//! passing on the `acquire` response.

pub mod uds;
pub mod wire;

pub use uds::{UdsClient, UdsServer};
