//! Object/lease/blob state machine and the in-process peer variants
//! (memory-backed and plain-filesystem-backed). See the crate's sibling
//! crates for the shared-filesystem peer, the tiered peer, the
//! handle-passing transport, and the client façade.

pub mod backends;
pub mod blob;
pub mod error;
pub mod fdutil;
pub mod ids;
pub mod lease;
pub mod object;
pub mod peer;
pub mod registry;

pub use error::{Error, Result};
pub use ids::{LeaseId, ObjectId};
pub use lease::{AccessType, Lease};
pub use object::{Object, ObjectState};
pub use peer::{Acquired, InProcessPeer, Peer};
