//! Thin client façade over a Fruina peer (spec §6.1): `Object` handles,
//! scoped acquisition, and blob-view reconstruction from any `Handle`
//! variant. See the sibling crates for the peer variants this façade can
//! sit in front of: `fruina-core` (in-process memory/filesystem peers),
//! `fruina-sharedfs`, `fruina-tiered`, and `fruina-transport` (the
//! handle-passing local-socket transport).

pub mod client;
pub mod object;
pub mod view;

pub use client::{connect, connect_peer, Client};
pub use object::Object;
