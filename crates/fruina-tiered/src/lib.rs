//! LRU-composed hot/cold tiered peer (spec §4.4): a bounded hot peer with
//! an unbounded cold overflow, both speaking the same `fruina_core::Peer`
//! contract so the tiered peer is itself usable anywhere a peer is
//! expected.

pub mod peer;

pub use peer::TieredPeer;
