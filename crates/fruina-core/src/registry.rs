//! Named shared in-process peer registry (spec §9, "global mutable state").
//!
//! Grounded on `frankenterm-blob-leases::storage`'s single `static
//! Mutex<Option<Arc<dyn Trait>>>` register/get/clear idiom, generalized
//! from "one slot" to "a name -> peer map" since Fruina's `connect
//! ("memory://name")` convention (`original_source/packice/interface/
//! client.py::connect`) needs more than one named peer to coexist.

use crate::peer::Peer;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

static REGISTRY: Mutex<Option<HashMap<String, Arc<dyn Peer>>>> = Mutex::new(None);

/// Registers `peer` under `name`, overwriting whatever was there before.
pub fn register(name: &str, peer: Arc<dyn Peer>) {
    let mut guard = REGISTRY.lock().unwrap();
    guard.get_or_insert_with(HashMap::new).insert(name.to_string(), peer);
}

/// Looks up a previously registered peer, or `None` if `name` is unknown.
#[must_use]
pub fn get(name: &str) -> Option<Arc<dyn Peer>> {
    REGISTRY
        .lock()
        .unwrap()
        .as_ref()
        .and_then(|m| m.get(name).cloned())
}

/// Returns the peer registered under `name`, creating and registering one
/// via `make` if none exists yet. Mirrors `connect("memory://name")`'s
/// lazy-creation semantics in the Python client.
pub fn get_or_create(name: &str, make: impl FnOnce() -> Arc<dyn Peer>) -> Arc<dyn Peer> {
    let mut guard = REGISTRY.lock().unwrap();
    let map = guard.get_or_insert_with(HashMap::new);
    map.entry(name.to_string()).or_insert_with(make).clone()
}

/// Removes every registered peer. Intended for deterministic teardown at
/// process exit and for test isolation.
pub fn clear() {
    if let Some(map) = REGISTRY.lock().unwrap().as_mut() {
        map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::memory_peer;

    // Serialize tests touching the global REGISTRY, matching the teacher's
    // `storage` test module's `TEST_LOCK` pattern.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn unknown_name_returns_none() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear();
        assert!(get("nope").is_none());
    }

    #[test]
    fn register_then_get_returns_same_peer() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear();
        let peer: Arc<dyn Peer> = Arc::new(memory_peer());
        register("default", peer.clone());
        assert!(get("default").is_some());
        clear();
    }

    #[test]
    fn get_or_create_reuses_existing_entry() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear();
        let first = get_or_create("shared", || Arc::new(memory_peer()));
        let second = get_or_create("shared", || Arc::new(memory_peer()));
        assert!(Arc::ptr_eq(&first, &second));
        clear();
    }

    #[test]
    fn clear_empties_the_registry() {
        let _lock = TEST_LOCK.lock().unwrap();
        register("x", Arc::new(memory_peer()));
        clear();
        assert!(get("x").is_none());
    }
}
