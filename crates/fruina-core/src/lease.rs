use crate::ids::{LeaseId, ObjectId};
use std::time::{Duration, Instant};

/// The three access modes a lease can grant (spec §3, §4.1). `Write` is
/// used only for the delete path on an already-existing object.
#[derive(Clone, Copy, Eq, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Read,
    Create,
    Write,
}

/// A time-bounded capability for one access mode against one object.
///
/// `renew()` extends the TTL window from "now" without a release/reacquire
/// round-trip (supplemented from `original_source/fruina/core/lease.py`'s
/// abstract `renew`, absent from the distilled spec's operation list).
#[derive(Debug)]
pub struct Lease {
    lease_id: LeaseId,
    object_id: ObjectId,
    access: AccessType,
    ttl: Option<Duration>,
    created_at: Instant,
    last_renewed_at: Instant,
    active: bool,
}

impl Lease {
    pub(crate) fn new(object_id: ObjectId, access: AccessType, ttl: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            lease_id: LeaseId::new(),
            object_id,
            access,
            ttl,
            created_at: now,
            last_renewed_at: now,
            active: true,
        }
    }

    #[must_use]
    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }

    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    #[must_use]
    pub fn access(&self) -> AccessType {
        self.access
    }

    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// A lease with no TTL never expires; an inactive (released) lease is
    /// always considered expired regardless of TTL (spec §3 invariant 6:
    /// expired and released leases are indistinguishable from outside).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        if !self.active {
            return true;
        }
        match self.ttl {
            None => false,
            Some(ttl) => self.last_renewed_at.elapsed() > ttl,
        }
    }

    pub fn renew(&mut self) {
        if self.active {
            self.last_renewed_at = Instant::now();
        }
    }

    pub(crate) fn release(&mut self) {
        self.active = false;
    }
}
