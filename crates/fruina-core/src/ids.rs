use uuid::Uuid;

/// Identifies an object, stable for its whole lifetime.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ObjectId(Uuid);

impl ObjectId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for ObjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifies one lease. Carries the owning process id so a lease orphaned
/// by a crashed process is recognizable in diagnostics; the pid never
/// travels on the wire, only in the in-process registry's `Display` form.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct LeaseId {
    uuid: Uuid,
    pid: u32,
}

impl LeaseId {
    #[must_use]
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            pid: std::process::id(),
        }
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The wire representation used by `fruina-transport`: the bare uuid,
    /// without the `pid` annotation that only makes sense for local
    /// diagnostics (spec §10.5: "pid never travels on the wire").
    #[must_use]
    pub fn to_wire(&self) -> String {
        self.uuid.hyphenated().to_string()
    }

    /// Parses a wire-format lease id, tagging it with the *receiving*
    /// process's pid since the originating pid isn't part of the wire
    /// payload.
    pub fn from_wire(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(|uuid| Self {
            uuid,
            pid: std::process::id(),
        })
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "lease:pid={},{}", self.pid, self.uuid.hyphenated())
    }
}

impl std::str::FromStr for LeaseId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(|uuid| Self {
            uuid,
            pid: std::process::id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_unique() {
        assert_ne!(ObjectId::new(), ObjectId::new());
    }

    #[test]
    fn object_id_roundtrips_through_display() {
        let id = ObjectId::new();
        let parsed: ObjectId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn lease_id_captures_current_pid() {
        let id = LeaseId::new();
        assert_eq!(id.pid(), std::process::id());
    }

    #[test]
    fn lease_id_display_starts_with_lease_pid() {
        let id = LeaseId::new();
        assert!(id.to_string().starts_with("lease:pid="));
    }

    #[test]
    fn lease_ids_are_unique() {
        assert_ne!(LeaseId::new(), LeaseId::new());
    }
}
