use crate::ids::{LeaseId, ObjectId};
use thiserror::Error;

/// The eight error kinds a Fruina peer or transport can raise.
#[derive(Error, Debug)]
pub enum Error {
    #[error("object {0} not found")]
    NotFound(ObjectId),

    #[error("object {0} already exists")]
    Conflict(ObjectId),

    #[error("object {0} is not sealed yet")]
    NotSealed(ObjectId),

    #[error("lease {0} does not permit this operation")]
    BadLease(LeaseId),

    #[error("lease {0} has expired")]
    Expired(LeaseId),

    #[error("blob for object {0} is sealed")]
    Sealed(ObjectId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed protocol message: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_mentions_object_id() {
        let id = ObjectId::new();
        let err = Error::NotFound(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file gone");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file gone"));
    }

    #[test]
    fn protocol_error_carries_message() {
        let err = Error::Protocol("bad frame length".into());
        assert!(err.to_string().contains("bad frame length"));
    }
}
