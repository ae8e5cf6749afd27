use callstore_api::{BackendError, ErrorKind};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record '{0}' not found")]
    NotFound(String),

    #[error("conflict on '{id}': {reason}")]
    Conflict { id: String, reason: String },

    #[error("scheduler is closed")]
    SchedulerClosed,

    #[error("scheduler saturated: {limit} operations already queued")]
    Saturated { limit: usize },

    #[error("no operation slot within {waited_ms}ms")]
    AdmissionTimeout { waited_ms: u64 },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(#[source] BackendError),

    #[error("config error: {0}")]
    Config(String),
}

impl StoreError {
    /// Classify a backend error raised while operating on `id`.
    ///
    /// `Conflict` and `NotFound` kinds are contract outcomes and get their own
    /// variants; everything else is passed through as `Backend` unchanged.
    pub fn from_backend(id: &str, e: BackendError) -> Self {
        match e.kind() {
            ErrorKind::Conflict => StoreError::Conflict {
                id: id.to_string(),
                reason: e.message().to_string(),
            },
            ErrorKind::NotFound => StoreError::NotFound(id.to_string()),
            _ => StoreError::Backend(e),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kinds_are_classified() {
        let e = StoreError::from_backend("c1", BackendError::conflict("v2 != v1"));
        assert!(e.is_conflict());
        assert_eq!(e.to_string(), "conflict on 'c1': v2 != v1");

        let e = StoreError::from_backend("c1", BackendError::not_found("gone"));
        assert!(matches!(e, StoreError::NotFound(ref id) if id == "c1"));

        let e = StoreError::from_backend("c1", BackendError::io("disk full"));
        match e {
            StoreError::Backend(inner) => {
                assert_eq!(inner.kind(), ErrorKind::Io);
                assert_eq!(inner.message(), "disk full");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
