pub mod backend;
pub mod call;
pub mod error;
pub mod record;

pub use backend::{BackendFactory, StoreBackend};
pub use call::{CallInitiate, CallMessage, CallState, Persona};
pub use error::{BackendError, ErrorKind};
pub use record::{Continuation, Document, IndexPage, Record, Version, Versioned};

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
