pub mod config;
pub mod error;
pub mod locks;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod txn;

pub use config::{BackendConfig, CallstoreConfig, SchedulerConfig, StoreConfig};
pub use error::StoreError;
pub use registry::BackendRegistry;
pub use scheduler::{Admission, Scheduler};
pub use store::{Page, Store};
pub use txn::{Transaction, TxnState};
