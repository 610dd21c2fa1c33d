//! Persistent, crash-tolerant cache of per-directory file statuses.
//!
//! [`DiskAttributeStore`] persists each directory's interesting children
//! through a `vstatus-storage` [`ShardStore`](vstatus_storage::ShardStore)
//! and keeps three in-memory indices in step with it:
//! - **valuable**: managed files that are neither up to date nor excluded
//! - **conflicted**: files carrying a conflict bit
//! - **ignored**: files whose status is exactly "excluded"
//!
//! Indices only track directories accepted by a caller-supplied
//! [`ManagedPredicate`]. After a restart they are rebuilt from disk by
//! [`DiskAttributeStore::bootstrap`].

mod bootstrap;
mod error;
mod index;
pub mod status;
mod store;

pub use bootstrap::{
    BootstrapReport, BootstrapThresholds, DEFAULT_MODIFIED_FILES_WARNING_THRESHOLD,
    DEFAULT_NEW_FILES_WARNING_THRESHOLD, DEFAULT_REPORT_TOP_N,
};
pub use error::{CacheError, Result};
pub use index::{CacheIndex, ManagedPredicate, ManagedRoots};
pub use status::{Category, StatusMasks, UnknownCategory};
pub use store::{DiskAttributeStore, StoreOptions};

pub use vstatus_storage::{DirectoryEntry, FsTag, ShardStoreOptions, StatusMap, StatusRecord};
