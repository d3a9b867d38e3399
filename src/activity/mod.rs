//! Activity accounting for the running tracker.
//!
//! Counts what the tracker has recorded and served, so operators can see
//! the service is alive and being used without reading the store.

pub mod log;

// Re-export commonly used types
pub use log::{create_shared_log, ActivityLog, ActivityStats, SharedActivityLog};
