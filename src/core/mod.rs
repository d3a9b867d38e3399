//! Core domain of the practice tracker.
//!
//! This module contains:
//! - Session and event records as read by the signals engine
//! - The signals engine itself, a pure derivation over those records

pub mod signals;
pub mod types;

// Re-export commonly used types
pub use signals::{derive_signals, Signal, SignalInput, SignalRule, SignalValue, RULES};
pub use types::{ErrorEvent, RecordId, RunEvent, Session};
