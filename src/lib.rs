//! Practice Tracker - coding-practice sessions with descriptive signals.
//!
//! Users sign up, verify their email with a one-time code, log in, pick up a
//! random prompt and run code snippets against an interpreter. Every run
//! (and any error it produced) is recorded against the session, and the
//! tracker derives "signals" from that event log.
//!
//! # What signals are
//!
//! - **Descriptive**: they state what happened (how often code ran, whether
//!   a run followed an error, how long the session took)
//! - **Deterministic**: the same session and events always give the same
//!   list, in the same order
//! - **Not judgements**: no scoring, ranking or inference about skill
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Practice Tracker                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │   Server    │──▶│   Tracker   │──▶│    Store    │        │
//! │  │   (axum)    │   │ (operations)│   │ (sessions,  │        │
//! │  └─────────────┘   └─────────────┘   │  events)    │        │
//! │                      │         │     └─────────────┘        │
//! │                      ▼         ▼                            │
//! │              ┌─────────────┐ ┌─────────────┐                │
//! │              │ CodeRunner  │ │  Signals    │                │
//! │              │ (process)   │ │  (derive)   │                │
//! │              └─────────────┘ └─────────────┘                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use practice_tracker::core::{derive_signals, RunEvent, Session};
//!
//! let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
//! let session = Session {
//!     id: 1,
//!     user_id: 1,
//!     prompt_text: "Reverse a string".to_string(),
//!     started_at: start,
//!     ended_at: Some(start + Duration::seconds(125)),
//! };
//! let runs = vec![RunEvent { id: 1, session_id: 1, occurred_at: start + Duration::seconds(90) }];
//!
//! let signals = derive_signals(&session, &runs, &[]);
//! assert_eq!(signals[0].key, "run_count");
//! ```

pub mod activity;
pub mod auth;
pub mod config;
pub mod core;
pub mod execute;
pub mod store;
pub mod tracker;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use crate::activity::{ActivityLog, ActivityStats, SharedActivityLog};
pub use crate::config::{Config, ConfigError, Environment};
pub use crate::core::{derive_signals, ErrorEvent, RunEvent, Session, Signal, SignalValue};
pub use crate::execute::{CodeRunner, ExecutionOutcome, ProcessRunner};
pub use crate::store::{MemoryStore, Store, StoreError};
pub use crate::tracker::{Tracker, TrackerError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
