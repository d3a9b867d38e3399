//! Process-wide activity counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters of tracker activity since process start.
#[derive(Debug)]
pub struct ActivityLog {
    /// Accounts created
    signups: AtomicU64,
    /// Practice sessions started
    sessions_started: AtomicU64,
    /// Practice sessions ended
    sessions_ended: AtomicU64,
    /// Code executions recorded
    runs_recorded: AtomicU64,
    /// Executions that produced error output
    errors_recorded: AtomicU64,
    /// Signal lists served
    signal_requests: AtomicU64,
    /// When counting began
    started_at: DateTime<Utc>,
}

impl ActivityLog {
    /// Create a new activity log.
    pub fn new() -> Self {
        Self {
            signups: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_ended: AtomicU64::new(0),
            runs_recorded: AtomicU64::new(0),
            errors_recorded: AtomicU64::new(0),
            signal_requests: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_signup(&self) {
        self.signups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_ended(&self) {
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an execution, and its error if it produced one.
    pub fn record_run(&self, errored: bool) {
        self.runs_recorded.fetch_add(1, Ordering::Relaxed);
        if errored {
            self.errors_recorded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_signal_request(&self) {
        self.signal_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> ActivityStats {
        ActivityStats {
            signups: self.signups.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_ended: self.sessions_ended.load(Ordering::Relaxed),
            runs_recorded: self.runs_recorded.load(Ordering::Relaxed),
            errors_recorded: self.errors_recorded.load(Ordering::Relaxed),
            signal_requests: self.signal_requests.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Activity:\n\
             - Signups: {}\n\
             - Sessions started: {}\n\
             - Sessions ended: {}\n\
             - Runs recorded: {} ({} with errors)\n\
             - Signal requests: {}\n\
             - Uptime: {} seconds",
            stats.signups,
            stats.sessions_started,
            stats.sessions_ended,
            stats.runs_recorded,
            stats.errors_recorded,
            stats.signal_requests,
            stats.uptime_secs
        )
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of activity statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStats {
    pub signups: u64,
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub runs_recorded: u64,
    pub errors_recorded: u64,
    pub signal_requests: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe shared activity log.
pub type SharedActivityLog = Arc<ActivityLog>;

/// Create a new shared activity log.
pub fn create_shared_log() -> SharedActivityLog {
    Arc::new(ActivityLog::new())
}
