//! Storage for accounts, sessions, events and prompts.
//!
//! The tracker talks to storage only through the traits below. The crate
//! ships one implementation, [`MemoryStore`], which keeps everything in
//! process and can snapshot itself to a JSON file.

pub mod catalog;
pub mod memory;

use crate::core::{ErrorEvent, RecordId, RunEvent, Session};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use catalog::DEFAULT_PROMPTS;
pub use memory::MemoryStore;

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: RecordId,
    /// Normalized (trimmed, lowercase) email address
    pub email: String,
    /// PHC-formatted password hash
    pub password_hash: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

/// A one-time email verification code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCode {
    pub id: RecordId,
    pub user_id: RecordId,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl VerificationCode {
    /// Whether the code is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// A coding prompt from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: RecordId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Session lifecycle storage.
pub trait SessionStore: Send + Sync {
    fn create_session(
        &self,
        user_id: RecordId,
        prompt_text: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Session, StoreError>;

    fn get_session(&self, id: RecordId) -> Result<Option<Session>, StoreError>;

    /// Set the end timestamp. Fails with `Conflict` if already ended.
    fn end_session(&self, id: RecordId, ended_at: DateTime<Utc>) -> Result<Session, StoreError>;
}

/// Append-only run and error event log.
pub trait EventStore: Send + Sync {
    fn record_run(
        &self,
        session_id: RecordId,
        occurred_at: DateTime<Utc>,
    ) -> Result<RunEvent, StoreError>;

    fn record_error(
        &self,
        run_id: RecordId,
        message: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<ErrorEvent, StoreError>;

    /// Record a run and, when `error_message` is non-empty, its error, as
    /// one unit. Readers observe both or neither.
    fn record_execution(
        &self,
        session_id: RecordId,
        occurred_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> Result<(RunEvent, Option<ErrorEvent>), StoreError>;

    /// Runs of a session, ascending by occurrence time then id.
    fn list_run_events(&self, session_id: RecordId) -> Result<Vec<RunEvent>, StoreError>;

    /// Errors of every run in a session, ascending by occurrence time then id.
    fn list_error_events_for_session(
        &self,
        session_id: RecordId,
    ) -> Result<Vec<ErrorEvent>, StoreError>;
}

/// Account storage.
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` if the email is already registered.
    fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<User, StoreError>;

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    fn mark_verified(&self, user_id: RecordId) -> Result<(), StoreError>;
}

/// Email verification code storage.
pub trait VerificationStore: Send + Sync {
    fn issue_code(
        &self,
        user_id: RecordId,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<VerificationCode, StoreError>;

    /// An unused code for the user matching `code`, expired or not.
    fn find_active_code(
        &self,
        user_id: RecordId,
        code: &str,
    ) -> Result<Option<VerificationCode>, StoreError>;

    fn mark_code_used(&self, code_id: RecordId) -> Result<(), StoreError>;
}

/// Prompt catalog.
pub trait PromptStore: Send + Sync {
    fn add_prompt(&self, text: &str, created_at: DateTime<Utc>) -> Result<Prompt, StoreError>;

    fn list_prompts(&self) -> Result<Vec<Prompt>, StoreError>;

    /// A uniformly random prompt, or `None` when the catalog is empty.
    fn random_prompt(&self) -> Result<Option<Prompt>, StoreError>;
}

/// Everything the tracker needs from storage.
pub trait Store: SessionStore + EventStore + UserStore + VerificationStore + PromptStore {}

impl<T> Store for T where T: SessionStore + EventStore + UserStore + VerificationStore + PromptStore {}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Referenced record does not exist
    NotFound { entity: &'static str, id: RecordId },
    /// Write would violate a uniqueness or lifecycle constraint
    Conflict(String),
    /// A writer panicked while holding the lock
    Poisoned,
    IoError(String),
    ParseError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound { entity, id } => write!(f, "{entity} {id} not found"),
            StoreError::Conflict(e) => write!(f, "Conflict: {e}"),
            StoreError::Poisoned => write!(f, "Store lock poisoned"),
            StoreError::IoError(e) => write!(f, "IO error: {e}"),
            StoreError::ParseError(e) => write!(f, "Parse error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
