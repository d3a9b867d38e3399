//! In-process store with optional JSON snapshot persistence.

use crate::core::{ErrorEvent, RecordId, RunEvent, Session};
use crate::store::{
    EventStore, Prompt, PromptStore, SessionStore, StoreError, User, UserStore,
    VerificationCode, VerificationStore,
};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// All tables, in insertion order.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Tables {
    users: Vec<User>,
    verification_codes: Vec<VerificationCode>,
    prompts: Vec<Prompt>,
    sessions: Vec<Session>,
    run_events: Vec<RunEvent>,
    error_events: Vec<ErrorEvent>,
}

impl Tables {
    fn push_run(&mut self, session_id: RecordId, occurred_at: DateTime<Utc>) -> RunEvent {
        let run = RunEvent {
            id: next_id(self.run_events.last().map(|r| r.id)),
            session_id,
            occurred_at,
        };
        self.run_events.push(run.clone());
        run
    }

    fn push_error(
        &mut self,
        run_id: RecordId,
        message: &str,
        occurred_at: DateTime<Utc>,
    ) -> ErrorEvent {
        let error = ErrorEvent {
            id: next_id(self.error_events.last().map(|e| e.id)),
            run_id,
            message: message.to_string(),
            occurred_at,
        };
        self.error_events.push(error.clone());
        error
    }

    fn has_session(&self, id: RecordId) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }
}

/// Ids start at 1 and grow with each insert into a table.
fn next_id(last: Option<RecordId>) -> RecordId {
    last.map_or(1, |id| id + 1)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Thread-safe in-memory implementation of every store trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    /// Where `save` writes the snapshot, if anywhere
    persist_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with the default prompt catalog.
    pub fn with_default_prompts() -> Self {
        let store = Self::new();
        if let Err(e) = store.seed_default_prompts() {
            tracing::warn!("Failed to seed prompts: {}", e);
        }
        store
    }

    /// Create a store backed by a snapshot file.
    ///
    /// Loads the snapshot if it exists; an empty catalog is then seeded.
    pub fn with_persistence(path: PathBuf) -> Result<Self, StoreError> {
        let mut store = Self::new();
        store.persist_path = Some(path.clone());

        if path.exists() {
            let tables = Self::read_snapshot(&path)?;
            tracing::info!(
                "Loaded store snapshot from {:?} ({} sessions, {} runs)",
                path,
                tables.sessions.len(),
                tables.run_events.len()
            );
            store.tables = RwLock::new(tables);
        }

        store.seed_default_prompts()?;
        Ok(store)
    }

    /// Add the default prompts if the catalog is empty.
    pub fn seed_default_prompts(&self) -> Result<usize, StoreError> {
        if !self.read()?.prompts.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        for text in super::DEFAULT_PROMPTS {
            self.add_prompt(text, now)?;
        }
        Ok(super::DEFAULT_PROMPTS.len())
    }

    /// Write the snapshot to the persistence path, if one is configured.
    pub fn save(&self) -> Result<(), StoreError> {
        let Some(ref path) = self.persist_path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(&*self.read()?)
            .map_err(|e| StoreError::ParseError(e.to_string()))?;

        // Replace the snapshot in one step so a crash never leaves it truncated.
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| StoreError::IoError(e.to_string()))?;
        std::fs::rename(&tmp_path, path).map_err(|e| StoreError::IoError(e.to_string()))?;

        Ok(())
    }

    fn read_snapshot(path: &Path) -> Result<Tables, StoreError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| StoreError::IoError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| StoreError::ParseError(e.to_string()))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }
}

impl SessionStore for MemoryStore {
    fn create_session(
        &self,
        user_id: RecordId,
        prompt_text: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Session, StoreError> {
        let mut tables = self.write()?;
        let session = Session {
            id: next_id(tables.sessions.last().map(|s| s.id)),
            user_id,
            prompt_text: prompt_text.to_string(),
            started_at,
            ended_at: None,
        };
        tables.sessions.push(session.clone());
        Ok(session)
    }

    fn get_session(&self, id: RecordId) -> Result<Option<Session>, StoreError> {
        Ok(self.read()?.sessions.iter().find(|s| s.id == id).cloned())
    }

    fn end_session(&self, id: RecordId, ended_at: DateTime<Utc>) -> Result<Session, StoreError> {
        let mut tables = self.write()?;
        let session = tables
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound {
                entity: "session",
                id,
            })?;

        if session.ended_at.is_some() {
            return Err(StoreError::Conflict(format!("session {id} already ended")));
        }

        session.ended_at = Some(ended_at);
        Ok(session.clone())
    }
}

impl EventStore for MemoryStore {
    fn record_run(
        &self,
        session_id: RecordId,
        occurred_at: DateTime<Utc>,
    ) -> Result<RunEvent, StoreError> {
        let mut tables = self.write()?;
        if !tables.has_session(session_id) {
            return Err(StoreError::NotFound {
                entity: "session",
                id: session_id,
            });
        }
        Ok(tables.push_run(session_id, occurred_at))
    }

    fn record_error(
        &self,
        run_id: RecordId,
        message: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<ErrorEvent, StoreError> {
        let mut tables = self.write()?;
        if !tables.run_events.iter().any(|r| r.id == run_id) {
            return Err(StoreError::NotFound {
                entity: "run",
                id: run_id,
            });
        }
        Ok(tables.push_error(run_id, message, occurred_at))
    }

    fn record_execution(
        &self,
        session_id: RecordId,
        occurred_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> Result<(RunEvent, Option<ErrorEvent>), StoreError> {
        let mut tables = self.write()?;
        if !tables.has_session(session_id) {
            return Err(StoreError::NotFound {
                entity: "session",
                id: session_id,
            });
        }

        let run = tables.push_run(session_id, occurred_at);
        let error = error_message
            .filter(|m| !m.is_empty())
            .map(|m| tables.push_error(run.id, m, occurred_at));

        Ok((run, error))
    }

    fn list_run_events(&self, session_id: RecordId) -> Result<Vec<RunEvent>, StoreError> {
        let tables = self.read()?;
        let mut runs: Vec<RunEvent> = tables
            .run_events
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| (r.occurred_at, r.id));
        Ok(runs)
    }

    fn list_error_events_for_session(
        &self,
        session_id: RecordId,
    ) -> Result<Vec<ErrorEvent>, StoreError> {
        let tables = self.read()?;
        let run_ids: HashSet<RecordId> = tables
            .run_events
            .iter()
            .filter(|r| r.session_id == session_id)
            .map(|r| r.id)
            .collect();

        let mut errors: Vec<ErrorEvent> = tables
            .error_events
            .iter()
            .filter(|e| run_ids.contains(&e.run_id))
            .cloned()
            .collect();
        errors.sort_by_key(|e| (e.occurred_at, e.id));
        Ok(errors)
    }
}

impl UserStore for MemoryStore {
    fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        created_at: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let email = normalize_email(email);
        let mut tables = self.write()?;

        if tables.users.iter().any(|u| u.email == email) {
            return Err(StoreError::Conflict(format!("email {email} already registered")));
        }

        let user = User {
            id: next_id(tables.users.last().map(|u| u.id)),
            email,
            password_hash: password_hash.to_string(),
            is_verified: false,
            created_at,
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = normalize_email(email);
        Ok(self.read()?.users.iter().find(|u| u.email == email).cloned())
    }

    fn mark_verified(&self, user_id: RecordId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let user = tables
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(StoreError::NotFound {
                entity: "user",
                id: user_id,
            })?;
        user.is_verified = true;
        Ok(())
    }
}

impl VerificationStore for MemoryStore {
    fn issue_code(
        &self,
        user_id: RecordId,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<VerificationCode, StoreError> {
        let mut tables = self.write()?;
        let issued = VerificationCode {
            id: next_id(tables.verification_codes.last().map(|c| c.id)),
            user_id,
            code: code.to_string(),
            expires_at,
            used: false,
        };
        tables.verification_codes.push(issued.clone());
        Ok(issued)
    }

    fn find_active_code(
        &self,
        user_id: RecordId,
        code: &str,
    ) -> Result<Option<VerificationCode>, StoreError> {
        Ok(self
            .read()?
            .verification_codes
            .iter()
            .find(|c| c.user_id == user_id && c.code == code && !c.used)
            .cloned())
    }

    fn mark_code_used(&self, code_id: RecordId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let code = tables
            .verification_codes
            .iter_mut()
            .find(|c| c.id == code_id)
            .ok_or(StoreError::NotFound {
                entity: "verification code",
                id: code_id,
            })?;
        code.used = true;
        Ok(())
    }
}

impl PromptStore for MemoryStore {
    fn add_prompt(&self, text: &str, created_at: DateTime<Utc>) -> Result<Prompt, StoreError> {
        let mut tables = self.write()?;
        let prompt = Prompt {
            id: next_id(tables.prompts.last().map(|p| p.id)),
            text: text.to_string(),
            created_at,
        };
        tables.prompts.push(prompt.clone());
        Ok(prompt)
    }

    fn list_prompts(&self) -> Result<Vec<Prompt>, StoreError> {
        Ok(self.read()?.prompts.clone())
    }

    fn random_prompt(&self) -> Result<Option<Prompt>, StoreError> {
        Ok(self
            .read()?
            .prompts
            .choose(&mut rand::thread_rng())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DEFAULT_PROMPTS;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_session_lifecycle() {
        let store = MemoryStore::new();
        let session = store.create_session(1, "Reverse a string", t0()).unwrap();
        assert_eq!(session.id, 1);
        assert!(!session.is_ended());

        let ended = store
            .end_session(session.id, t0() + Duration::minutes(5))
            .unwrap();
        assert_eq!(ended.ended_at, Some(t0() + Duration::minutes(5)));

        let again = store.end_session(session.id, t0() + Duration::minutes(6));
        assert!(matches!(again, Err(StoreError::Conflict(_))));

        assert!(matches!(
            store.end_session(99, t0()),
            Err(StoreError::NotFound { id: 99, .. })
        ));
    }

    #[test]
    fn test_runs_sorted_by_time_then_id() {
        let store = MemoryStore::new();
        let session = store.create_session(1, "p", t0()).unwrap();
        let other = store.create_session(2, "p", t0()).unwrap();

        store.record_run(session.id, t0() + Duration::seconds(30)).unwrap();
        store.record_run(session.id, t0() + Duration::seconds(10)).unwrap();
        store.record_run(other.id, t0() + Duration::seconds(5)).unwrap();
        store.record_run(session.id, t0() + Duration::seconds(10)).unwrap();

        let runs = store.list_run_events(session.id).unwrap();
        let ids: Vec<RecordId> = runs.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 4, 1]);
    }

    #[test]
    fn test_errors_joined_through_runs() {
        let store = MemoryStore::new();
        let session = store.create_session(1, "p", t0()).unwrap();
        let other = store.create_session(1, "p", t0()).unwrap();

        let (_, err) = store
            .record_execution(session.id, t0() + Duration::seconds(20), Some("boom"))
            .unwrap();
        assert!(err.is_some());
        store
            .record_execution(other.id, t0() + Duration::seconds(5), Some("elsewhere"))
            .unwrap();
        let run = store.record_run(session.id, t0() + Duration::seconds(40)).unwrap();
        store
            .record_error(run.id, "late", t0() + Duration::seconds(10))
            .unwrap();

        let errors = store.list_error_events_for_session(session.id).unwrap();
        let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["late", "boom"]);
    }

    #[test]
    fn test_execution_without_error_output() {
        let store = MemoryStore::new();
        let session = store.create_session(1, "p", t0()).unwrap();

        let (_, err) = store.record_execution(session.id, t0(), Some("")).unwrap();
        assert!(err.is_none());
        let (_, err) = store.record_execution(session.id, t0(), None).unwrap();
        assert!(err.is_none());

        assert_eq!(store.list_run_events(session.id).unwrap().len(), 2);
        assert!(store.list_error_events_for_session(session.id).unwrap().is_empty());
    }

    #[test]
    fn test_events_require_existing_parents() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.record_run(5, t0()),
            Err(StoreError::NotFound { entity: "session", .. })
        ));
        assert!(matches!(
            store.record_error(5, "x", t0()),
            Err(StoreError::NotFound { entity: "run", .. })
        ));
    }

    #[test]
    fn test_users_unique_by_normalized_email() {
        let store = MemoryStore::new();
        let user = store.create_user("Ada@Example.com ", "hash", t0()).unwrap();
        assert_eq!(user.email, "ada@example.com");

        let dup = store.create_user("ada@example.com", "hash", t0());
        assert!(matches!(dup, Err(StoreError::Conflict(_))));

        let found = store.find_user_by_email("ADA@example.com").unwrap().unwrap();
        assert_eq!(found.id, user.id);

        store.mark_verified(user.id).unwrap();
        assert!(store.find_user_by_email("ada@example.com").unwrap().unwrap().is_verified);
    }

    #[test]
    fn test_verification_codes_single_use() {
        let store = MemoryStore::new();
        let code = store.issue_code(1, "123456", t0()).unwrap();

        assert!(store.find_active_code(1, "123456").unwrap().is_some());
        assert!(store.find_active_code(1, "654321").unwrap().is_none());
        assert!(store.find_active_code(2, "123456").unwrap().is_none());

        store.mark_code_used(code.id).unwrap();
        assert!(store.find_active_code(1, "123456").unwrap().is_none());
    }

    #[test]
    fn test_prompt_catalog() {
        let store = MemoryStore::new();
        assert!(store.random_prompt().unwrap().is_none());

        assert_eq!(store.seed_default_prompts().unwrap(), DEFAULT_PROMPTS.len());
        assert_eq!(store.seed_default_prompts().unwrap(), 0);

        let prompt = store.random_prompt().unwrap().unwrap();
        assert!(DEFAULT_PROMPTS.contains(&prompt.text.as_str()));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = MemoryStore::with_persistence(path.clone()).unwrap();
            let session = store.create_session(3, "p", t0()).unwrap();
            store
                .record_execution(session.id, t0() + Duration::seconds(9), Some("err"))
                .unwrap();
            store.save().unwrap();
        }

        let store = MemoryStore::with_persistence(path).unwrap();
        assert_eq!(store.get_session(1).unwrap().unwrap().user_id, 3);
        assert_eq!(store.list_run_events(1).unwrap().len(), 1);
        assert_eq!(store.list_error_events_for_session(1).unwrap().len(), 1);
        // Catalog was seeded once and persisted, not duplicated.
        assert_eq!(store.list_prompts().unwrap().len(), DEFAULT_PROMPTS.len());
    }

    #[test]
    fn test_save_replaces_snapshot_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ truncated").unwrap();

        let store = MemoryStore {
            persist_path: Some(path.clone()),
            ..MemoryStore::new()
        };
        store.create_session(1, "p", t0()).unwrap();
        store.save().unwrap();
        store.create_session(2, "q", t0()).unwrap();
        store.save().unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("store.json")]);

        let reloaded = MemoryStore::with_persistence(path).unwrap();
        assert_eq!(reloaded.get_session(2).unwrap().unwrap().user_id, 2);
    }

    #[test]
    fn test_save_without_path_is_noop() {
        MemoryStore::new().save().unwrap();
    }
}
