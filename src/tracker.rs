//! Tracker operations: accounts, sessions, executions and signals.
//!
//! `Tracker` wires the store, the code runner and the auth helpers
//! together. Every check that spans more than one record lives here, so
//! the HTTP layer only maps requests and errors.

use crate::activity::{create_shared_log, SharedActivityLog};
use crate::auth::{self, AuthError, JwtService};
use crate::config::Config;
use crate::core::{derive_signals, RecordId, Session, Signal};
use crate::execute::CodeRunner;
use crate::store::{
    EventStore, Prompt, PromptStore, SessionStore, Store, StoreError, UserStore, VerificationStore,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Issuer claim on access tokens.
pub const TOKEN_ISSUER: &str = "practice-tracker";

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward (or back, for negative durations).
    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }
}

/// Result of a successful signup.
#[derive(Debug, Clone)]
pub struct SignupOutcome {
    pub user_id: RecordId,
    pub email: String,
    /// The issued verification code, for development echo only
    pub otp: String,
}

/// Result of running a snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// stderr when the run errored, stdout otherwise
    pub output: String,
    pub error: bool,
}

/// Signals derived for one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSignals {
    pub session_id: RecordId,
    pub signals: Vec<Signal>,
}

/// The practice tracker service.
pub struct Tracker {
    store: Arc<dyn Store>,
    runner: Arc<dyn CodeRunner>,
    jwt: JwtService,
    clock: Arc<dyn Clock>,
    activity: SharedActivityLog,
    otp_ttl: Duration,
    development: bool,
}

impl Tracker {
    /// Create a tracker from configuration and its collaborators.
    pub fn new(config: &Config, store: Arc<dyn Store>, runner: Arc<dyn CodeRunner>) -> Self {
        Self {
            store,
            runner,
            jwt: JwtService::new(
                &config.secret_key,
                TOKEN_ISSUER,
                Duration::hours(config.token_ttl_hours),
            ),
            clock: Arc::new(SystemClock),
            activity: create_shared_log(),
            otp_ttl: Duration::minutes(config.otp_ttl_minutes),
            development: config.is_development(),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn activity(&self) -> &SharedActivityLog {
        &self.activity
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Whether verification codes may be echoed back to clients.
    pub fn is_development(&self) -> bool {
        self.development
    }

    /// Register an unverified account and issue a verification code.
    pub fn signup(&self, email: &str, password: &str) -> Result<SignupOutcome, TrackerError> {
        let email = email.trim();
        if !is_plausible_email(email) {
            return Err(TrackerError::InvalidInput("invalid email address".to_string()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(TrackerError::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        if self.store.find_user_by_email(email)?.is_some() {
            return Err(TrackerError::EmailTaken);
        }

        let now = self.clock.now();
        let password_hash = auth::hash_password(password)?;
        let user = self
            .store
            .create_user(email, &password_hash, now)
            .map_err(|e| match e {
                StoreError::Conflict(_) => TrackerError::EmailTaken,
                other => TrackerError::Store(other),
            })?;

        let otp = auth::generate_otp();
        self.store.issue_code(user.id, &otp, now + self.otp_ttl)?;

        self.activity.record_signup();
        if self.development {
            tracing::info!(email = %user.email, otp = %otp, "Verification code issued");
        } else {
            tracing::info!(user_id = user.id, "Verification code issued");
        }

        Ok(SignupOutcome {
            user_id: user.id,
            email: user.email,
            otp,
        })
    }

    /// Verify an account with a previously issued code.
    pub fn verify_email(&self, email: &str, otp: &str) -> Result<(), TrackerError> {
        let user = self
            .store
            .find_user_by_email(email)?
            .ok_or(TrackerError::UserNotFound)?;

        let code = self
            .store
            .find_active_code(user.id, otp.trim())?
            .ok_or(TrackerError::InvalidOtp)?;

        if code.is_expired(self.clock.now()) {
            return Err(TrackerError::OtpExpired);
        }

        self.store.mark_verified(user.id)?;
        self.store.mark_code_used(code.id)?;

        tracing::info!(user_id = user.id, "Email verified");
        Ok(())
    }

    /// Authenticate and issue an access token.
    pub fn login(&self, email: &str, password: &str) -> Result<String, TrackerError> {
        let user = self
            .store
            .find_user_by_email(email)?
            .ok_or(TrackerError::InvalidCredentials)?;

        if !user.is_verified {
            return Err(TrackerError::EmailNotVerified);
        }

        if !auth::verify_password(password, &user.password_hash)? {
            return Err(TrackerError::InvalidCredentials);
        }

        Ok(self.jwt.create_token(user.id)?)
    }

    /// Pick a prompt to start a session with.
    pub fn random_prompt(&self) -> Result<Prompt, TrackerError> {
        self.store.random_prompt()?.ok_or(TrackerError::NoPrompts)
    }

    /// Start a session bound to one prompt.
    pub fn start_session(
        &self,
        user_id: RecordId,
        prompt_text: &str,
    ) -> Result<Session, TrackerError> {
        let session = self
            .store
            .create_session(user_id, prompt_text, self.clock.now())?;

        self.activity.record_session_started();
        tracing::debug!(session_id = session.id, user_id, "Session started");
        Ok(session)
    }

    /// End an active session. A session can only be ended once.
    pub fn end_session(&self, session_id: RecordId) -> Result<Session, TrackerError> {
        let session = self.require_session(session_id)?;
        if session.is_ended() {
            return Err(TrackerError::SessionAlreadyEnded(session_id));
        }

        let session = self
            .store
            .end_session(session_id, self.clock.now())
            .map_err(|e| match e {
                StoreError::Conflict(_) => TrackerError::SessionAlreadyEnded(session_id),
                StoreError::NotFound { .. } => TrackerError::SessionNotFound(session_id),
                other => TrackerError::Store(other),
            })?;

        self.activity.record_session_ended();
        tracing::debug!(session_id, "Session ended");
        Ok(session)
    }

    /// Run a snippet and record the attempt.
    ///
    /// Every call records a run; an error is recorded alongside it when the
    /// run wrote to its error stream.
    pub async fn execute(
        &self,
        session_id: RecordId,
        code: &str,
    ) -> Result<ExecutionResult, TrackerError> {
        self.require_session(session_id)?;

        let outcome = self.runner.run(code).await;
        let errored = outcome.is_error();

        self.store
            .record_execution(session_id, self.clock.now(), Some(outcome.stderr.as_str()))?;
        self.activity.record_run(errored);
        tracing::debug!(session_id, errored, "Run recorded");

        Ok(if errored {
            ExecutionResult {
                output: outcome.stderr,
                error: true,
            }
        } else {
            ExecutionResult {
                output: outcome.stdout,
                error: false,
            }
        })
    }

    /// Derive the signals for a session.
    pub fn session_signals(&self, session_id: RecordId) -> Result<SessionSignals, TrackerError> {
        let session = self.require_session(session_id)?;
        let runs = self.store.list_run_events(session_id)?;
        let errors = self.store.list_error_events_for_session(session_id)?;

        let signals = derive_signals(&session, &runs, &errors);

        self.activity.record_signal_request();
        tracing::debug!(session_id, count = signals.len(), "Signals derived");
        Ok(SessionSignals {
            session_id,
            signals,
        })
    }

    fn require_session(&self, session_id: RecordId) -> Result<Session, TrackerError> {
        self.store
            .get_session(session_id)?
            .ok_or(TrackerError::SessionNotFound(session_id))
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Tracker errors.
#[derive(Debug)]
pub enum TrackerError {
    InvalidInput(String),
    EmailTaken,
    UserNotFound,
    InvalidOtp,
    OtpExpired,
    InvalidCredentials,
    EmailNotVerified,
    NoPrompts,
    SessionNotFound(RecordId),
    SessionAlreadyEnded(RecordId),
    Store(StoreError),
    Auth(AuthError),
}

impl std::fmt::Display for TrackerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerError::InvalidInput(e) => write!(f, "Invalid input: {e}"),
            TrackerError::EmailTaken => write!(f, "Email already registered"),
            TrackerError::UserNotFound => write!(f, "User not found"),
            TrackerError::InvalidOtp => write!(f, "Invalid OTP"),
            TrackerError::OtpExpired => write!(f, "OTP expired"),
            TrackerError::InvalidCredentials => write!(f, "Invalid credentials"),
            TrackerError::EmailNotVerified => write!(f, "Email not verified"),
            TrackerError::NoPrompts => write!(f, "No prompts available"),
            TrackerError::SessionNotFound(_) => write!(f, "Session not found"),
            TrackerError::SessionAlreadyEnded(_) => write!(f, "Session already ended"),
            TrackerError::Store(e) => write!(f, "Store error: {e}"),
            TrackerError::Auth(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for TrackerError {}

impl From<StoreError> for TrackerError {
    fn from(e: StoreError) -> Self {
        TrackerError::Store(e)
    }
}

impl From<AuthError> for TrackerError {
    fn from(e: AuthError) -> Self {
        TrackerError::Auth(e)
    }
}
