//! Configuration for the practice tracker.
//!
//! A `Config` is built once at startup (file, then environment overrides)
//! and handed to the components that need it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Secret used when none is configured. Refused in production.
pub const DEV_SECRET_KEY: &str = "dev-secret-change-me";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Parse an environment name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }
}

/// Main configuration for the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub environment: Environment,

    /// HMAC secret for access tokens
    pub secret_key: String,

    /// Port the HTTP server binds to (0 for random)
    pub port: u16,

    /// Origins allowed by CORS
    pub allowed_origins: Vec<String>,

    /// Directory for the store snapshot
    pub data_path: PathBuf,

    /// Whether to load and save the store snapshot
    pub persist_store: bool,

    /// Interpreter invoked as `<interpreter> -c <code>`
    pub interpreter: String,

    /// Hard limit on a single execution
    #[serde(with = "duration_serde")]
    pub execution_timeout: Duration,

    /// Lifetime of an email verification code
    pub otp_ttl_minutes: i64,

    /// Lifetime of an access token
    pub token_ttl_hours: i64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("practice-tracker");

        Self {
            environment: Environment::Development,
            secret_key: DEV_SECRET_KEY.to_string(),
            port: 8000,
            allowed_origins: vec!["http://localhost:5173".to_string()],
            data_path: data_dir,
            persist_store: true,
            interpreter: "python3".to_string(),
            execution_timeout: Duration::from_secs(2),
            otp_ttl_minutes: 15,
            token_ttl_hours: 24,
        }
    }
}

impl Config {
    /// Load configuration from the default location, then apply
    /// `PRACTICE_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("PRACTICE_ENV") {
            self.environment = Environment::parse(&env)
                .ok_or_else(|| ConfigError::InvalidValue(format!("PRACTICE_ENV={env}")))?;
        }
        if let Some(secret) = lookup("PRACTICE_SECRET_KEY") {
            self.secret_key = secret;
        }
        if let Some(port) = lookup("PRACTICE_PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("PRACTICE_PORT={port}")))?;
        }
        if let Some(interpreter) = lookup("PRACTICE_INTERPRETER") {
            self.interpreter = interpreter;
        }
        if let Some(path) = lookup("PRACTICE_DATA_PATH") {
            self.data_path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Reject settings that must not reach a running server.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret_key.is_empty() {
            return Err(ConfigError::InvalidValue("secret_key is empty".to_string()));
        }
        if self.environment == Environment::Production && self.secret_key == DEV_SECRET_KEY {
            return Err(ConfigError::InvalidValue(
                "production requires PRACTICE_SECRET_KEY".to_string(),
            ));
        }
        if self.execution_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "execution_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("practice-tracker")
            .join("config.json")
    }

    /// Path of the store snapshot file.
    pub fn store_path(&self) -> PathBuf {
        self.data_path.join("store.json")
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::InvalidValue(e) => write!(f, "Invalid value: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
