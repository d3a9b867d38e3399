//! Account security helpers: password hashing, one-time codes and tokens.

pub mod jwt;
pub mod otp;
pub mod password;

pub use jwt::{Claims, JwtService};
pub use otp::{generate_otp, OTP_LENGTH};
pub use password::{hash_password, verify_password};

/// Authentication helper errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Password hashing or hash parsing failed
    HashError(String),
    /// Token creation or verification failed
    TokenError(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::HashError(e) => write!(f, "Password hash error: {e}"),
            AuthError::TokenError(e) => write!(f, "Token error: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}
