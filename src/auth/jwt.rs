//! HS256 access tokens.

use super::AuthError;
use crate::core::RecordId;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT claims carried by an access token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id, as a string
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub jti: String,
}

impl Claims {
    /// The user id in `sub`, if it parses.
    pub fn user_id(&self) -> Option<RecordId> {
        self.sub.parse().ok()
    }
}

/// Creates and verifies access tokens.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    lifetime: Duration,
}

impl JwtService {
    pub fn new(secret: &str, issuer: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.into(),
            lifetime,
        }
    }

    /// Issue a token for a user.
    pub fn create_token(&self, user_id: RecordId) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + self.lifetime).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenError(e.to_string()))
    }

    /// Verify and decode a token. Returns claims if valid and not expired.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::TokenError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> JwtService {
        JwtService::new("test-secret-key", "practice-tracker", Duration::hours(24))
    }

    #[test]
    fn test_roundtrip_token() {
        let svc = test_service();
        let token = svc.create_token(42).unwrap();
        let claims = svc.verify_token(&token).unwrap();
        assert_eq!(claims.user_id(), Some(42));
        assert_eq!(claims.iss, "practice-tracker");
    }

    #[test]
    fn test_token_expiry_matches_lifetime() {
        let svc = test_service();
        let claims = svc.verify_token(&svc.create_token(1).unwrap()).unwrap();
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
    }

    #[test]
    fn test_unique_token_ids() {
        let svc = test_service();
        let c1 = svc.verify_token(&svc.create_token(1).unwrap()).unwrap();
        let c2 = svc.verify_token(&svc.create_token(1).unwrap()).unwrap();
        assert_ne!(c1.jti, c2.jti);
    }

    #[test]
    fn test_rejects_invalid_token() {
        assert!(test_service().verify_token("garbage").is_err());
    }

    #[test]
    fn test_rejects_wrong_secret() {
        let other = JwtService::new("other-secret", "practice-tracker", Duration::hours(24));
        let token = other.create_token(1).unwrap();
        assert!(test_service().verify_token(&token).is_err());
    }

    #[test]
    fn test_rejects_expired_token() {
        let svc = JwtService::new("test-secret-key", "practice-tracker", Duration::hours(-1));
        let token = svc.create_token(1).unwrap();
        assert!(svc.verify_token(&token).is_err());
    }
}
