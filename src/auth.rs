//! Session tokens — short-lived HS256 JWTs identifying an authenticated
//! client session, keyed by a secret derived from `SERVER_SECRET`
//! ([`crate::crypto::derive_signing_key`]).

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const TOKEN_TTL_SECS: i64 = 12 * 60 * 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Client id (subject).
    pub sub: Uuid,
    pub admin: bool,
    pub iat: i64,
    pub exp: i64,
}

pub struct SessionTokens {
    signing_key: [u8; 32],
}

impl SessionTokens {
    pub fn new(server_secret: &str) -> Self {
        Self {
            signing_key: crate::crypto::derive_signing_key(server_secret, b"session-tokens-v1"),
        }
    }

    pub fn issue(&self, client_id: Uuid, admin: bool) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: client_id,
            admin,
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.signing_key),
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to issue session token: {e}")))
    }

    pub fn validate(&self, token: &str) -> AppResult<Claims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.signing_key),
            &Validation::default(),
        )
        .map_err(|_| AppError::Unauthorized)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_claims() {
        let tokens = SessionTokens::new("wire");
        let client_id = Uuid::new_v4();
        let token = tokens.issue(client_id, true).unwrap();
        let claims = tokens.validate(&token).unwrap();
        assert_eq!(claims.sub, client_id);
        assert!(claims.admin);
    }

    #[test]
    fn rejects_token_signed_with_different_secret() {
        let a = SessionTokens::new("wire");
        let b = SessionTokens::new("other");
        let token = a.issue(Uuid::new_v4(), false).unwrap();
        assert!(b.validate(&token).is_err());
    }

    #[test]
    fn rejects_garbage() {
        let tokens = SessionTokens::new("wire");
        assert!(tokens.validate("not-a-token").is_err());
    }
}
