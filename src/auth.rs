//! HS256 bearer tokens identifying the calling user.

use axum::http::{header, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::model::User;

/// Ten years; keeps the expiry arithmetic in range.
const MAX_TTL_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("failed to issue token: {0}")]
    Issue(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Local user id.
    pub sub: String,
    pub steam_id: Option<String>,
    pub name: Option<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub
            .parse()
            .map_err(|_| AuthError::Invalid(format!("subject {:?} is not a user id", self.sub)))
    }
}

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl fmt::Debug for JwtService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl JwtService {
    pub fn new(secret: &str, issuer: &str, audience: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            ttl,
        }
    }

    pub fn from_config(cfg: &config::Auth) -> Self {
        let hours = i64::try_from(cfg.token_ttl_hours)
            .unwrap_or(MAX_TTL_HOURS)
            .min(MAX_TTL_HOURS);
        Self::new(
            &cfg.jwt_secret,
            &cfg.issuer,
            &cfg.audience,
            Duration::hours(hours),
        )
    }

    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            steam_id: user.steam_id.clone(),
            name: user.username.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4().to_string(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }

    /// Resolve the user id carried by an `Authorization: Bearer` header.
    pub fn user_id_from_headers(&self, headers: &HeaderMap) -> Result<i64, AuthError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::Missing)?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Missing)?;
        self.validate(token)?.user_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn service() -> JwtService {
        JwtService::new("test-secret", "wishlist-sync", "wishlist-client", Duration::hours(24))
    }

    fn user() -> User {
        User {
            id: 42,
            steam_id: Some("76561197960287930".into()),
            username: Some("gaben".into()),
            avatar_url: None,
            profile_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn issued_token_round_trips_claims() {
        let svc = service();
        let token = svc.issue(&user()).unwrap();
        let claims = svc.validate(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.steam_id.as_deref(), Some("76561197960287930"));
        assert_eq!(claims.name.as_deref(), Some("gaben"));
        assert_eq!(claims.exp - claims.iat, 24 * 3600);
        assert!(Uuid::parse_str(&claims.jti).is_ok());
    }

    #[test]
    fn rejects_foreign_secret_and_audience() {
        let token = service().issue(&user()).unwrap();
        let other_secret =
            JwtService::new("other", "wishlist-sync", "wishlist-client", Duration::hours(1));
        assert!(matches!(
            other_secret.validate(&token),
            Err(AuthError::Invalid(_))
        ));
        let other_aud = JwtService::new("test-secret", "wishlist-sync", "elsewhere", Duration::hours(1));
        assert!(other_aud.validate(&token).is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let expired = JwtService::new(
            "test-secret",
            "wishlist-sync",
            "wishlist-client",
            Duration::hours(-2),
        );
        let token = expired.issue(&user()).unwrap();
        assert!(service().validate(&token).is_err());
    }

    #[test]
    fn reads_bearer_header() {
        let svc = service();
        let token = svc.issue(&user()).unwrap();
        let mut headers = HeaderMap::new();
        assert!(matches!(
            svc.user_id_from_headers(&headers),
            Err(AuthError::Missing)
        ));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        assert_eq!(svc.user_id_from_headers(&headers).unwrap(), 42);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(
            svc.user_id_from_headers(&headers),
            Err(AuthError::Missing)
        ));
    }
}
