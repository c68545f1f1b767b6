/// Token minting and verification.
///
/// A single process secret signs both token kinds (HS256). Expiry and
/// issued-at are embedded claims, so a token is self-describing and
/// verifiable without store access. `Expired` is split out from the other
/// failure kinds because it drives the silent-rotation path; everything
/// else is a hard rejection.
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};

use crate::auth::claims::{AccessClaims, BaseClaims, RefreshClaims};
use crate::configuration::JwtSettings;
use crate::error::AppError;

/// Typed verification failure, inspected by the auth gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Malformed,
    BadSignature,
}

#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    issuer: String,
}

impl TokenCodec {
    pub fn new(settings: &JwtSettings) -> Self {
        Self {
            secret: settings.secret.clone(),
            access_ttl: settings.access_ttl,
            refresh_ttl: settings.refresh_ttl,
            issuer: settings.issuer.clone(),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn mint_access(&self, base: BaseClaims) -> Result<(String, AccessClaims), AppError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            user_id: base.user_id,
            uuid: base.uuid,
            role: base.role,
            iat: now,
            exp: now + self.access_ttl.as_secs() as i64,
            iss: self.issuer.clone(),
        };
        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    pub fn mint_refresh(&self, user_id: i64) -> Result<(String, RefreshClaims), AppError> {
        let now = Utc::now().timestamp();
        let claims = RefreshClaims {
            user_id,
            iat: now,
            exp: now + self.refresh_ttl.as_secs() as i64,
            iss: self.issuer.clone(),
        };
        let token = self.sign(&claims)?;
        Ok((token, claims))
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        self.verify(token)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.verify(token)
    }

    fn sign<C: serde::Serialize>(&self, claims: &C) -> Result<String, AppError> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(format!("token signing failed: {}", e)))
    }

    fn verify<C: serde::de::DeserializeOwned>(&self, token: &str) -> Result<C, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        // Zero leeway: an access token one second past exp must take the
        // rotation path, not sneak through.
        validation.leeway = 0;

        decode::<C>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            _ => TokenError::Malformed,
        })
    }
}
