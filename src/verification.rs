/// Email verification records consumed during registration.
///
/// The email-delivery collaborator writes a record when it sends a code;
/// registration takes it back out and checks it. Accessors fail closed: an
/// absent record, a mismatched field or a past expiry is a hard rejection.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AppError, ValidationError};

const CODE_LENGTH: usize = 6;

fn verification_key(email: &str) -> String {
    format!("verify:{}", email)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl VerificationRecord {
    /// Issue a fresh numeric code for the address.
    pub fn issue(email: &str, ttl: Duration) -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LENGTH)
            .map(|_| char::from_digit(rng.gen_range(0..10), 10).unwrap())
            .collect();
        Self {
            email: email.to_string(),
            code,
            expires_at: Utc::now()
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(10)),
        }
    }

    /// Check the submitted email and code against this record.
    pub fn verify(&self, email: &str, code: &str) -> Result<(), AppError> {
        if self.email != email {
            return Err(AppError::Validation(ValidationError::InvalidFormat(
                "verification email",
            )));
        }
        if self.code != code {
            return Err(AppError::Validation(ValidationError::InvalidFormat(
                "verification code",
            )));
        }
        if self.expires_at <= Utc::now() {
            return Err(AppError::Validation(ValidationError::Expired(
                "verification code",
            )));
        }
        Ok(())
    }
}

#[async_trait]
pub trait VerificationStore: Send + Sync {
    async fn put(&self, record: &VerificationRecord) -> Result<(), AppError>;

    /// Remove and return the record for this address. Single use: a second
    /// take sees nothing.
    async fn take(&self, email: &str) -> Result<Option<VerificationRecord>, AppError>;
}

pub struct RedisVerificationStore {
    conn: ConnectionManager,
}

impl RedisVerificationStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl VerificationStore for RedisVerificationStore {
    async fn put(&self, record: &VerificationRecord) -> Result<(), AppError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| AppError::Internal(format!("verification record encode: {}", e)))?;
        let remaining = (record.expires_at - Utc::now()).num_seconds().max(1) as u64;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(verification_key(&record.email), payload, remaining)
            .await?;
        Ok(())
    }

    async fn take(&self, email: &str) -> Result<Option<VerificationRecord>, AppError> {
        let key = verification_key(email);
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(&key).await?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let _: () = conn.del(&key).await?;
        let record = serde_json::from_str(&payload)
            .map_err(|e| AppError::Internal(format!("verification record decode: {}", e)))?;
        Ok(Some(record))
    }
}

#[derive(Default)]
pub struct MemoryVerificationStore {
    records: Mutex<HashMap<String, VerificationRecord>>,
}

impl MemoryVerificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VerificationStore for MemoryVerificationStore {
    async fn put(&self, record: &VerificationRecord) -> Result<(), AppError> {
        self.records
            .lock()
            .await
            .insert(record.email.clone(), record.clone());
        Ok(())
    }

    async fn take(&self, email: &str) -> Result<Option<VerificationRecord>, AppError> {
        Ok(self.records.lock().await.remove(email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_code_verifies() {
        let record = VerificationRecord::issue("user@example.com", Duration::from_secs(600));
        assert_eq!(record.code.len(), CODE_LENGTH);
        assert!(record.verify("user@example.com", &record.code).is_ok());
    }

    #[test]
    fn mismatched_email_fails_closed() {
        let record = VerificationRecord::issue("user@example.com", Duration::from_secs(600));
        assert!(record.verify("other@example.com", &record.code).is_err());
    }

    #[test]
    fn wrong_code_fails_closed() {
        let record = VerificationRecord::issue("user@example.com", Duration::from_secs(600));
        assert!(record.verify("user@example.com", "000000x").is_err());
    }

    #[test]
    fn expired_record_fails_closed() {
        let mut record = VerificationRecord::issue("user@example.com", Duration::from_secs(600));
        record.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(record.verify("user@example.com", &record.code).is_err());
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let store = MemoryVerificationStore::new();
        let record = VerificationRecord::issue("user@example.com", Duration::from_secs(600));
        store.put(&record).await.unwrap();

        assert!(store.take("user@example.com").await.unwrap().is_some());
        assert!(store.take("user@example.com").await.unwrap().is_none());
    }
}
