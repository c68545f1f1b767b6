/// Session registry: identity UUID -> currently valid refresh token.
///
/// One entry per identity, only written while single-session mode is on.
/// The registry records replacements but never revokes; the caller revokes
/// the prior token before overwriting, which keeps eviction and
/// registration independently testable.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;

fn session_key(uuid: Uuid) -> String {
    format!("session:{}", uuid)
}

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Unconditionally overwrite the identity's entry. `ttl` is the
    /// remaining lifetime of the refresh token being registered.
    async fn register(
        &self,
        uuid: Uuid,
        refresh_token: &str,
        ttl: Duration,
    ) -> Result<(), AppError>;

    async fn lookup(&self, uuid: Uuid) -> Result<Option<String>, AppError>;

    async fn clear(&self, uuid: Uuid) -> Result<(), AppError>;
}

/// Redis-backed registry; entries expire store-side with the refresh token.
#[derive(Clone)]
pub struct RedisSessionRegistry {
    conn: ConnectionManager,
}

impl RedisSessionRegistry {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SessionRegistry for RedisSessionRegistry {
    async fn register(
        &self,
        uuid: Uuid,
        refresh_token: &str,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(session_key(uuid), refresh_token, ttl.as_secs())
            .await?;
        Ok(())
    }

    async fn lookup(&self, uuid: Uuid) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let entry: Option<String> = conn.get(session_key(uuid)).await?;
        Ok(entry)
    }

    async fn clear(&self, uuid: Uuid) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(session_key(uuid)).await?;
        Ok(())
    }
}

/// Expiry-aware in-memory registry for tests and single-node development.
#[derive(Default)]
pub struct MemorySessionRegistry {
    entries: Mutex<HashMap<Uuid, (String, DateTime<Utc>)>>,
}

impl MemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRegistry for MemorySessionRegistry {
    async fn register(
        &self,
        uuid: Uuid,
        refresh_token: &str,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| AppError::Internal(format!("ttl out of range: {}", e)))?;
        let mut entries = self.entries.lock().await;
        entries.insert(uuid, (refresh_token.to_string(), expires_at));
        Ok(())
    }

    async fn lookup(&self, uuid: Uuid) -> Result<Option<String>, AppError> {
        let mut entries = self.entries.lock().await;
        match entries.get(&uuid) {
            Some((_, expires_at)) if *expires_at <= Utc::now() => {
                entries.remove(&uuid);
                Ok(None)
            }
            Some((token, _)) => Ok(Some(token.clone())),
            None => Ok(None),
        }
    }

    async fn clear(&self, uuid: Uuid) -> Result<(), AppError> {
        let mut entries = self.entries.lock().await;
        entries.remove(&uuid);
        Ok(())
    }
}
