/// Durable revocation of refresh tokens, mirrored into a process-wide
/// concurrent set for O(1) membership checks on the request path.
///
/// The durable side is append-only; entries are never removed, so
/// membership is monotonic over a token's lifetime.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashSet;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::error::AppError;

/// Append-only durable record of revoked refresh tokens.
#[async_trait]
pub trait RevocationLog: Send + Sync {
    async fn append(&self, token: &str) -> Result<(), AppError>;

    /// Full scan, used once at startup to rebuild the cache.
    async fn load_all(&self) -> Result<Vec<String>, AppError>;
}

pub struct PostgresRevocationLog {
    pool: PgPool,
}

impl PostgresRevocationLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationLog for PostgresRevocationLog {
    async fn append(&self, token: &str) -> Result<(), AppError> {
        sqlx::query("INSERT INTO jwt_blacklist (jwt, created_at) VALUES ($1, $2)")
            .bind(token)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query_scalar::<_, String>("SELECT jwt FROM jwt_blacklist")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

/// In-memory log for tests; shared via `Arc` to simulate storage that
/// outlives a process restart.
#[derive(Default)]
pub struct MemoryRevocationLog {
    rows: Mutex<Vec<String>>,
}

impl MemoryRevocationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationLog for MemoryRevocationLog {
    async fn append(&self, token: &str) -> Result<(), AppError> {
        self.rows.lock().await.push(token.to_string());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<String>, AppError> {
        Ok(self.rows.lock().await.clone())
    }
}

/// Durable log plus its in-process membership mirror.
pub struct RevocationStore {
    log: Arc<dyn RevocationLog>,
    cache: DashSet<String>,
}

impl RevocationStore {
    pub fn new(log: Arc<dyn RevocationLog>) -> Self {
        Self {
            log,
            cache: DashSet::new(),
        }
    }

    /// Rebuild the cache from durable storage. Must complete before the
    /// service accepts traffic; a failure here is fatal for startup, since
    /// serving with an empty cache would silently un-revoke every
    /// previously blacklisted token.
    pub async fn load_all(&self) -> Result<usize, AppError> {
        let tokens = self.log.load_all().await?;
        let count = tokens.len();
        for token in tokens {
            self.cache.insert(token);
        }
        Ok(count)
    }

    /// Durable write first, then the cache insert. If the durable write
    /// fails the cache is left untouched and the whole calling operation
    /// must abort.
    pub async fn revoke(&self, token: &str) -> Result<(), AppError> {
        self.log.append(token).await?;
        self.cache.insert(token.to_string());
        Ok(())
    }

    /// Cache-only membership check; never touches durable storage.
    pub fn is_revoked(&self, token: &str) -> bool {
        self.cache.contains(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingLog;

    #[async_trait]
    impl RevocationLog for FailingLog {
        async fn append(&self, _token: &str) -> Result<(), AppError> {
            Err(AppError::Storage(crate::error::StorageError::Database(
                "write refused".to_string(),
            )))
        }

        async fn load_all(&self) -> Result<Vec<String>, AppError> {
            Err(AppError::Storage(crate::error::StorageError::Database(
                "scan refused".to_string(),
            )))
        }
    }

    #[tokio::test]
    async fn revoked_token_is_immediately_visible() {
        let store = RevocationStore::new(Arc::new(MemoryRevocationLog::new()));

        assert!(!store.is_revoked("refresh-a"));
        store.revoke("refresh-a").await.unwrap();
        assert!(store.is_revoked("refresh-a"));
    }

    #[tokio::test]
    async fn revocation_survives_a_cache_rebuild() {
        let log = Arc::new(MemoryRevocationLog::new());

        let store = RevocationStore::new(log.clone());
        store.revoke("refresh-a").await.unwrap();

        // Simulated restart: a fresh store over the same durable log.
        let restarted = RevocationStore::new(log);
        assert!(!restarted.is_revoked("refresh-a"));
        restarted.load_all().await.unwrap();
        assert!(restarted.is_revoked("refresh-a"));
    }

    #[tokio::test]
    async fn durable_write_failure_leaves_the_cache_untouched() {
        let store = RevocationStore::new(Arc::new(FailingLog));

        assert!(store.revoke("refresh-a").await.is_err());
        assert!(!store.is_revoked("refresh-a"));
    }

    #[tokio::test]
    async fn load_all_failure_is_reported() {
        let store = RevocationStore::new(Arc::new(FailingLog));
        assert!(store.load_all().await.is_err());
    }

    #[tokio::test]
    async fn load_all_reports_the_number_of_entries() {
        let log = Arc::new(MemoryRevocationLog::new());
        log.append("a").await.unwrap();
        log.append("b").await.unwrap();

        let store = RevocationStore::new(log);
        assert_eq!(store.load_all().await.unwrap(), 2);
    }
}
