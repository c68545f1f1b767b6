/// Identity persistence behind a seam so the auth flows are testable
/// without a live database.
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::Role;
use crate::error::AppError;
use crate::identity::model::{NewUser, User};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn insert(&self, user: NewUser) -> Result<User, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_by_open_id(&self, open_id: &str) -> Result<Option<User>, AppError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError>;

    /// Minimal fields needed to mint a fresh access token during silent
    /// rotation. Read fresh so a role change since refresh issuance is
    /// picked up.
    async fn auth_fields(&self, id: i64) -> Result<Option<(Uuid, Role)>, AppError>;

    async fn list(&self) -> Result<Vec<User>, AppError>;
}

pub struct PostgresIdentityStore {
    pool: PgPool,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str =
    "id, uuid, username, email, password_hash, role, frozen, origin, open_id, avatar, created_at";

#[async_trait]
impl IdentityStore for PostgresIdentityStore {
    async fn insert(&self, user: NewUser) -> Result<User, AppError> {
        let row = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (uuid, username, email, password_hash, role, frozen, origin, open_id, avatar, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(user.uuid)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.frozen)
        .bind(user.origin)
        .bind(&user.open_id)
        .bind(&user.avatar)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_open_id(&self, open_id: &str) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE open_id = $1",
            USER_COLUMNS
        ))
        .bind(open_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        let row = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn auth_fields(&self, id: i64) -> Result<Option<(Uuid, Role)>, AppError> {
        let row = sqlx::query_as::<_, (Uuid, Role)>("SELECT uuid, role FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list(&self) -> Result<Vec<User>, AppError> {
        let rows = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users ORDER BY id",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// In-memory identity store for tests.
pub struct MemoryIdentityStore {
    users: Mutex<HashMap<i64, User>>,
    next_id: AtomicI64,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Test hook: flip the frozen flag on an existing identity.
    pub async fn set_frozen(&self, id: i64, frozen: bool) {
        if let Some(user) = self.users.lock().await.get_mut(&id) {
            user.frozen = frozen;
        }
    }

    /// Test hook: change an identity's role.
    pub async fn set_role(&self, id: i64, role: Role) {
        if let Some(user) = self.users.lock().await.get_mut(&id) {
            user.role = role;
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn insert(&self, user: NewUser) -> Result<User, AppError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let row = User {
            id,
            uuid: user.uuid,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            frozen: user.frozen,
            origin: user.origin,
            open_id: user.open_id,
            avatar: user.avatar,
            created_at: Utc::now(),
        };
        self.users.lock().await.insert(id, row.clone());
        Ok(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_open_id(&self, open_id: &str) -> Result<Option<User>, AppError> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|u| u.open_id.as_deref() == Some(open_id))
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn auth_fields(&self, id: i64) -> Result<Option<(Uuid, Role)>, AppError> {
        Ok(self
            .users
            .lock()
            .await
            .get(&id)
            .map(|u| (u.uuid, u.role)))
    }

    async fn list(&self) -> Result<Vec<User>, AppError> {
        let users = self.users.lock().await;
        let mut rows: Vec<User> = users.values().cloned().collect();
        rows.sort_by_key(|u| u.id);
        Ok(rows)
    }
}
