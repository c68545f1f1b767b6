use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::Role;

/// How the identity entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum RegisterOrigin {
    Email = 1,
    Federated = 2,
}

/// Identity row. The UUID is assigned once at creation and never changes;
/// it is the only key session state is stored under, so identity-table
/// churn cannot orphan session entries.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub uuid: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Role,
    pub frozen: bool,
    pub origin: RegisterOrigin,
    pub open_id: Option<String>,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
}

/// Identity fields as persisted; the store assigns the numeric id.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub uuid: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Role,
    pub frozen: bool,
    pub origin: RegisterOrigin,
    pub open_id: Option<String>,
    pub avatar: String,
}

/// Client-facing identity snapshot; never exposes credential material.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub uuid: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            uuid: user.uuid,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            avatar: user.avatar.clone(),
            created_at: user.created_at,
        }
    }
}
