/// Claim payloads embedded in the two token kinds, and the closed role
/// enum with its single capability-check entry point.
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of identity roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Role {
    User = 1,
    Admin = 2,
}

/// Actions gated by role. All role checks go through [`Role::grants`];
/// handlers never compare roles directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Administer,
}

impl Role {
    pub fn grants(self, capability: Capability) -> bool {
        match capability {
            Capability::Administer => matches!(self, Role::Admin),
        }
    }
}

/// Minimal payload common to token issuance; never carries secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseClaims {
    pub user_id: i64,
    pub uuid: Uuid,
    pub role: Role,
}

/// Access token payload. Stateless: validity is signature plus expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: i64,
    pub uuid: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl AccessClaims {
    pub fn base(&self) -> BaseClaims {
        BaseClaims {
            user_id: self.user_id,
            uuid: self.uuid,
            role: self.role,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_default()
    }
}

/// Refresh token payload. Carries only the identity id; role and UUID are
/// re-fetched from the identity store at rotation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub user_id: i64,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl RefreshClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or_default()
    }
}
