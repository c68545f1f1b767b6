/// Credential validation and token issuance.
///
/// Every login path funnels through [`CredentialService::issue_tokens`],
/// which owns the freeze gate and the single-session displacement sequence
/// (revoke the prior refresh token, then register the new one).
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, BaseClaims, Role, TokenCodec};
use crate::error::{bounded, AppError, AuthError};
use crate::identity::federated::RemoteAssertion;
use crate::identity::model::{NewUser, RegisterOrigin, User};
use crate::identity::store::IdentityStore;
use crate::session::{RevocationStore, SessionRegistry};

const DEFAULT_AVATAR: &str = "/image/avatar.jpg";

/// Tokens returned to the client after a successful login.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

pub struct CredentialService {
    identities: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionRegistry>,
    revocations: Arc<RevocationStore>,
    codec: TokenCodec,
    single_session: bool,
    store_timeout: Duration,
}

impl CredentialService {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionRegistry>,
        revocations: Arc<RevocationStore>,
        codec: TokenCodec,
        single_session: bool,
        store_timeout: Duration,
    ) -> Self {
        Self {
            identities,
            sessions,
            revocations,
            codec,
            single_session,
            store_timeout,
        }
    }

    /// Create a native identity and log it in. The caller has already
    /// checked the verification record and validated the input fields.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<(User, TokenPair), AppError> {
        let existing = bounded(
            self.store_timeout,
            "identity lookup",
            self.identities.find_by_email(email),
        )
        .await?;
        if existing.is_some() {
            return Err(AppError::Auth(AuthError::DuplicateIdentity));
        }

        let password_hash = hash_password(password)?;
        let user = bounded(
            self.store_timeout,
            "identity insert",
            self.identities.insert(NewUser {
                uuid: Uuid::new_v4(),
                username: username.to_string(),
                email: Some(email.to_string()),
                password_hash: Some(password_hash),
                role: Role::User,
                frozen: false,
                origin: RegisterOrigin::Email,
                open_id: None,
                avatar: DEFAULT_AVATAR.to_string(),
            }),
        )
        .await?;

        tracing::info!(user_id = user.id, uuid = %user.uuid, "identity registered");

        let pair = self.issue_tokens(&user).await?;
        Ok((user, pair))
    }

    /// Password login. Unknown email and wrong password collapse into the
    /// same failure so the response never reveals which one it was.
    pub async fn email_login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(User, TokenPair), AppError> {
        let user = bounded(
            self.store_timeout,
            "identity lookup",
            self.identities.find_by_email(email),
        )
        .await?
        .ok_or(AppError::Auth(AuthError::InvalidCredential))?;

        let stored_hash = user
            .password_hash
            .as_deref()
            .ok_or(AppError::Auth(AuthError::InvalidCredential))?;
        if !verify_password(password, stored_hash)? {
            return Err(AppError::Auth(AuthError::InvalidCredential));
        }

        let pair = self.issue_tokens(&user).await?;
        Ok((user, pair))
    }

    /// Login through a federated provider's assertion, provisioning a
    /// local identity on first sight. The assertion's authenticity was the
    /// provider's responsibility.
    pub async fn federated_login(
        &self,
        assertion: RemoteAssertion,
    ) -> Result<(User, TokenPair), AppError> {
        let existing = bounded(
            self.store_timeout,
            "identity lookup",
            self.identities.find_by_open_id(&assertion.open_id),
        )
        .await?;

        let user = match existing {
            Some(user) => user,
            None => {
                let avatar = if assertion.avatar.is_empty() {
                    DEFAULT_AVATAR.to_string()
                } else {
                    assertion.avatar.clone()
                };
                let user = bounded(
                    self.store_timeout,
                    "identity insert",
                    self.identities.insert(NewUser {
                        uuid: Uuid::new_v4(),
                        username: assertion.nickname.clone(),
                        email: None,
                        password_hash: None,
                        role: Role::User,
                        frozen: false,
                        origin: RegisterOrigin::Federated,
                        open_id: Some(assertion.open_id.clone()),
                        avatar,
                    }),
                )
                .await?;
                tracing::info!(user_id = user.id, uuid = %user.uuid, "federated identity provisioned");
                user
            }
        };

        let pair = self.issue_tokens(&user).await?;
        Ok((user, pair))
    }

    /// Revoke the presented refresh token and drop the session entry. The
    /// revocation write is durable; if it fails the logout fails.
    pub async fn logout(&self, uuid: Uuid, refresh_token: &str) -> Result<(), AppError> {
        bounded(
            self.store_timeout,
            "revocation write",
            self.revocations.revoke(refresh_token),
        )
        .await?;
        bounded(
            self.store_timeout,
            "session clear",
            self.sessions.clear(uuid),
        )
        .await?;
        tracing::info!(uuid = %uuid, "session logged out");
        Ok(())
    }

    /// Login tail shared by every path. Frozen identities are rejected
    /// before any token is minted.
    async fn issue_tokens(&self, user: &User) -> Result<TokenPair, AppError> {
        if user.frozen {
            return Err(AppError::Auth(AuthError::Frozen));
        }

        let (access_token, access_claims) = self.codec.mint_access(BaseClaims {
            user_id: user.id,
            uuid: user.uuid,
            role: user.role,
        })?;
        let (refresh_token, refresh_claims) = self.codec.mint_refresh(user.id)?;

        if self.single_session {
            let prior = bounded(
                self.store_timeout,
                "session lookup",
                self.sessions.lookup(user.uuid),
            )
            .await?;
            if let Some(prior) = prior {
                // Revoke-before-register: if the durable write fails the
                // login fails, so a success response always means the old
                // session is gone.
                bounded(
                    self.store_timeout,
                    "revocation write",
                    self.revocations.revoke(&prior),
                )
                .await?;
                tracing::info!(uuid = %user.uuid, "previous session displaced");
            }
            bounded(
                self.store_timeout,
                "session register",
                self.sessions
                    .register(user.uuid, &refresh_token, self.codec.refresh_ttl()),
            )
            .await?;
        }

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at: access_claims.expires_at(),
            refresh_expires_at: refresh_claims.expires_at(),
        })
    }
}
