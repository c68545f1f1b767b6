/// Federated-identity collaborator. The remote provider validates the
/// user; this module only exchanges the authorization code for a profile
/// assertion and hands it to the credential service.
use async_trait::async_trait;
use serde::Deserialize;

use crate::configuration::FederatedSettings;
use crate::error::{AppError, AuthError};

/// Profile fields asserted by the remote provider for a validated user.
#[derive(Debug, Clone)]
pub struct RemoteAssertion {
    pub open_id: String,
    pub nickname: String,
    pub avatar: String,
}

#[async_trait]
pub trait FederatedProvider: Send + Sync {
    /// Exchange an authorization code for the provider's identity
    /// assertion.
    async fn exchange(&self, code: &str) -> Result<RemoteAssertion, AppError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    open_id: String,
}

#[derive(Deserialize)]
struct ProfileResponse {
    nickname: String,
    #[serde(default)]
    avatar: String,
}

pub struct HttpFederatedProvider {
    client: reqwest::Client,
    settings: FederatedSettings,
}

impl HttpFederatedProvider {
    pub fn new(settings: FederatedSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }
}

#[async_trait]
impl FederatedProvider for HttpFederatedProvider {
    async fn exchange(&self, code: &str) -> Result<RemoteAssertion, AppError> {
        let token_response = self
            .client
            .get(&self.settings.token_url)
            .query(&[
                ("grant_type", "authorization_code"),
                ("client_id", self.settings.app_id.as_str()),
                ("client_secret", self.settings.app_key.as_str()),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("federated token exchange failed: {}", e)))?;

        if !token_response.status().is_success() {
            // The provider refused the code; the client's credential is bad.
            return Err(AppError::Auth(AuthError::InvalidCredential));
        }
        let token: TokenResponse = token_response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("federated token response: {}", e)))?;

        let profile_response = self
            .client
            .get(&self.settings.profile_url)
            .query(&[
                ("access_token", token.access_token.as_str()),
                ("open_id", token.open_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("federated profile fetch failed: {}", e)))?;

        if !profile_response.status().is_success() {
            return Err(AppError::Auth(AuthError::InvalidCredential));
        }
        let profile: ProfileResponse = profile_response
            .json()
            .await
            .map_err(|e| AppError::Internal(format!("federated profile response: {}", e)))?;

        Ok(RemoteAssertion {
            open_id: token.open_id,
            nickname: profile.nickname,
            avatar: profile.avatar,
        })
    }
}
