//! Discord provider. The Discord user id is the session's user name.

use async_trait::async_trait;
use authgate_core::SessionState;
use rootcause::prelude::Report;
use serde::Deserialize;

use crate::api::get_json;
use crate::error::ProviderError;
use crate::provider::{Endpoints, Provider, ProviderConfig, ProviderData, endpoint};

const DEFAULT_SCOPE: &str = "identify email connections";

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscordProvider {
    data: ProviderData,
}

impl DiscordProvider {
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` if an endpoint is invalid.
    pub fn new(config: &ProviderConfig) -> Result<Self, Report<ProviderError>> {
        let profile = endpoint("https://discordapp.com/api/users/@me")?;
        let defaults = Endpoints {
            login_url: Some(endpoint("https://discordapp.com/api/oauth2/authorize")?),
            redeem_url: Some(endpoint("https://discordapp.com/api/oauth2/token")?),
            profile_url: Some(profile.clone()),
            validate_url: Some(profile),
        };
        let data = ProviderData::resolve("Discord", config, defaults, DEFAULT_SCOPE)?;
        Ok(Self { data })
    }

    /// Fetches the profile, which must carry an email.
    async fn user(&self, session: &SessionState) -> Result<(String, String), Report<ProviderError>> {
        let token = session
            .access_token()
            .ok_or(ProviderError::MissingAccessToken)?;
        let url = self
            .data
            .profile_url()
            .ok_or_else(|| ProviderError::Configuration {
                reason: "Discord provider needs a profile url".to_string(),
            })?;

        let user: DiscordUser = get_json(self.data.http(), url, Some(token)).await?;
        let email = user
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ProviderError::MissingField {
                field: "email".to_string(),
            })?;
        Ok((user.id, email))
    }
}

#[async_trait]
impl Provider for DiscordProvider {
    fn data(&self) -> &ProviderData {
        &self.data
    }

    async fn email_address(
        &self,
        session: &SessionState,
    ) -> Result<Option<String>, Report<ProviderError>> {
        let (_, email) = self.user(session).await?;
        Ok(Some(email))
    }

    async fn user_name(
        &self,
        session: &SessionState,
    ) -> Result<Option<String>, Report<ProviderError>> {
        let (id, _) = self.user(session).await?;
        Ok(Some(id))
    }

    async fn validate_session(&self, session: &SessionState) -> bool {
        self.data.validate_token(session.access_token(), true).await
    }
}
