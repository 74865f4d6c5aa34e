//! Plain OAuth2 provider.
//!
//! Login and redeem URLs must be configured. When a profile URL is set, the
//! email and user name are read from it with the session's access token.

use async_trait::async_trait;
use authgate_core::SessionState;
use rootcause::prelude::Report;
use serde::Deserialize;

use crate::api::get_json;
use crate::error::ProviderError;
use crate::provider::{Endpoints, Provider, ProviderConfig, ProviderData};

const DEFAULT_SCOPE: &str = "profile email";

#[derive(Debug, Deserialize)]
struct Profile {
    email: Option<String>,
    preferred_username: Option<String>,
    login: Option<String>,
}

/// Provider for any OAuth2 authorization server.
#[derive(Debug, Clone)]
pub struct GenericProvider {
    data: ProviderData,
}

impl GenericProvider {
    /// Creates the provider.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` when login or redeem URLs are missing.
    pub fn new(config: &ProviderConfig) -> Result<Self, Report<ProviderError>> {
        let data = ProviderData::resolve("OAuth2", config, Endpoints::default(), DEFAULT_SCOPE)?;
        Ok(Self { data })
    }

    async fn profile(&self, session: &SessionState) -> Result<Option<Profile>, Report<ProviderError>> {
        let Some(url) = self.data.profile_url() else {
            return Ok(None);
        };
        let token = session
            .access_token()
            .ok_or(ProviderError::MissingAccessToken)?;
        Ok(Some(get_json(self.data.http(), url, Some(token)).await?))
    }
}

#[async_trait]
impl Provider for GenericProvider {
    fn data(&self) -> &ProviderData {
        &self.data
    }

    async fn email_address(
        &self,
        session: &SessionState,
    ) -> Result<Option<String>, Report<ProviderError>> {
        Ok(self.profile(session).await?.and_then(|p| p.email))
    }

    async fn user_name(
        &self,
        session: &SessionState,
    ) -> Result<Option<String>, Report<ProviderError>> {
        Ok(self
            .profile(session)
            .await?
            .and_then(|p| p.preferred_username.or(p.login)))
    }
}
