//! Bitbucket provider, optionally restricted to members of one team.

use async_trait::async_trait;
use authgate_core::SessionState;
use rootcause::prelude::Report;
use serde::Deserialize;
use url::Url;

use crate::api::get_json;
use crate::error::ProviderError;
use crate::provider::{Endpoints, Provider, ProviderConfig, ProviderData, endpoint};

const DEFAULT_SCOPE: &str = "email";
const TEAM_SCOPE: &str = "account team";

#[derive(Debug, Deserialize)]
struct Page<T> {
    values: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct EmailEntry {
    email: String,
    is_primary: bool,
}

#[derive(Debug, Deserialize)]
struct Team {
    username: String,
}

#[derive(Debug, Clone)]
pub struct BitbucketProvider {
    data: ProviderData,
    team: Option<String>,
}

impl BitbucketProvider {
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` if an endpoint is invalid.
    pub fn new(config: &ProviderConfig, team: Option<String>) -> Result<Self, Report<ProviderError>> {
        let defaults = Endpoints {
            login_url: Some(endpoint("https://bitbucket.org/site/oauth2/authorize")?),
            redeem_url: Some(endpoint("https://bitbucket.org/site/oauth2/access_token")?),
            validate_url: Some(endpoint("https://api.bitbucket.org/2.0/user/emails")?),
            ..Endpoints::default()
        };
        let team = team.filter(|t| !t.is_empty());
        let mut data = ProviderData::resolve("Bitbucket", config, defaults, DEFAULT_SCOPE)?;
        if team.is_some() && config.scope.as_deref().is_none_or(str::is_empty) {
            data = data.with_scope(TEAM_SCOPE);
        }
        Ok(Self { data, team })
    }

    fn emails_url(&self) -> Result<&Url, Report<ProviderError>> {
        Ok(self
            .data
            .validate_url()
            .ok_or_else(|| ProviderError::Configuration {
                reason: "Bitbucket provider needs a validate url".to_string(),
            })?)
    }

    async fn is_team_member(&self, team: &str, access_token: &str) -> Result<bool, Report<ProviderError>> {
        let mut url = self.emails_url()?.clone();
        url.set_path("/2.0/teams");
        url.query_pairs_mut().clear().append_pair("role", "member");

        let teams: Page<Team> = get_json(self.data.http(), &url, Some(access_token)).await?;
        Ok(teams.values.iter().any(|t| t.username == team))
    }
}

#[async_trait]
impl Provider for BitbucketProvider {
    fn data(&self) -> &ProviderData {
        &self.data
    }

    async fn email_address(
        &self,
        session: &SessionState,
    ) -> Result<Option<String>, Report<ProviderError>> {
        let token = session
            .access_token()
            .ok_or(ProviderError::MissingAccessToken)?;

        let emails: Page<EmailEntry> = get_json(self.data.http(), self.emails_url()?, Some(token)).await?;

        if let Some(team) = &self.team {
            if !self.is_team_member(team, token).await? {
                tracing::info!(team = %team, "user is not a member of the Bitbucket team");
                return Ok(None);
            }
        }

        Ok(emails
            .values
            .into_iter()
            .find(|entry| entry.is_primary)
            .map(|entry| entry.email))
    }
}
