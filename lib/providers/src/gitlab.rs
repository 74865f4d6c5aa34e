//! GitLab provider, optionally restricted to members of named groups.

use async_trait::async_trait;
use authgate_core::SessionState;
use rootcause::prelude::Report;
use serde::Deserialize;
use url::Url;

use crate::api::get_json;
use crate::error::ProviderError;
use crate::provider::{Endpoints, Provider, ProviderConfig, ProviderData, endpoint};

const DEFAULT_SCOPE: &str = "read_user";
const GROUP_SCOPE: &str = "api";
const GROUPS_PER_PAGE: u32 = 100;

#[derive(Debug, Deserialize)]
struct GitLabUser {
    email: String,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitLabGroup {
    full_path: String,
}

/// Provider for gitlab.com or a self-hosted GitLab.
#[derive(Debug, Clone)]
pub struct GitLabProvider {
    data: ProviderData,
    groups: Vec<String>,
}

impl GitLabProvider {
    /// Creates the provider. Restricting to groups widens the default scope so
    /// group membership can be listed.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` if an endpoint is invalid.
    pub fn new(config: &ProviderConfig, groups: Vec<String>) -> Result<Self, Report<ProviderError>> {
        let defaults = Endpoints {
            login_url: Some(endpoint("https://gitlab.com/oauth/authorize")?),
            redeem_url: Some(endpoint("https://gitlab.com/oauth/token")?),
            validate_url: Some(endpoint("https://gitlab.com/api/v4/user")?),
            ..Endpoints::default()
        };
        let mut data = ProviderData::resolve("GitLab", config, defaults, DEFAULT_SCOPE)?;
        if !groups.is_empty() && config.scope.as_deref().is_none_or(str::is_empty) {
            data = data.with_scope(GROUP_SCOPE);
        }
        Ok(Self { data, groups })
    }

    fn api_url(&self) -> Result<&Url, Report<ProviderError>> {
        Ok(self
            .data
            .validate_url()
            .ok_or_else(|| ProviderError::Configuration {
                reason: "GitLab provider needs a validate url".to_string(),
            })?)
    }

    async fn in_allowed_group(&self, access_token: &str) -> Result<bool, Report<ProviderError>> {
        let base = self.api_url()?.join("groups").map_err(|e| ProviderError::Configuration {
            reason: format!("invalid groups url: {e}"),
        })?;

        for page in 1.. {
            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("per_page", &GROUPS_PER_PAGE.to_string())
                .append_pair("page", &page.to_string());
            let groups: Vec<GitLabGroup> = get_json(self.data.http(), &url, Some(access_token)).await?;
            if groups.is_empty() {
                break;
            }
            if groups.iter().any(|g| self.groups.contains(&g.full_path)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl Provider for GitLabProvider {
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

        if !self.groups.is_empty() && !self.in_allowed_group(token).await? {
            tracing::info!(groups = ?self.groups, "user is not a member of any allowed GitLab group");
            return Ok(None);
        }

        let user: GitLabUser = get_json(self.data.http(), self.api_url()?, Some(token)).await?;
        if user.state.as_deref().is_some_and(|state| state != "active") {
            tracing::info!(email = %user.email, "GitLab account is not active");
            return Ok(None);
        }
        Ok(Some(user.email).filter(|e| !e.is_empty()))
    }
}
