//! Selects and builds the configured provider variant.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rootcause::prelude::Report;

use crate::bitbucket::BitbucketProvider;
use crate::discord::DiscordProvider;
use crate::error::ProviderError;
use crate::generic::GenericProvider;
use crate::gitlab::GitLabProvider;
use crate::oidc::{OidcProvider, OidcSettings};
use crate::provider::{Provider, ProviderConfig};

/// The provider variants authgate knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    OAuth2,
    Oidc,
    GitLab,
    Bitbucket,
    Discord,
}

impl ProviderKind {
    pub const ALL: [Self; 5] = [
        Self::OAuth2,
        Self::Oidc,
        Self::GitLab,
        Self::Bitbucket,
        Self::Discord,
    ];

    /// The configuration name of this variant.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OAuth2 => "oauth2",
            Self::Oidc => "oidc",
            Self::GitLab => "gitlab",
            Self::Bitbucket => "bitbucket",
            Self::Discord => "discord",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| ProviderError::UnknownProvider {
                name: s.to_string(),
            })
    }
}

/// Everything needed to construct a provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub config: ProviderConfig,
    /// Required for [`ProviderKind::Oidc`].
    pub oidc: Option<OidcSettings>,
    pub gitlab_groups: Vec<String>,
    pub bitbucket_team: Option<String>,
}

/// Builds the provider described by `settings`.
///
/// OIDC providers perform discovery here, so this may touch the network.
///
/// # Errors
///
/// Returns `ProviderError::Configuration` when the variant's settings are
/// incomplete or discovery fails.
pub async fn build_provider(
    settings: &ProviderSettings,
) -> Result<Arc<dyn Provider>, Report<ProviderError>> {
    let config = &settings.config;
    let provider: Arc<dyn Provider> = match settings.kind {
        ProviderKind::OAuth2 => Arc::new(GenericProvider::new(config)?),
        ProviderKind::Oidc => {
            let oidc = settings
                .oidc
                .as_ref()
                .ok_or_else(|| ProviderError::Configuration {
                    reason: "oidc provider needs an issuer url".to_string(),
                })?;
            Arc::new(OidcProvider::new(config, oidc).await?)
        }
        ProviderKind::GitLab => {
            Arc::new(GitLabProvider::new(config, settings.gitlab_groups.clone())?)
        }
        ProviderKind::Bitbucket => {
            Arc::new(BitbucketProvider::new(config, settings.bitbucket_team.clone())?)
        }
        ProviderKind::Discord => Arc::new(DiscordProvider::new(config)?),
    };
    tracing::info!(provider = %provider.data().name(), kind = %settings.kind, "configured identity provider");
    Ok(provider)
}
