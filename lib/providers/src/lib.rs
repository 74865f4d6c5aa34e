//! Identity provider integrations for authgate.
//!
//! This crate provides:
//! - The [`Provider`] contract with plain OAuth2 defaults
//! - Variants for generic OAuth2, OpenID Connect, GitLab, Bitbucket and Discord
//! - [`build_provider`] to construct the configured variant

mod api;
pub mod bitbucket;
pub mod discord;
pub mod error;
pub mod generic;
pub mod gitlab;
pub mod oidc;
pub mod provider;
pub mod registry;

pub use bitbucket::BitbucketProvider;
pub use discord::DiscordProvider;
pub use error::ProviderError;
pub use generic::GenericProvider;
pub use gitlab::GitLabProvider;
pub use oidc::{OidcProvider, OidcSettings};
pub use provider::{Endpoints, Provider, ProviderConfig, ProviderData};
pub use registry::{ProviderKind, ProviderSettings, build_provider};
